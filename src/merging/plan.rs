// src/merging/plan.rs

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::canonical::select_canonical_text;
use super::labels::aggregate_labels;
use crate::clustering::SimilarityGroup;
use crate::models::{MergeStats, MergedQuestion, QuestionMapping, RawQuestion};
use crate::utils::preview;

/// Mapping score for a raw question that was not merged with anything.
pub const SINGLETON_SIMILARITY: f64 = 1.0;
/// Mapping score for every member of a group of two or more. The actual seed similarity
/// is not stored.
pub const MERGED_SIMILARITY_SENTINEL: f64 = 0.9;

/// Everything written for one group: the merged row, one mapping per member and the
/// distinct company names to link.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMerge {
    pub merged: MergedQuestion,
    pub mappings: Vec<QuestionMapping>,
    /// Distinct, non-blank, case preserved, in first-seen order.
    pub companies: Vec<String>,
}

/// The complete replacement for the merge tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    pub merges: Vec<PlannedMerge>,
}

impl MergePlan {
    pub fn len(&self) -> usize {
        self.merges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merges.is_empty()
    }

    pub fn total_mappings(&self) -> usize {
        self.merges.iter().map(|m| m.mappings.len()).sum()
    }

    pub fn duplicate_groups(&self) -> usize {
        self.merges.iter().filter(|m| m.mappings.len() > 1).count()
    }

    pub fn company_links(&self) -> usize {
        self.merges.iter().map(|m| m.companies.len()).sum()
    }

    pub fn stats(&self, total_raw: usize) -> MergeStats {
        MergeStats {
            total_raw,
            total_groups: self.len(),
            duplicate_groups: self.duplicate_groups(),
            total_mappings: self.total_mappings(),
            companies_linked: self.company_links(),
        }
    }

    /// Checks that the plan maps every id in `raw_ids` exactly once, that every mapping
    /// points at its own merged row and that each frequency equals its mapping count.
    pub fn validate(&self, raw_ids: &[Uuid]) -> Result<()> {
        let mut expected: HashSet<Uuid> = HashSet::with_capacity(raw_ids.len());
        for id in raw_ids {
            if !expected.insert(*id) {
                bail!("Raw question {} appears more than once in the input", id);
            }
        }

        let mut merged_ids = HashSet::with_capacity(self.merges.len());
        let mut mapped: HashSet<Uuid> = HashSet::with_capacity(raw_ids.len());

        for planned in &self.merges {
            let merged_id = planned.merged.id;
            if !merged_ids.insert(merged_id) {
                bail!("Merged question id {} is used twice", merged_id);
            }
            if planned.mappings.is_empty() {
                bail!("Merged question {} has no mappings", merged_id);
            }
            if usize::try_from(planned.merged.frequency).ok() != Some(planned.mappings.len()) {
                bail!(
                    "Merged question {} has frequency {} but {} mappings",
                    merged_id,
                    planned.merged.frequency,
                    planned.mappings.len()
                );
            }

            for mapping in &planned.mappings {
                if mapping.merged_question_id != merged_id {
                    bail!(
                        "Mapping for raw question {} points at {} inside merge {}",
                        mapping.raw_question_id,
                        mapping.merged_question_id,
                        merged_id
                    );
                }
                if !expected.contains(&mapping.raw_question_id) {
                    bail!("Raw question {} is not part of this rebuild", mapping.raw_question_id);
                }
                if !mapped.insert(mapping.raw_question_id) {
                    bail!("Raw question {} is mapped more than once", mapping.raw_question_id);
                }
            }
        }

        if mapped.len() != expected.len() {
            let missing = expected.difference(&mapped).count();
            bail!("{} raw questions are not mapped to any merged question", missing);
        }

        Ok(())
    }
}

/// Turns a partition of raw question ids into merged rows, mappings and company links.
///
/// Pure apart from generating merged ids. `now` becomes every row's `updated_at`.
pub fn build_merge_plan(
    raw_questions: &[RawQuestion],
    groups: &[SimilarityGroup<Uuid>],
    now: DateTime<Utc>,
) -> Result<MergePlan> {
    let by_id: HashMap<Uuid, &RawQuestion> = raw_questions.iter().map(|q| (q.id, q)).collect();
    let mut merges = Vec::with_capacity(groups.len());

    for group in groups {
        let members: Vec<&RawQuestion> = group
            .ids()
            .map(|id| {
                by_id
                    .get(id)
                    .copied()
                    .ok_or_else(|| anyhow!("Grouped id {} is not a fetched raw question", id))
            })
            .collect::<Result<_>>()?;

        let canonical = select_canonical_text(&members)
            .ok_or_else(|| anyhow!("Group seeded by {} is empty", group.seed()))?
            .to_string();
        let (question_types, question_type) = aggregate_labels(&members);
        let first_seen_at = members.iter().filter_map(|q| q.published_at).min();
        let frequency = i32::try_from(members.len())
            .with_context(|| format!("Group of {} members overflows frequency", members.len()))?;

        let merged_id = Uuid::new_v4();
        let score = if group.is_singleton() {
            SINGLETON_SIMILARITY
        } else {
            debug!(
                "Merging {} questions into {} (lowest seed similarity {:.4}): '{}'",
                members.len(),
                merged_id,
                group.min_seed_similarity(),
                preview(&canonical, 60)
            );
            MERGED_SIMILARITY_SENTINEL
        };

        let mappings = members
            .iter()
            .map(|q| QuestionMapping {
                raw_question_id: q.id,
                merged_question_id: merged_id,
                similarity_score: score,
            })
            .collect();

        let mut companies: Vec<String> = Vec::new();
        for company in members.iter().filter_map(|q| q.company.as_deref()) {
            let company = company.trim();
            if !company.is_empty() && !companies.iter().any(|c| c == company) {
                companies.push(company.to_string());
            }
        }

        merges.push(PlannedMerge {
            merged: MergedQuestion {
                id: merged_id,
                english_content: canonical.clone(),
                canonical_content: canonical,
                question_type,
                question_types,
                frequency,
                first_seen_at,
                updated_at: now,
            },
            mappings,
            companies,
        });
    }

    Ok(MergePlan { merges })
}
