// src/merging/memory_store.rs

use anyhow::{bail, Result};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::plan::MergePlan;
use super::store::QuestionStore;
use crate::models::{Company, MergedQuestion, QuestionMapping, RawQuestion};

#[derive(Debug, Default, Clone)]
struct MergeTables {
    merged: Vec<MergedQuestion>,
    mappings: Vec<QuestionMapping>,
    companies: Vec<Company>,
    /// (merged_question_id, company_id)
    links: Vec<(Uuid, Uuid)>,
}

/// A `QuestionStore` held in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryQuestionStore {
    raw: Mutex<Vec<RawQuestion>>,
    tables: Mutex<MergeTables>,
    fail_next_replace: AtomicBool,
    replace_calls: AtomicUsize,
}

impl InMemoryQuestionStore {
    pub fn new(raw_questions: Vec<RawQuestion>) -> Self {
        Self {
            raw: Mutex::new(raw_questions),
            ..Self::default()
        }
    }

    pub async fn set_raw_questions(&self, raw_questions: Vec<RawQuestion>) {
        *self.raw.lock().await = raw_questions;
    }

    /// Every company ever created, in creation order.
    pub async fn companies(&self) -> Vec<Company> {
        self.tables.lock().await.companies.clone()
    }

    pub async fn mapping_count(&self) -> usize {
        self.tables.lock().await.mappings.len()
    }

    /// Makes the next `replace_merged_questions` fail after doing its work but before
    /// publishing it.
    pub fn fail_next_replace(&self) {
        self.fail_next_replace.store(true, Ordering::SeqCst);
    }

    pub fn replace_count(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }
}

impl QuestionStore for InMemoryQuestionStore {
    async fn fetch_all_raw_questions(&self) -> Result<Vec<RawQuestion>> {
        Ok(self.raw.lock().await.clone())
    }

    async fn replace_merged_questions(&self, plan: &MergePlan) -> Result<()> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);

        let raw_ids: HashSet<Uuid> = self.raw.lock().await.iter().map(|q| q.id).collect();
        let mut tables = self.tables.lock().await;

        // Build the replacement beside the live tables; only a full success swaps it in.
        let mut next = MergeTables {
            companies: tables.companies.clone(),
            ..MergeTables::default()
        };
        let mut company_ids: HashMap<String, Uuid> = next
            .companies
            .iter()
            .map(|c| (c.name.clone(), c.id))
            .collect();

        for planned in &plan.merges {
            for mapping in &planned.mappings {
                if !raw_ids.contains(&mapping.raw_question_id) {
                    bail!(
                        "Mapping references unknown raw question {}",
                        mapping.raw_question_id
                    );
                }
            }
            next.merged.push(planned.merged.clone());
            next.mappings.extend(planned.mappings.iter().cloned());

            for name in &planned.companies {
                let company_id = match company_ids.get(name) {
                    Some(id) => *id,
                    None => {
                        let company = Company {
                            id: Uuid::new_v4(),
                            name: name.clone(),
                        };
                        debug!("Created company '{}' ({})", company.name, company.id);
                        company_ids.insert(company.name.clone(), company.id);
                        let id = company.id;
                        next.companies.push(company);
                        id
                    }
                };
                let link = (planned.merged.id, company_id);
                if !next.links.contains(&link) {
                    next.links.push(link);
                }
            }
        }

        for merged in &next.merged {
            let count = next
                .mappings
                .iter()
                .filter(|m| m.merged_question_id == merged.id)
                .count();
            if usize::try_from(merged.frequency).ok() != Some(count) {
                bail!(
                    "Frequency check failed for merged question {}: {} vs {} mappings",
                    merged.id,
                    merged.frequency,
                    count
                );
            }
        }

        if self.fail_next_replace.swap(false, Ordering::SeqCst) {
            bail!("Injected failure before publishing the merge tables");
        }

        info!(
            "In-memory store now holds {} merged questions and {} mappings",
            next.merged.len(),
            next.mappings.len()
        );
        *tables = next;
        Ok(())
    }

    async fn fetch_merged_questions(&self) -> Result<Vec<MergedQuestion>> {
        let mut merged = self.tables.lock().await.merged.clone();
        merged.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| a.canonical_content.cmp(&b.canonical_content))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(merged)
    }

    async fn fetch_mappings_for_merged(&self, merged_id: Uuid) -> Result<Vec<QuestionMapping>> {
        Ok(self
            .tables
            .lock()
            .await
            .mappings
            .iter()
            .filter(|m| m.merged_question_id == merged_id)
            .cloned()
            .collect())
    }

    async fn fetch_mapping_for_raw(&self, raw_id: Uuid) -> Result<Option<QuestionMapping>> {
        Ok(self
            .tables
            .lock()
            .await
            .mappings
            .iter()
            .find(|m| m.raw_question_id == raw_id)
            .cloned())
    }

    async fn fetch_companies_for_merged(&self, merged_id: Uuid) -> Result<Vec<Company>> {
        let tables = self.tables.lock().await;
        let mut companies: Vec<Company> = tables
            .links
            .iter()
            .filter(|(m, _)| *m == merged_id)
            .filter_map(|(_, company_id)| tables.companies.iter().find(|c| c.id == *company_id))
            .cloned()
            .collect();
        companies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(companies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::SimilarityGroup;
    use crate::merging::plan::build_merge_plan;
    use chrono::Utc;

    fn raw_with_company(content: &str, company: Option<&str>) -> RawQuestion {
        let mut q = RawQuestion::new(Uuid::new_v4(), content, "test");
        q.company = company.map(str::to_string);
        q
    }

    fn singleton_plan(raw: &[RawQuestion]) -> MergePlan {
        let groups: Vec<SimilarityGroup<Uuid>> =
            raw.iter().map(|q| SimilarityGroup::with_seed(q.id)).collect();
        build_merge_plan(raw, &groups, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_replace_and_query() {
        let raw = vec![
            raw_with_company("Design a parking lot", Some("Amazon")),
            raw_with_company("Estimate taxis in NYC", Some("Uber")),
        ];
        let store = InMemoryQuestionStore::new(raw.clone());
        let plan = singleton_plan(&raw);

        store.replace_merged_questions(&plan).await.unwrap();

        let merged = store.fetch_merged_questions().await.unwrap();
        assert_eq!(merged.len(), 2);
        let mapping = store.fetch_mapping_for_raw(raw[1].id).await.unwrap().unwrap();
        let companies = store
            .fetch_companies_for_merged(mapping.merged_question_id)
            .await
            .unwrap();
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].name, "Uber");
        assert_eq!(
            store
                .fetch_mappings_for_merged(mapping.merged_question_id)
                .await
                .unwrap(),
            vec![mapping]
        );
    }

    #[tokio::test]
    async fn test_companies_survive_rebuilds() {
        let raw = vec![raw_with_company("Design a parking lot", Some("Amazon"))];
        let store = InMemoryQuestionStore::new(raw.clone());

        store.replace_merged_questions(&singleton_plan(&raw)).await.unwrap();
        let first_id = store.companies().await[0].id;

        store.replace_merged_questions(&singleton_plan(&raw)).await.unwrap();
        let companies = store.companies().await;
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].id, first_id);
        assert_eq!(store.fetch_merged_questions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_tables() {
        let raw = vec![raw_with_company("Design a parking lot", Some("Amazon"))];
        let store = InMemoryQuestionStore::new(raw.clone());
        let first = singleton_plan(&raw);
        store.replace_merged_questions(&first).await.unwrap();

        store.fail_next_replace();
        assert!(store.replace_merged_questions(&singleton_plan(&raw)).await.is_err());

        let merged = store.fetch_merged_questions().await.unwrap();
        assert_eq!(merged, vec![first.merges[0].merged.clone()]);
        assert_eq!(store.replace_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_raw_id_is_rejected() {
        let raw = vec![raw_with_company("a", None)];
        let store = InMemoryQuestionStore::new(Vec::new());
        assert!(store.replace_merged_questions(&singleton_plan(&raw)).await.is_err());
        assert_eq!(store.mapping_count().await, 0);
    }
}
