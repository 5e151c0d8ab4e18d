// src/clustering/mod.rs

pub mod star_grouping;
pub mod transitive_grouping;

use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;

pub use star_grouping::group_by_seed_similarity;
pub use transitive_grouping::group_by_connected_components;

/// Slack for f64 summation error in a cosine score. Far below the rounding already
/// present in f32 embeddings, so it never admits a pair whose exact cosine is short.
const SIMILARITY_TOLERANCE: f64 = 1e-10;

/// Inclusive threshold test on a cosine score.
pub(crate) fn meets_threshold(similarity: f64, threshold: f64) -> bool {
    similarity + SIMILARITY_TOLERANCE >= threshold
}

/// Which grouping algorithm a rebuild uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingStrategy {
    /// Seed-anchored, order-dependent and non-transitive.
    #[default]
    Star,
    /// Connected components over every pair at or above the threshold.
    Transitive,
}

impl GroupingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupingStrategy::Star => "star",
            GroupingStrategy::Transitive => "transitive",
        }
    }
}

impl fmt::Display for GroupingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupingStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "star" => Ok(GroupingStrategy::Star),
            "transitive" => Ok(GroupingStrategy::Transitive),
            other => bail!(
                "Unknown grouping strategy '{}' (expected 'star' or 'transitive')",
                other
            ),
        }
    }
}

/// One member of a similarity group together with its cosine similarity to the group's seed.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMember<I> {
    pub id: I,
    pub seed_similarity: f64,
}

/// A non-empty group of ids. The first member is the seed.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityGroup<I> {
    members: Vec<GroupMember<I>>,
}

impl<I> SimilarityGroup<I> {
    pub(crate) fn with_seed(seed: I) -> Self {
        Self {
            members: vec![GroupMember {
                id: seed,
                seed_similarity: 1.0,
            }],
        }
    }

    pub(crate) fn push(&mut self, id: I, seed_similarity: f64) {
        self.members.push(GroupMember { id, seed_similarity });
    }

    pub fn seed(&self) -> &I {
        &self.members[0].id
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; groups are created with their seed.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    pub fn members(&self) -> &[GroupMember<I>] {
        &self.members
    }

    pub fn ids(&self) -> impl Iterator<Item = &I> + '_ {
        self.members.iter().map(|m| &m.id)
    }

    /// Lowest similarity of any member to the seed.
    pub fn min_seed_similarity(&self) -> f64 {
        self.members
            .iter()
            .map(|m| m.seed_similarity)
            .fold(1.0, f64::min)
    }
}

/// Partitions `items` into groups using `strategy`.
pub fn group_embeddings<I: Clone + fmt::Debug>(
    items: &[(I, Vec<f32>)],
    threshold: f64,
    strategy: GroupingStrategy,
) -> Result<Vec<SimilarityGroup<I>>> {
    match strategy {
        GroupingStrategy::Star => group_by_seed_similarity(items, threshold),
        GroupingStrategy::Transitive => group_by_connected_components(items, threshold),
    }
}
