// src/models/stats_models.rs

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Counters produced by one merge rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub total_raw: usize,
    pub total_groups: usize,
    /// Groups holding more than one raw question.
    pub duplicate_groups: usize,
    pub total_mappings: usize,
    pub companies_linked: usize,
}

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "raw={}, merged={} ({} with duplicates, {} unique), mappings={}, company links={}",
            self.total_raw,
            self.total_groups,
            self.duplicate_groups,
            self.total_groups - self.duplicate_groups,
            self.total_mappings,
            self.companies_linked
        )
    }
}

/// Database-wide report over raw and merged questions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOverview {
    pub raw_questions: i64,
    pub merged_questions: i64,
    pub by_source: BTreeMap<String, i64>,
    /// Merged question counts keyed by primary label.
    pub by_type: BTreeMap<String, i64>,
}
