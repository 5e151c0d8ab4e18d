// src/merging/store.rs

use anyhow::Result;
use std::future::Future;
use uuid::Uuid;

use super::plan::MergePlan;
use crate::models::{Company, MergedQuestion, QuestionMapping, RawQuestion};

/// Persistence for raw questions (read only) and the merge tables (fully replaced per rebuild).
pub trait QuestionStore {
    /// Every raw question, in a stable order.
    fn fetch_all_raw_questions(&self) -> impl Future<Output = Result<Vec<RawQuestion>>> + Send;

    /// Atomically swaps the merged questions, mappings and company links for `plan`.
    ///
    /// Either the whole plan is visible afterwards or, on error, the previous state is.
    /// Companies are matched by exact name and created when missing; they are never deleted.
    fn replace_merged_questions(&self, plan: &MergePlan) -> impl Future<Output = Result<()>> + Send;

    /// Merged questions, most frequent first.
    fn fetch_merged_questions(&self) -> impl Future<Output = Result<Vec<MergedQuestion>>> + Send;

    fn fetch_mappings_for_merged(
        &self,
        merged_id: Uuid,
    ) -> impl Future<Output = Result<Vec<QuestionMapping>>> + Send;

    fn fetch_mapping_for_raw(
        &self,
        raw_id: Uuid,
    ) -> impl Future<Output = Result<Option<QuestionMapping>>> + Send;

    /// Companies linked to a merged question, ordered by name.
    fn fetch_companies_for_merged(
        &self,
        merged_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Company>>> + Send;
}
