// src/merging/mod.rs

pub mod canonical;
pub mod db;
pub mod labels;
pub mod memory_store;
pub mod plan;
pub mod rebuild;
pub mod store;

pub use canonical::select_canonical_text;
pub use db::PgQuestionStore;
pub use labels::{aggregate_labels, normalize_label, VALID_QUESTION_TYPES};
pub use memory_store::InMemoryQuestionStore;
pub use plan::{
    build_merge_plan, MergePlan, PlannedMerge, MERGED_SIMILARITY_SENTINEL, SINGLETON_SIMILARITY,
};
pub use rebuild::run_merge_rebuild;
pub use store::QuestionStore;
