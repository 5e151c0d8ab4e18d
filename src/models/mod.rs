pub mod question;
pub mod stats_models;

pub use question::{Company, MergedQuestion, QuestionMapping, RawQuestion};
pub use stats_models::{MergeOverview, MergeStats};
