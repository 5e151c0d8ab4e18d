// src/merging/labels.rs

use log::debug;
use std::collections::BTreeSet;

use crate::models::RawQuestion;

/// The closed set of labels a merged question may carry.
pub const VALID_QUESTION_TYPES: [&str; 7] = [
    "AI Domain Knowledge",
    "Behavioral",
    "Execution",
    "Metrics and Estimation",
    "Product Design",
    "Product Strategy",
    "Technical",
];

/// Legacy label names and the canonical label they now belong to.
const LEGACY_SYNONYMS: [(&str, &str); 4] = [
    ("Metrics", "Metrics and Estimation"),
    ("Estimation", "Metrics and Estimation"),
    ("AI Domain", "AI Domain Knowledge"),
    ("AI-related", "AI Domain Knowledge"),
];

/// Maps one upstream label onto the canonical vocabulary. Matching is exact after
/// trimming surrounding whitespace.
pub fn normalize_label(label: &str) -> Option<&'static str> {
    let label = label.trim();
    if let Some((_, canonical)) = LEGACY_SYNONYMS.iter().find(|(legacy, _)| *legacy == label) {
        return Some(*canonical);
    }
    VALID_QUESTION_TYPES.iter().copied().find(|valid| *valid == label)
}

/// Unions the labels of every question in `group`, normalized and filtered.
///
/// Each question contributes its `llm_types` and its single `question_type`. Returns the
/// sorted label set and the primary label, which is the first of that set.
pub fn aggregate_labels(group: &[&RawQuestion]) -> (Vec<String>, Option<String>) {
    let mut labels: BTreeSet<&'static str> = BTreeSet::new();

    for question in group {
        let candidates = question
            .llm_types
            .iter()
            .flatten()
            .map(String::as_str)
            .chain(question.question_type.as_deref());

        for candidate in candidates {
            match normalize_label(candidate) {
                Some(label) => {
                    labels.insert(label);
                }
                None => debug!(
                    "Dropping label {:?} on raw question {} (not in vocabulary)",
                    candidate, question.id
                ),
            }
        }
    }

    let labels: Vec<String> = labels.into_iter().map(str::to_string).collect();
    let primary = labels.first().cloned();
    (labels, primary)
}
