// src/merging/canonical.rs

use crate::models::RawQuestion;

/// Picks the representative text for a group.
///
/// Each question offers its English text when present, otherwise its raw content.
/// The longest offer by character count wins, and the earliest one wins a tie.
/// Returns None only for an empty group.
pub fn select_canonical_text<'a>(group: &[&'a RawQuestion]) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for question in group {
        let text = question.embed_text();
        let len = text.chars().count();
        match best {
            Some((_, best_len)) if best_len >= len => {}
            _ => best = Some((text, len)),
        }
    }
    best.map(|(text, _)| text)
}
