// src/clustering/star_grouping.rs

use anyhow::{Context, Result};
use log::{debug, info};
use std::fmt::Debug;

use super::{meets_threshold, SimilarityGroup};
use crate::utils::candle::SimilarityIndex;

/// Groups `items` around seeds, in input order.
///
/// The first unassigned item opens a group. Every later unassigned item whose cosine
/// similarity to that seed is at least `threshold` joins it. Membership only depends on
/// the seed, so two members of one group need not be similar to each other.
/// Reordering the input can change the result.
pub fn group_by_seed_similarity<I: Clone + Debug>(
    items: &[(I, Vec<f32>)],
    threshold: f64,
) -> Result<Vec<SimilarityGroup<I>>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();
    let index = SimilarityIndex::new(&rows).context("Failed to build similarity index")?;

    let mut assigned = vec![false; items.len()];
    let mut groups = Vec::new();

    for seed_idx in 0..items.len() {
        if assigned[seed_idx] {
            continue;
        }
        assigned[seed_idx] = true;
        let mut group = SimilarityGroup::with_seed(items[seed_idx].0.clone());

        if assigned[seed_idx + 1..].iter().any(|done| !done) {
            let similarities = index
                .similarities_to(seed_idx)
                .with_context(|| format!("Failed to score seed {:?}", items[seed_idx].0))?;

            for candidate_idx in (seed_idx + 1)..items.len() {
                if assigned[candidate_idx] {
                    continue;
                }
                let similarity = similarities[candidate_idx];
                if meets_threshold(similarity, threshold) {
                    debug!(
                        "Grouping {:?} with seed {:?} (similarity {:.4})",
                        items[candidate_idx].0, items[seed_idx].0, similarity
                    );
                    assigned[candidate_idx] = true;
                    group.push(items[candidate_idx].0.clone(), similarity);
                }
            }
        }

        groups.push(group);
    }

    let duplicates = groups.iter().filter(|g| !g.is_singleton()).count();
    info!(
        "Seed grouping: {} items -> {} groups ({} with duplicates) at threshold {:.3}",
        items.len(),
        groups.len(),
        duplicates,
        threshold
    );

    Ok(groups)
}
