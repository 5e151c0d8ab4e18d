// src/clustering/transitive_grouping.rs

use anyhow::{Context, Result};
use log::{debug, info};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::Dfs;
use std::fmt::Debug;

use super::{meets_threshold, SimilarityGroup};
use crate::utils::candle::SimilarityIndex;

/// Groups `items` by single linkage: any chain of pairs at or above `threshold`
/// puts its ends in the same group.
///
/// Groups come out ordered by their earliest member. Members keep input order, and the
/// earliest member acts as the seed for `seed_similarity`. The result does not depend
/// on input order beyond that labelling.
pub fn group_by_connected_components<I: Clone + Debug>(
    items: &[(I, Vec<f32>)],
    threshold: f64,
) -> Result<Vec<SimilarityGroup<I>>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<&[f32]> = items.iter().map(|(_, v)| v.as_slice()).collect();
    let index = SimilarityIndex::new(&rows).context("Failed to build similarity index")?;

    let mut graph: UnGraph<usize, f64> = UnGraph::with_capacity(items.len(), items.len());
    let nodes: Vec<NodeIndex> = (0..items.len()).map(|i| graph.add_node(i)).collect();

    for i in 0..items.len() {
        let similarities = index
            .similarities_to(i)
            .with_context(|| format!("Failed to score item {:?}", items[i].0))?;
        for j in (i + 1)..items.len() {
            if meets_threshold(similarities[j], threshold) {
                graph.add_edge(nodes[i], nodes[j], similarities[j]);
            }
        }
    }
    debug!(
        "Similarity graph: {} nodes, {} edges at threshold {:.3}",
        graph.node_count(),
        graph.edge_count(),
        threshold
    );

    let mut visited = vec![false; items.len()];
    let mut groups = Vec::new();

    for start in 0..items.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut dfs = Dfs::new(&graph, nodes[start]);
        while let Some(node) = dfs.next(&graph) {
            let idx = graph[node];
            visited[idx] = true;
            component.push(idx);
        }
        component.sort_unstable();

        // `start` is the smallest unvisited index, so it leads the sorted component.
        let mut group = SimilarityGroup::with_seed(items[start].0.clone());
        if component.len() > 1 {
            let seed_row = index
                .similarities_to(start)
                .with_context(|| format!("Failed to score seed {:?}", items[start].0))?;
            for &member in &component[1..] {
                group.push(items[member].0.clone(), seed_row[member]);
            }
        }
        groups.push(group);
    }

    let duplicates = groups.iter().filter(|g| !g.is_singleton()).count();
    info!(
        "Transitive grouping: {} items -> {} groups ({} with duplicates) at threshold {:.3}",
        items.len(),
        groups.len(),
        duplicates,
        threshold
    );

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn group_ids<I: Clone>(groups: &[SimilarityGroup<I>]) -> Vec<Vec<I>> {
        groups.iter().map(|g| g.ids().cloned().collect()).collect()
    }

    #[test]
    fn test_chains_are_joined() {
        // Each neighbour is at 0.8; the ends are at 0.28.
        let items = vec![
            ("left", vec![0.8f32, -0.6]),
            ("right", vec![0.8, 0.6]),
            ("middle", vec![1.0, 0.0]),
            ("far", vec![-1.0, 0.0]),
        ];

        let groups = group_by_connected_components(&items, 0.75).unwrap();
        assert_eq!(
            group_ids(&groups),
            vec![vec!["left", "right", "middle"], vec!["far"]]
        );
        assert!((groups[0].members()[2].seed_similarity - 0.8).abs() < 1e-4);
        assert!(groups[0].members()[1].seed_similarity < 0.75);
    }

    #[test]
    fn test_edges_at_exact_threshold_link() {
        // Neighbouring pairs have cosine exactly 0.8; the ends are at 0.28.
        let items = vec![
            ("low", vec![4.0f32, -3.0]),
            ("mid", vec![1.0, 0.0]),
            ("high", vec![4.0, 3.0]),
            ("copy", vec![4.0, 3.0]),
        ];

        let groups = group_by_connected_components(&items, 0.8).unwrap();
        assert_eq!(group_ids(&groups), vec![vec!["low", "mid", "high", "copy"]]);

        let groups = group_by_connected_components(&items, 1.0).unwrap();
        assert_eq!(
            group_ids(&groups),
            vec![vec!["low"], vec!["mid"], vec!["high", "copy"]]
        );
    }

    #[test]
    fn test_zero_vectors_are_isolated() {
        let items = vec![(0, vec![0.0f32, 0.0]), (1, vec![0.0, 0.0]), (2, vec![1.0, 1.0])];
        let groups = group_by_connected_components(&items, 0.1).unwrap();
        assert_eq!(group_ids(&groups), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn test_raising_threshold_only_splits_groups() {
        for seed in 0..5u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let items: Vec<(usize, Vec<f32>)> = (0..40)
                .map(|i| (i, (0..4).map(|_| rng.gen_range(-1.0f32..1.0)).collect()))
                .collect();

            let loose = group_by_connected_components(&items, 0.7).unwrap();
            let strict = group_by_connected_components(&items, 0.9).unwrap();

            let mut loose_group_of = vec![0usize; items.len()];
            for (g_idx, group) in loose.iter().enumerate() {
                for id in group.ids() {
                    loose_group_of[*id] = g_idx;
                }
            }
            for group in &strict {
                let first = loose_group_of[*group.seed()];
                assert!(group.ids().all(|id| loose_group_of[*id] == first));
            }
            assert!(strict.len() >= loose.len());
        }
    }
}
