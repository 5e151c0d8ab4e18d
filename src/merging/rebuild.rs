// src/merging/rebuild.rs

use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::MultiProgress;
use log::info;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::plan::build_merge_plan;
use super::store::QuestionStore;
use crate::clustering::group_embeddings;
use crate::embedding::{embed_texts, Embedder};
use crate::models::MergeStats;
use crate::utils::merge_config::MergeConfig;
use crate::utils::progress_config::{add_progress_bar, add_spinner};

/// Runs one full merge rebuild: fetch, embed, group, plan, validate, then replace.
///
/// Nothing is written until every earlier step has succeeded, and the write itself is
/// atomic, so a failed run leaves the previous merge tables in place. An empty raw set
/// still replaces the tables, clearing any stale merges.
pub async fn run_merge_rebuild<S, E>(
    store: &S,
    embedder: &E,
    config: &MergeConfig,
    multi_progress: Option<&MultiProgress>,
) -> Result<MergeStats>
where
    S: QuestionStore,
    E: Embedder,
{
    let mut phase_times: Vec<(&str, Duration)> = Vec::new();
    let main_pb = add_progress_bar(multi_progress, 5, "Fetching raw questions...");

    // Phase 1: fetch
    let phase_start = Instant::now();
    let raw_questions = store
        .fetch_all_raw_questions()
        .await
        .context("Failed to fetch raw questions")?;
    info!("Fetched {} raw questions", raw_questions.len());
    phase_times.push(("Fetch_Raw_Questions", phase_start.elapsed()));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message("Generating embeddings...");
    }

    // Phase 2: embed
    let phase_start = Instant::now();
    let texts: Vec<String> = raw_questions.iter().map(|q| q.embed_text().to_string()).collect();
    let embed_pb = add_progress_bar(multi_progress, texts.len() as u64, "Embedding questions");
    let embeddings = embed_texts(embedder, &texts, embed_pb.as_ref())
        .await
        .context("Embedding pass failed; merge tables left unchanged")?;
    if let Some(pb) = &embed_pb {
        pb.finish_and_clear();
    }
    phase_times.push(("Generate_Embeddings", phase_start.elapsed()));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message("Grouping similar questions...");
    }

    // Phase 3: group
    let phase_start = Instant::now();
    let group_spinner = add_spinner(
        multi_progress,
        &format!(
            "Grouping {} questions ({} strategy)",
            raw_questions.len(),
            config.grouping_strategy
        ),
    );
    let items: Vec<(Uuid, Vec<f32>)> = raw_questions
        .iter()
        .map(|q| q.id)
        .zip(embeddings)
        .collect();
    let groups = group_embeddings(&items, config.similarity_threshold, config.grouping_strategy)
        .context("Failed to group questions")?;
    if let Some(pb) = &group_spinner {
        pb.finish_and_clear();
    }
    phase_times.push(("Group_Questions", phase_start.elapsed()));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message("Building merge plan...");
    }

    // Phase 4: plan and validate
    let phase_start = Instant::now();
    let plan = build_merge_plan(&raw_questions, &groups, Utc::now())
        .context("Failed to build merge plan")?;
    let raw_ids: Vec<Uuid> = raw_questions.iter().map(|q| q.id).collect();
    plan.validate(&raw_ids)
        .context("Merge plan failed validation; merge tables left unchanged")?;
    phase_times.push(("Build_Merge_Plan", phase_start.elapsed()));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.set_message("Replacing merge tables...");
    }

    // Phase 5: persist
    let phase_start = Instant::now();
    store
        .replace_merged_questions(&plan)
        .await
        .context("Failed to replace merge tables")?;
    phase_times.push(("Replace_Merge_Tables", phase_start.elapsed()));
    if let Some(pb) = &main_pb {
        pb.inc(1);
        pb.finish_with_message("Merge rebuild complete");
    }

    let stats = plan.stats(raw_questions.len());

    let total: Duration = phase_times.iter().map(|(_, d)| *d).sum();
    info!("=== Merge Rebuild Phase Timing Summary ===");
    for (phase, duration) in &phase_times {
        info!("  {}: {:.2?}", phase, duration);
    }
    info!("  Total Rebuild Time: {:.2?}", total);
    info!("Merge complete: {}", stats);

    Ok(stats)
}
