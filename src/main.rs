// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::env;
use std::time::Instant;

use dedupe_lib::embedding::OpenAiEmbedder;
use dedupe_lib::merging::{run_merge_rebuild, InMemoryQuestionStore, PgQuestionStore, QuestionStore};
use dedupe_lib::utils::db_connect::{connect, get_pool_status};
use dedupe_lib::utils::env::load_env;
use dedupe_lib::utils::merge_config::{
    EmbeddingConfig, MergeConfig, GROUPING_STRATEGY_VAR, SIMILARITY_THRESHOLD_VAR,
};
use dedupe_lib::utils::preview;
use dedupe_lib::utils::progress_config::ProgressConfig;

#[derive(Parser)]
#[command(author, version, about = "Rebuild merged interview questions from raw questions", long_about = None)]
struct DedupeArgs {
    /// Minimum cosine similarity to a group's seed, in (0, 1]. Overrides MERGE_SIMILARITY_THRESHOLD
    #[arg(long)]
    threshold: Option<f64>,

    /// Grouping algorithm: star or transitive. Overrides MERGE_GROUPING_STRATEGY
    #[arg(long)]
    strategy: Option<String>,

    /// Compute the rebuild without touching the merge tables
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting interview question merge rebuild");
    load_env();

    let args = DedupeArgs::parse();
    let start = Instant::now();

    let merge_config = MergeConfig::from_lookup(|key| {
        let flag = match key {
            SIMILARITY_THRESHOLD_VAR => args.threshold.map(|t| t.to_string()),
            GROUPING_STRATEGY_VAR => args.strategy.clone(),
            _ => None,
        };
        flag.or_else(|| env::var(key).ok())
    })
    .context("Invalid merge configuration")?;
    merge_config.log_config();

    let embedding_config = EmbeddingConfig::from_env().context("Invalid embedding configuration")?;
    embedding_config.log_config();
    let embedder = OpenAiEmbedder::new(&embedding_config)?;

    let progress_config = ProgressConfig::from_env();
    info!("Progress tracking: enabled={}", progress_config.enabled);
    let multi_progress = progress_config.create_multi_progress();

    let pool = connect().await.context("Failed to connect to database")?;
    info!("Successfully connected to the database");
    let pg_store = PgQuestionStore::new(pool.clone());

    let stats = if args.dry_run {
        info!("Dry run: merge tables will not be modified");
        let raw_questions = pg_store.fetch_all_raw_questions().await?;
        let dry_store = InMemoryQuestionStore::new(raw_questions);
        let stats = run_merge_rebuild(&dry_store, &embedder, &merge_config, multi_progress.as_ref())
            .await
            .context("Dry-run merge rebuild failed")?;

        let merged = dry_store.fetch_merged_questions().await?;
        info!("Largest groups in this dry run:");
        for question in merged.iter().filter(|q| q.frequency > 1).take(10) {
            info!("  x{} {}", question.frequency, preview(&question.canonical_content, 80));
        }
        stats
    } else {
        run_merge_rebuild(&pg_store, &embedder, &merge_config, multi_progress.as_ref())
            .await
            .context("Merge rebuild failed")?
    };

    info!("=== Merge Rebuild Complete ===");
    info!("Raw questions: {}", stats.total_raw);
    info!(
        "Merged questions: {} ({} with duplicates)",
        stats.total_groups, stats.duplicate_groups
    );
    info!("Mappings: {}, company links: {}", stats.total_mappings, stats.companies_linked);
    info!("Total time: {:.2?}", start.elapsed());

    let (connections, idle) = get_pool_status(&pool);
    info!(
        "Final DB Connection Pool Status: Total: {}, Idle: {}",
        connections, idle
    );

    Ok(())
}
