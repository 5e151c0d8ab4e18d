// src/bin/merge_stats.rs
use anyhow::{Context, Result};
use log::info;

use dedupe_lib::merging::PgQuestionStore;
use dedupe_lib::utils::db_connect::connect;
use dedupe_lib::utils::env::load_env;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();

    let pool = connect().await.context("Failed to connect to database")?;
    let store = PgQuestionStore::new(pool);
    let overview = store
        .fetch_merge_overview()
        .await
        .context("Failed to fetch merge overview")?;

    info!("=== Question Merge Overview ===");
    println!("Raw questions:    {}", overview.raw_questions);
    println!("Merged questions: {}", overview.merged_questions);
    if overview.merged_questions > 0 {
        println!(
            "Compression:      {:.2} raw per merged",
            overview.raw_questions as f64 / overview.merged_questions as f64
        );
    }

    println!();
    println!("By source:");
    for (source, count) in &overview.by_source {
        println!("  {:<24} {}", source, count);
    }

    println!();
    println!("By primary type:");
    let mut by_type: Vec<(&String, &i64)> = overview.by_type.iter().collect();
    by_type.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (question_type, count) in by_type {
        println!("  {:<24} {}", question_type, count);
    }

    Ok(())
}
