// src/utils/merge_config.rs
use anyhow::{anyhow, bail, Context, Result};
use log::info;
use std::env;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::clustering::GroupingStrategy;

pub const SIMILARITY_THRESHOLD_VAR: &str = "MERGE_SIMILARITY_THRESHOLD";
pub const GROUPING_STRATEGY_VAR: &str = "MERGE_GROUPING_STRATEGY";

pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const EMBEDDING_API_URL_VAR: &str = "EMBEDDING_API_URL";
pub const EMBEDDING_MODEL_VAR: &str = "EMBEDDING_MODEL";
pub const EMBEDDING_BATCH_SIZE_VAR: &str = "EMBEDDING_BATCH_SIZE";
pub const EMBEDDING_TIMEOUT_SECS_VAR: &str = "EMBEDDING_TIMEOUT_SECS";
pub const EMBEDDING_MAX_RETRIES_VAR: &str = "EMBEDDING_MAX_RETRIES";

const DEFAULT_EMBEDDING_API_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 100;
/// Upper bound on inputs per request accepted by the OpenAI embeddings endpoint.
pub const MAX_EMBEDDING_BATCH_SIZE: usize = 2048;
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EMBEDDING_MAX_RETRIES: u32 = 2;

/// Settings for grouping raw questions into merged questions.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    /// Minimum cosine similarity to a group's seed for a question to join it.
    pub similarity_threshold: f64,
    pub grouping_strategy: GroupingStrategy,
}

impl MergeConfig {
    pub fn new(similarity_threshold: f64, grouping_strategy: GroupingStrategy) -> Result<Self> {
        Ok(Self {
            similarity_threshold: validate_threshold(similarity_threshold)?,
            grouping_strategy,
        })
    }

    /// The threshold has no default: it must be set explicitly.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_threshold = lookup(SIMILARITY_THRESHOLD_VAR)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "{} is not set; the similarity threshold must be configured explicitly",
                    SIMILARITY_THRESHOLD_VAR
                )
            })?;
        let similarity_threshold = raw_threshold
            .trim()
            .parse::<f64>()
            .with_context(|| format!("Invalid {}: '{}'", SIMILARITY_THRESHOLD_VAR, raw_threshold))?;

        let grouping_strategy = match lookup(GROUPING_STRATEGY_VAR) {
            Some(value) if !value.trim().is_empty() => value
                .parse::<GroupingStrategy>()
                .with_context(|| format!("Invalid {}", GROUPING_STRATEGY_VAR))?,
            _ => GroupingStrategy::default(),
        };

        Self::new(similarity_threshold, grouping_strategy)
    }

    pub fn log_config(&self) {
        info!("🔗 Merge configuration");
        info!("   Similarity threshold: {:.3}", self.similarity_threshold);
        info!("   Grouping strategy: {}", self.grouping_strategy);
    }
}

/// Thresholds must lie in (0, 1]. Zero or below would merge zero-norm embeddings
/// with everything.
pub fn validate_threshold(threshold: f64) -> Result<f64> {
    if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
        bail!(
            "Similarity threshold must be in (0, 1], got {}",
            threshold
        );
    }
    Ok(threshold)
}

/// Settings for the external embedding service.
#[derive(Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub api_url: Url,
    pub model: String,
    pub batch_size: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("api_key", &"[hidden]")
            .field("api_url", &self.api_url.as_str())
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl EmbeddingConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get(OPENAI_API_KEY_VAR)
            .ok_or_else(|| anyhow!("{} is not set; cannot reach the embedding service", OPENAI_API_KEY_VAR))?;

        let raw_url = get(EMBEDDING_API_URL_VAR).unwrap_or_else(|| DEFAULT_EMBEDDING_API_URL.to_string());
        let api_url = Url::parse(raw_url.trim())
            .with_context(|| format!("Invalid {}: '{}'", EMBEDDING_API_URL_VAR, raw_url))?;

        let model = get(EMBEDDING_MODEL_VAR).unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string());

        let batch_size = match get(EMBEDDING_BATCH_SIZE_VAR) {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Invalid {}: '{}'", EMBEDDING_BATCH_SIZE_VAR, v))?,
            None => DEFAULT_EMBEDDING_BATCH_SIZE,
        };
        if batch_size == 0 || batch_size > MAX_EMBEDDING_BATCH_SIZE {
            bail!(
                "{} must be between 1 and {}, got {}",
                EMBEDDING_BATCH_SIZE_VAR,
                MAX_EMBEDDING_BATCH_SIZE,
                batch_size
            );
        }

        let timeout_secs = match get(EMBEDDING_TIMEOUT_SECS_VAR) {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid {}: '{}'", EMBEDDING_TIMEOUT_SECS_VAR, v))?,
            None => DEFAULT_EMBEDDING_TIMEOUT_SECS,
        };
        if timeout_secs == 0 {
            bail!("{} must be greater than zero", EMBEDDING_TIMEOUT_SECS_VAR);
        }

        let max_retries = match get(EMBEDDING_MAX_RETRIES_VAR) {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .with_context(|| format!("Invalid {}: '{}'", EMBEDDING_MAX_RETRIES_VAR, v))?,
            None => DEFAULT_EMBEDDING_MAX_RETRIES,
        };

        Ok(Self {
            api_key,
            api_url,
            model,
            batch_size,
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        })
    }

    pub fn log_config(&self) {
        info!("🧮 Embedding service configuration");
        info!("   Endpoint: {}", self.api_url);
        info!("   Model: {}", self.model);
        info!(
            "   Batch size: {}, timeout: {:?}, max retries: {}",
            self.batch_size, self.timeout, self.max_retries
        );
    }
}
