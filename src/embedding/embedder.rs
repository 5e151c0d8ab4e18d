// src/embedding/embedder.rs

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use log::{debug, info};
use std::future::Future;

/// A service that turns text into fixed-dimension vectors.
pub trait Embedder {
    /// Largest number of texts accepted by one `embed_batch` call.
    fn max_batch_size(&self) -> usize;

    /// Embeds one batch. Must return exactly one vector per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;
}

/// Embeds `texts` in batches of at most `embedder.max_batch_size()`, one batch after another.
///
/// The result has one entry per input, in input order. Blank texts are not sent and get
/// an empty vector. Any failed or malformed batch fails the whole call.
pub async fn embed_texts<E: Embedder>(
    embedder: &E,
    texts: &[String],
    progress: Option<&ProgressBar>,
) -> Result<Vec<Vec<f32>>> {
    let mut embeddings: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];

    let pending: Vec<usize> = texts
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(idx, _)| idx)
        .collect();

    let skipped = texts.len() - pending.len();
    if skipped > 0 {
        info!("Skipping {} blank texts; they will not be embedded", skipped);
        if let Some(pb) = progress {
            pb.inc(skipped as u64);
        }
    }
    if pending.is_empty() {
        return Ok(embeddings);
    }

    let batch_size = embedder.max_batch_size().max(1);
    let total_batches = pending.len().div_ceil(batch_size);
    let mut dimension: Option<usize> = None;

    for (batch_no, chunk) in pending.chunks(batch_size).enumerate() {
        let batch: Vec<String> = chunk.iter().map(|&idx| texts[idx].clone()).collect();
        debug!(
            "Embedding batch {}/{} ({} texts)",
            batch_no + 1,
            total_batches,
            batch.len()
        );

        let vectors = embedder
            .embed_batch(&batch)
            .await
            .with_context(|| format!("Embedding batch {}/{} failed", batch_no + 1, total_batches))?;

        if vectors.len() != batch.len() {
            bail!(
                "Embedding batch {}/{} returned {} vectors for {} texts",
                batch_no + 1,
                total_batches,
                vectors.len(),
                batch.len()
            );
        }

        for (&idx, vector) in chunk.iter().zip(vectors) {
            let expected = *dimension.get_or_insert(vector.len());
            if vector.is_empty() || vector.len() != expected {
                bail!(
                    "Embedding for text {} has dimension {}, expected {}",
                    idx,
                    vector.len(),
                    expected
                );
            }
            embeddings[idx] = vector;
        }

        if let Some(pb) = progress {
            pb.inc(chunk.len() as u64);
        }
    }

    info!(
        "Embedded {} texts in {} batches (dimension {})",
        pending.len(),
        total_batches,
        dimension.unwrap_or(0)
    );

    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Maps each text to a vector derived from its length, and records the batch sizes it saw.
    struct RecordingEmbedder {
        batch_size: usize,
        calls: Mutex<Vec<usize>>,
    }

    impl RecordingEmbedder {
        fn new(batch_size: usize) -> Self {
            Self {
                batch_size,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Embedder for RecordingEmbedder {
        fn max_batch_size(&self) -> usize {
            self.batch_size
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    /// Returns whatever vectors it was built with, regardless of input.
    struct FixedEmbedder(Vec<Vec<f32>>);

    impl Embedder for FixedEmbedder {
        fn max_batch_size(&self) -> usize {
            100
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn max_batch_size(&self) -> usize {
            2
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("service unavailable")
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let embedder = RecordingEmbedder::new(2);
        let texts = strings(&["a", "bb", "ccc", "dddd", "eeeee"]);

        let vectors = embed_texts(&embedder, &texts, None).await.unwrap();

        assert_eq!(*embedder.calls.lock().unwrap(), vec![2, 2, 1]);
        let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(firsts, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_blank_texts_are_not_sent() {
        let embedder = RecordingEmbedder::new(10);
        let texts = strings(&["what is a KPI", "  ", "", "define churn"]);

        let vectors = embed_texts(&embedder, &texts, None).await.unwrap();

        assert_eq!(*embedder.calls.lock().unwrap(), vec![2]);
        assert_eq!(vectors.len(), 4);
        assert!(vectors[1].is_empty() && vectors[2].is_empty());
        assert_eq!(vectors[3][0], 12.0);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let embedder = RecordingEmbedder::new(10);
        assert!(embed_texts(&embedder, &[], None).await.unwrap().is_empty());
        assert!(embedder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_vector_count_is_an_error() {
        let embedder = FixedEmbedder(vec![vec![1.0, 0.0]]);
        let result = embed_texts(&embedder, &strings(&["one", "two"]), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mixed_dimensions_are_an_error() {
        let embedder = FixedEmbedder(vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]]);
        let result = embed_texts(&embedder, &strings(&["one", "two"]), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_batch_failure_fails_the_pass() {
        let err = embed_texts(&FailingEmbedder, &strings(&["a", "b", "c"]), None)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("service unavailable"));
    }

    #[tokio::test]
    async fn test_progress_counts_every_text() {
        let embedder = RecordingEmbedder::new(2);
        let pb = ProgressBar::hidden();
        embed_texts(&embedder, &strings(&["a", "", "c"]), Some(&pb))
            .await
            .unwrap();
        assert_eq!(pb.position(), 3);
    }
}
