// src/embedding/openai.rs

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::Embedder;
use crate::utils::merge_config::EmbeddingConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Outcome of a single failed request.
enum AttemptError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    api_url: Url,
    api_key: String,
    model: String,
    batch_size: usize,
    max_retries: u32,
    base_backoff: Duration,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(config.timeout))
            .build()
            .context("Failed to build HTTP client for the embedding service")?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            base_backoff: BASE_BACKOFF,
        })
    }

    /// Overrides the first retry delay. Later retries double it.
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    async fn request_once(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, AttemptError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(self.api_url.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(anyhow!(e).context("Embedding request failed")))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            AttemptError::Retryable(anyhow!(e).context("Failed to read embedding response body"))
        })?;

        if !status.is_success() {
            let err = anyhow!(
                "Embedding service returned {}: {}",
                status,
                crate::utils::preview(&text, 200)
            );
            return Err(if is_retryable_status(status) {
                AttemptError::Retryable(err)
            } else {
                AttemptError::Fatal(err)
            });
        }

        parse_embedding_response(&text, texts.len()).map_err(AttemptError::Fatal)
    }
}

impl Embedder for OpenAiEmbedder {
    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;
        loop {
            match self.request_once(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) => {
                    if attempt >= self.max_retries {
                        return Err(e.context(format!(
                            "Giving up after {} attempts",
                            attempt + 1
                        )));
                    }
                    let delay = backoff_delay(self.base_backoff, attempt);
                    warn!(
                        "Embedding attempt {} failed ({:#}); retrying in {:?}",
                        attempt + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

/// Parses an embeddings response body, ordering vectors by their `index` field.
fn parse_embedding_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let mut response: EmbeddingResponse =
        serde_json::from_str(body).context("Malformed embedding response")?;

    if response.data.len() != expected {
        bail!(
            "Embedding response has {} entries for {} inputs",
            response.data.len(),
            expected
        );
    }

    response.data.sort_by_key(|d| d.index);
    for (position, datum) in response.data.iter().enumerate() {
        if datum.index != position {
            bail!(
                "Embedding response indices are not 0..{} (found {} at position {})",
                expected,
                datum.index,
                position
            );
        }
    }

    debug!("Parsed {} embeddings", response.data.len());
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_parse_reorders_by_index() {
        let body = r#"{
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ],
            "model": "text-embedding-3-small"
        }"#;

        let vectors = parse_embedding_response(body, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_rejects_bad_responses() {
        assert!(parse_embedding_response("not json", 1).is_err());
        assert!(parse_embedding_response(r#"{"data": []}"#, 1).is_err());
        let duplicated = r#"{"data": [
            {"index": 0, "embedding": [1.0]},
            {"index": 0, "embedding": [1.0]}
        ]}"#;
        assert!(parse_embedding_response(duplicated, 2).is_err());
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 20), MAX_BACKOFF);
    }

    /// Reads one HTTP request (headers plus Content-Length body) from `stream`.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serves `responses` in order, one per connection, and counts the requests.
    async fn spawn_server(responses: Vec<(u16, String)>) -> (Url, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = hits.clone();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                let request = read_request(&mut stream).await;
                assert!(request
                    .to_ascii_lowercase()
                    .contains("authorization: bearer sk-test"));
                server_hits.fetch_add(1, Ordering::SeqCst);
                let reply = format!(
                    "HTTP/1.1 {} Test\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(reply.as_bytes()).await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        let url = Url::parse(&format!("http://{}/v1/embeddings", addr)).unwrap();
        (url, hits)
    }

    fn test_embedder(api_url: Url, max_retries: u32) -> OpenAiEmbedder {
        let config = EmbeddingConfig {
            api_key: "sk-test".to_string(),
            api_url,
            model: "text-embedding-3-small".to_string(),
            batch_size: 10,
            timeout: Duration::from_secs(5),
            max_retries,
        };
        OpenAiEmbedder::new(&config)
            .unwrap()
            .with_base_backoff(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let ok_body = r#"{"data": [{"index": 0, "embedding": [0.6, 0.8]}]}"#.to_string();
        let (url, hits) = spawn_server(vec![
            (503, r#"{"error": "overloaded"}"#.to_string()),
            (429, r#"{"error": "slow down"}"#.to_string()),
            (200, ok_body),
        ])
        .await;

        let embedder = test_embedder(url, 2);
        let vectors = embedder
            .embed_batch(&["How would you measure success?".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors, vec![vec![0.6, 0.8]]);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_fail_immediately() {
        let (url, hits) = spawn_server(vec![(400, r#"{"error": "bad input"}"#.to_string())]).await;

        let embedder = test_embedder(url, 3);
        let err = embedder
            .embed_batch(&["text".to_string()])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("400"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (url, hits) = spawn_server(vec![
            (500, "{}".to_string()),
            (500, "{}".to_string()),
        ])
        .await;

        let embedder = test_embedder(url, 1);
        assert!(embedder.embed_batch(&["text".to_string()]).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
