//! Ollama embedding client: batching, in-group concurrency, and retry.
//!
//! Texts are partitioned into fixed-size groups; within a group every
//! embedding request is issued concurrently and joined in input order, with
//! a short pause between groups so the local inference server is not
//! saturated. Retry applies to the batch as a whole, with exponential
//! backoff; the final attempt's error is propagated verbatim.

use std::time::Duration;

use crate::config::OllamaConfig;
use crate::error::{Error, Result};

/// Pause between batch groups.
const GROUP_PAUSE: Duration = Duration::from_millis(100);

/// Timeout for model pulls, which can download gigabytes.
const PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Whole-batch retry policy: `max_attempts` tries with delays of
/// `base_delay * multiplier^n`. Kept separate from the transport so the
/// backoff schedule is testable without I/O.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.mul_f64(self.multiplier.powi(attempt as i32))
    }
}

/// Client for a local Ollama instance's embedding API.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size,
            retry: RetryPolicy {
                max_attempts: config.max_retries,
                base_delay: Duration::from_millis(config.retry_delay_ms),
                multiplier: 2.0,
            },
        })
    }

    pub fn host(&self) -> &str {
        &self.base_url
    }

    /// Lightweight preflight: is the service reachable at all?
    pub async fn check_connection(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("connectivity check failed: {}", e);
                false
            }
        }
    }

    /// Model identifiers the service currently serves.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ServiceError {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        let models = json
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }

    /// Whether the configured model (or a tagged variant of it) is pulled.
    pub async fn model_available(&self) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|name| name.contains(&self.model)))
    }

    /// Ask the service to pull the configured model.
    pub async fn pull_model(&self) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(PULL_TIMEOUT)
            .json(&serde_json::json!({ "name": self.model }))
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ServiceError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Embed a single text. Empty or whitespace-only input is rejected
    /// before any request is made.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput(
                "cannot embed empty text".to_string(),
            ));
        }

        let payload = serde_json::json!({
            "model": self.model,
            "prompt": text,
            "options": { "temperature": 0.0, "seed": 42 },
        });

        let resp = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ServiceError {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| Error::ServiceError {
            status: status.as_u16(),
            body: format!("unreadable response body: {}", e),
        })?;

        let vector = parse_embedding(&json).ok_or_else(|| Error::ServiceError {
            status: status.as_u16(),
            body: "response is missing an embedding array".to_string(),
        })?;

        if vector.len() != self.dims {
            return Err(Error::ServiceError {
                status: status.as_u16(),
                body: format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dims
                ),
            });
        }

        Ok(vector)
    }

    /// Embed a batch of texts. Returned vectors match the input order
    /// exactly, including across group boundaries.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for (group_idx, group) in texts.chunks(self.batch_size).enumerate() {
            if group_idx > 0 {
                tokio::time::sleep(GROUP_PAUSE).await;
            }
            let group_vectors =
                futures::future::try_join_all(group.iter().map(|t| self.embed_one(t))).await?;
            vectors.extend(group_vectors);
        }

        Ok(vectors)
    }

    /// Embed a batch with the configured retry policy applied to the batch
    /// as a whole. The last attempt's error is propagated unchanged.
    pub async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.embed_batch(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(e);
                    }
                    let delay = self.retry.delay_for(attempt - 1);
                    tracing::warn!(
                        "embedding batch attempt {} failed: {}; retrying in {:?}",
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Pull the `embedding` array out of an `/api/embeddings` response.
fn parse_embedding(json: &serde_json::Value) -> Option<Vec<f32>> {
    json.get("embedding")?.as_array().map(|arr| {
        arr.iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OllamaConfig;

    #[test]
    fn backoff_doubles_from_base_delay() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    }

    #[test]
    fn default_policy_matches_configuration_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    }

    #[test]
    fn parse_embedding_reads_float_array() {
        let json = serde_json::json!({ "embedding": [0.25, -1.0, 3.5] });
        let v = parse_embedding(&json).unwrap();
        assert_eq!(v, vec![0.25, -1.0, 3.5]);
    }

    #[test]
    fn parse_embedding_rejects_missing_field() {
        let json = serde_json::json!({ "error": "model not found" });
        assert!(parse_embedding(&json).is_none());
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_io() {
        // Host is never contacted: validation happens first.
        let client = OllamaClient::new(&OllamaConfig::default()).unwrap();
        let err = client.embed_one("   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let client = OllamaClient::new(&OllamaConfig::default()).unwrap();
        let vectors = client.embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[test]
    fn trailing_slash_is_stripped_from_host() {
        let config = OllamaConfig {
            host: "http://localhost:11434/".to_string(),
            ..OllamaConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.host(), "http://localhost:11434");
    }
}
