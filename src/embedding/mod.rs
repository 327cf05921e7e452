//! Embedding backends and provider selection.
//!
//! Implementations of [`EmbeddingProvider`]:
//! - **[`RemoteProvider`]**: calls an OpenAI-compatible `POST {url}/embeddings`
//!   endpoint with batching, retry, and backoff.
//! - **[`LocalProvider`]**: runs an ONNX model from a local directory via
//!   fastembed (feature `local-embeddings-fastembed`).
//! - **[`HashingEmbedder`]**: deterministic, offline, from the core crate.
//!
//! # Provider Selection
//!
//! [`create_provider`] picks the backend once, from configuration:
//!
//! | `provider` | Backend |
//! |------------|---------|
//! | `"auto"` | `LocalProvider` if `model_path` exists, else `RemoteProvider` if `model_name` is set |
//! | `"local"` | `LocalProvider` from `model_path` |
//! | `"remote"` | `RemoteProvider` for `model_name` |
//! | `"hashing"` | [`HashingEmbedder`] with `dims` (default 384) |
//!
//! A backend that cannot be reached at construction is
//! [`StoreError::EmbeddingUnavailable`]; this is never retried.
//!
//! # Retry Strategy
//!
//! The remote provider retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: `backoff_ms`, then doubling, capped at `backoff_ms × 2^5`

#[cfg(feature = "local-embeddings-fastembed")]
mod local_fastembed;

#[cfg(feature = "local-embeddings-fastembed")]
pub use local_fastembed::LocalProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use quality_store_core::embedding::{check_vectors, EmbeddingProvider, HashingEmbedder};
use quality_store_core::{Result, StoreError};

use crate::config::EmbeddingConfig;

pub const DEFAULT_REMOTE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_HASHING_DIMS: usize = 384;

/// Create the [`EmbeddingProvider`] described by `config`.
pub async fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "hashing" => Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASHING_DIMS),
        )),
        "local" => load_local(config).await?,
        "remote" => Arc::new(RemoteProvider::connect(config).await?),
        "auto" => {
            let local_path = config.model_path.as_ref().filter(|p| p.exists());
            if local_path.is_some() {
                load_local(config).await?
            } else if config.model_name.is_some() {
                Arc::new(RemoteProvider::connect(config).await?)
            } else {
                return Err(StoreError::EmbeddingUnavailable(match &config.model_path {
                    Some(p) => format!(
                        "model path {} does not exist and no remote model_name is configured",
                        p.display()
                    ),
                    None => "neither embedding.model_path nor embedding.model_name is configured"
                        .to_string(),
                }));
            }
        }
        other => {
            return Err(StoreError::Configuration(format!(
                "unknown embedding provider: '{}'",
                other
            )))
        }
    };

    info!(
        model = provider.model_name(),
        dims = provider.dims(),
        "embedding provider ready"
    );
    Ok(provider)
}

#[cfg(feature = "local-embeddings-fastembed")]
async fn load_local(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let path = config.model_path.as_ref().ok_or_else(|| {
        StoreError::EmbeddingUnavailable("embedding.model_path is not set".to_string())
    })?;
    Ok(Arc::new(LocalProvider::load(path, config.batch_size).await?))
}

#[cfg(not(feature = "local-embeddings-fastembed"))]
async fn load_local(_config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    Err(StoreError::EmbeddingUnavailable(
        "local embedding models require --features local-embeddings-fastembed".to_string(),
    ))
}

/// Backoff before retry `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << (attempt.saturating_sub(1)).min(5))
}

/// Outcome of one HTTP round trip.
#[derive(Debug)]
enum AttemptError {
    Transient(String),
    Permanent(String),
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding provider for OpenAI-compatible HTTP APIs.
///
/// The API key is read from `QSTORE_EMBEDDING_API_KEY`, falling back to
/// `OPENAI_API_KEY`; it is optional so that self-hosted endpoints work
/// without one.
pub struct RemoteProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    api_key: Option<String>,
    batch_size: usize,
    max_retries: u32,
    backoff: Duration,
}

impl RemoteProvider {
    /// Build the provider and send one probe request.
    ///
    /// The probe is not retried. If it fails the model is considered
    /// unreachable. When `dims` is not configured it is taken from the
    /// probe response.
    pub async fn connect(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model_name.clone().ok_or_else(|| {
            StoreError::EmbeddingUnavailable("embedding.model_name is not set".to_string())
        })?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_REMOTE_URL.to_string());
        let api_key = std::env::var("QSTORE_EMBEDDING_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoreError::Configuration(format!("HTTP client: {}", e)))?;

        let mut provider = Self {
            client,
            endpoint: format!("{}/embeddings", base.trim_end_matches('/')),
            model,
            dims: config.dims.unwrap_or(0),
            api_key,
            batch_size: config.batch_size,
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        };

        let probe = provider
            .request_once(&["probe".to_string()])
            .await
            .map_err(|e| {
                let msg = match e {
                    AttemptError::Transient(m) | AttemptError::Permanent(m) => m,
                };
                StoreError::EmbeddingUnavailable(format!(
                    "remote model '{}' at {} is unreachable: {}",
                    provider.model, provider.endpoint, msg
                ))
            })?;

        let probed_dims = probe.first().map(Vec::len).unwrap_or(0);
        if provider.dims == 0 {
            provider.dims = probed_dims;
        }
        if provider.dims == 0 {
            return Err(StoreError::EmbeddingUnavailable(format!(
                "remote model '{}' returned an empty embedding",
                provider.model
            )));
        }
        check_vectors(&probe, 1, provider.dims).map_err(|e| match e {
            mismatch @ StoreError::DimensionMismatch { .. } => mismatch,
            other => StoreError::EmbeddingUnavailable(other.to_string()),
        })?;
        Ok(provider)
    }

    async fn request_once(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, AttemptError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("request failed: {}", e)))?;
        let status = response.status();

        if status.is_success() {
            let parsed: EmbeddingsResponse = response
                .json()
                .await
                .map_err(|e| AttemptError::Transient(format!("invalid response body: {}", e)))?;
            let mut items = parsed.data;
            items.sort_by_key(|item| item.index);
            return Ok(items.into_iter().map(|item| item.embedding).collect());
        }

        let body_text = response.text().await.unwrap_or_default();
        let msg = format!("embedding API error {}: {}", status, body_text);
        if status.as_u16() == 429 || status.is_server_error() {
            Err(AttemptError::Transient(msg))
        } else {
            Err(AttemptError::Permanent(msg))
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.backoff, attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_err,
                    "retrying embedding request"
                );
                tokio::time::sleep(delay).await;
            }

            match self.request_once(texts).await {
                Ok(vectors) => {
                    check_vectors(&vectors, texts.len(), self.dims)?;
                    debug!(count = vectors.len(), attempt, "embedded batch");
                    return Ok(vectors);
                }
                Err(AttemptError::Transient(msg)) => last_err = msg,
                Err(AttemptError::Permanent(msg)) => {
                    return Err(StoreError::EmbeddingFailed {
                        attempts: attempt + 1,
                        message: msg,
                    })
                }
            }
        }

        Err(StoreError::EmbeddingFailed {
            attempts: self.max_retries + 1,
            message: last_err,
        })
    }
}
