//! Error taxonomy for storage and retrieval.
//!
//! Every public operation in this crate (and the store backends in the
//! app crate) returns [`StoreError`]. Callers distinguish "no data"
//! ([`StoreError::NotFound`]) from failure, and fatal configuration
//! problems from exhausted embedding retries.

use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Invalid configuration or an unusable persistence directory. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Neither a local model path nor a remote model could be resolved
    /// when the embedding provider was constructed.
    #[error("embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Embedding failed after `attempts` tries.
    #[error("embedding failed after {attempts} attempt(s): {message}")]
    EmbeddingFailed { attempts: u32, message: String },

    /// No chunks exist for the requested application.
    #[error("no analysis found for app_id: {0}")]
    NotFound(String),

    /// The overall deadline elapsed before the operation finished.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A record failed validation at the storage boundary.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Backend fault (SQLite, IO, serialization).
    #[error("storage error: {source}")]
    Storage {
        #[from]
        source: anyhow::Error,
    },
}

impl StoreError {
    /// Wrap any backend error as [`StoreError::Storage`].
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage { source: err.into() }
    }

    /// A single failed embedding attempt, before retries are counted.
    pub fn transient_embedding<S: Into<String>>(message: S) -> Self {
        Self::EmbeddingFailed {
            attempts: 1,
            message: message.into(),
        }
    }

    /// True for failures that leave no doubt about "data absent" semantics.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for errors that must never be retried by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::EmbeddingUnavailable(_) | Self::DimensionMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::storage(err)
    }
}
