//! Configuration parsing and validation.
//!
//! Quality Store is configured via a TOML file (default `./config/qstore.toml`).
//! Every section and field has a default, so an empty file is a valid
//! configuration.
//!
//! # Example
//!
//! ```toml
//! [store]
//! path = "./code_quality_db"
//! collection = "code_quality_analyses"
//!
//! [chunking]
//! max_chars = 8000
//! overlap_chars = 200
//!
//! [retrieval]
//! top_k = 5
//! min_score = 0.0
//! timeout_secs = 120
//!
//! [embedding]
//! provider = "auto"            # auto | local | remote | hashing
//! model_path = "./models/all-minilm-l6-v2"
//! model_name = "text-embedding-3-small"
//! url = "https://api.openai.com/v1"
//! batch_size = 32
//! max_retries = 3
//! backoff_ms = 500
//! timeout_secs = 30
//! ```
//!
//! # Environment overrides
//!
//! Applied after parsing:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `QSTORE_DB_DIR` | `store.path` |
//! | `QSTORE_COLLECTION` | `store.collection` |
//! | `QSTORE_EMBEDDING_MODEL` | `embedding.model_path` if the value is an existing path, else `embedding.model_name` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use quality_store_core::chunk::ChunkingParams;
use quality_store_core::retrieval::RetrievalParams;
use quality_store_core::StoreError;

/// File name of the SQLite database inside `store.path`.
pub const DB_FILE_NAME: &str = "quality_store.sqlite";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Persistence directory.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection: default_collection(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./code_quality_db")
}
fn default_collection() -> String {
    "code_quality_analyses".to_string()
}

impl StoreConfig {
    pub fn db_file(&self) -> PathBuf {
        self.path.join(DB_FILE_NAME)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    8000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: f64,
    /// Overall deadline for a single store/query/get/delete call.
    #[serde(default = "default_operation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
            timeout_secs: default_operation_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_operation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Directory holding a local ONNX model.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Remote model name.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Base URL of an OpenAI-compatible embeddings API.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_path: None,
            model_name: None,
            url: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "auto".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

pub const PROVIDERS: &[&str] = &["auto", "local", "remote", "hashing"];

impl Config {
    pub fn chunking_params(&self) -> ChunkingParams {
        ChunkingParams {
            max_chars: self.chunking.max_chars,
            overlap_chars: self.chunking.overlap_chars,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            chunking: self.chunking_params(),
            default_top_k: self.retrieval.top_k,
            min_score: self.retrieval.min_score,
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval.timeout_secs)
    }

    /// Apply `QSTORE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("QSTORE_DB_DIR") {
            self.store.path = PathBuf::from(dir);
        }
        if let Some(collection) = lookup("QSTORE_COLLECTION") {
            self.store.collection = collection;
        }
        if let Some(model) = lookup("QSTORE_EMBEDDING_MODEL") {
            if Path::new(&model).exists() {
                self.embedding.model_path = Some(PathBuf::from(model));
            } else {
                self.embedding.model_name = Some(model);
            }
        }
    }

    /// Check every field; errors are [`StoreError::Configuration`].
    pub fn validate(&self) -> quality_store_core::Result<()> {
        validate_collection(&self.store.collection)?;
        self.retrieval_params().validate()?;

        if self.retrieval.timeout_secs == 0 {
            return Err(StoreError::Configuration(
                "retrieval.timeout_secs must be > 0".to_string(),
            ));
        }

        let e = &self.embedding;
        if !PROVIDERS.contains(&e.provider.as_str()) {
            return Err(StoreError::Configuration(format!(
                "unknown embedding provider: '{}'. Must be auto, local, remote, or hashing.",
                e.provider
            )));
        }
        if e.batch_size == 0 {
            return Err(StoreError::Configuration(
                "embedding.batch_size must be > 0".to_string(),
            ));
        }
        if e.dims == Some(0) {
            return Err(StoreError::Configuration(
                "embedding.dims must be > 0 when set".to_string(),
            ));
        }
        if e.provider == "local" && e.model_path.is_none() {
            return Err(StoreError::Configuration(
                "embedding.model_path must be set when provider is 'local'".to_string(),
            ));
        }
        if e.provider == "remote" && e.model_name.is_none() {
            return Err(StoreError::Configuration(
                "embedding.model_name must be set when provider is 'remote'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Collection names become part of a table name.
pub fn validate_collection(name: &str) -> quality_store_core::Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::Configuration(format!(
            "collection name '{}' must be non-empty and contain only [A-Za-z0-9_]",
            name
        )));
    }
    Ok(())
}

pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        parse_config("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.store.path, PathBuf::from("./code_quality_db"));
        assert_eq!(config.store.collection, "code_quality_analyses");
        assert_eq!(config.chunking.max_chars, 8000);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, "auto");
        assert_eq!(config.embedding.batch_size, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            max_chars = 500

            [embedding]
            provider = "hashing"
            dims = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_chars, 500);
        assert_eq!(config.chunking.overlap_chars, 200);
        assert_eq!(config.embedding.dims, Some(64));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = Config::default();
        config.chunking.overlap_chars = config.chunking.max_chars;
        assert!(matches!(
            config.validate(),
            Err(StoreError::Configuration(_))
        ));

        let mut config = Config::default();
        config.store.collection = "bad-name; DROP".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.provider = "remote".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let model_dir = tmp.path().to_string_lossy().to_string();

        let mut env = HashMap::new();
        env.insert("QSTORE_DB_DIR", "/tmp/qdb".to_string());
        env.insert("QSTORE_COLLECTION", "reports_v2".to_string());
        env.insert("QSTORE_EMBEDDING_MODEL", model_dir.clone());

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).cloned());
        assert_eq!(config.store.path, PathBuf::from("/tmp/qdb"));
        assert_eq!(config.store.collection, "reports_v2");
        assert_eq!(config.embedding.model_path, Some(PathBuf::from(model_dir)));
        assert_eq!(config.embedding.model_name, None);

        let mut config = Config::default();
        config.apply_overrides(|k| {
            (k == "QSTORE_EMBEDDING_MODEL").then(|| "text-embedding-3-small".to_string())
        });
        assert_eq!(
            config.embedding.model_name.as_deref(),
            Some("text-embedding-3-small")
        );
        assert!(config.embedding.model_path.is_none());
    }

    #[test]
    fn test_db_file_inside_store_path() {
        let config = Config::default();
        assert_eq!(
            config.store.db_file(),
            PathBuf::from("./code_quality_db").join(DB_FILE_NAME)
        );
    }
}
