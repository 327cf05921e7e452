//! Local ONNX embedding via fastembed's user-defined model API.
//!
//! Expects a model directory laid out the way Hugging Face exports are:
//!
//! ```text
//! model_dir/
//!   model.onnx
//!   tokenizer.json
//!   config.json
//!   special_tokens_map.json
//!   tokenizer_config.json   (optional)
//! ```
//!
//! No network access is needed. Inference runs on the blocking thread pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel};
use tracing::info;

use quality_store_core::embedding::{check_vectors, EmbeddingProvider};
use quality_store_core::{Result, StoreError};

pub struct LocalProvider {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dims: usize,
    batch_size: usize,
}

async fn read_required(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    tokio::fs::read(&path).await.map_err(|e| {
        StoreError::EmbeddingUnavailable(format!("cannot read {}: {}", path.display(), e))
    })
}

/// Used when the export ships no `tokenizer_config.json`.
fn minimal_tokenizer_config() -> Result<Vec<u8>> {
    let config = serde_json::json!({
        "clean_up_tokenization_spaces": true,
        "do_lower_case": false,
        "model_max_length": 512,
        "tokenizer_class": "BertTokenizer"
    });
    Ok(serde_json::to_vec_pretty(&config)?)
}

impl LocalProvider {
    /// Load the model in `dir` and embed a probe text to learn its dimension.
    pub async fn load(dir: &Path, batch_size: usize) -> Result<Self> {
        if !dir.is_dir() {
            return Err(StoreError::EmbeddingUnavailable(format!(
                "local model directory {} does not exist",
                dir.display()
            )));
        }

        let onnx_file = read_required(dir, "model.onnx").await?;
        let tokenizer_files = TokenizerFiles {
            tokenizer_file: read_required(dir, "tokenizer.json").await?,
            config_file: read_required(dir, "config.json").await?,
            special_tokens_map_file: read_required(dir, "special_tokens_map.json").await?,
            tokenizer_config_file: match tokio::fs::read(dir.join("tokenizer_config.json")).await {
                Ok(bytes) => bytes,
                Err(_) => minimal_tokenizer_config()?,
            },
        };
        let user_model = UserDefinedEmbeddingModel::new(onnx_file, tokenizer_files);

        let model_name = model_name_for(dir);
        let (model, dims) = tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
            let mut model = TextEmbedding::try_new_from_user_defined(user_model, Default::default())
                .map_err(|e| StoreError::EmbeddingUnavailable(format!("model init: {}", e)))?;
            let probe = model
                .embed(vec!["probe".to_string()], None)
                .map_err(|e| StoreError::EmbeddingUnavailable(format!("model probe: {}", e)))?;
            let dims = probe.first().map(Vec::len).unwrap_or(0);
            if dims == 0 {
                return Err(StoreError::EmbeddingUnavailable(
                    "model produced an empty embedding".to_string(),
                ));
            }
            Ok((model, dims))
        })
        .await
        .map_err(|e| StoreError::EmbeddingUnavailable(format!("model loader panicked: {}", e)))??;

        info!(model = %model_name, dims, "loaded local embedding model");
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name,
            dims,
            batch_size: batch_size.max(1),
        })
    }
}

fn model_name_for(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string())
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
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
        let model = Arc::clone(&self.model);
        let count = texts.len();
        let texts = texts.to_vec();
        let batch_size = self.batch_size;

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut model = model
                .lock()
                .map_err(|_| StoreError::transient_embedding("local model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| StoreError::transient_embedding(format!("local embedding: {}", e)))
        })
        .await
        .map_err(|e| StoreError::transient_embedding(format!("embedding task failed: {}", e)))??;

        check_vectors(&vectors, count, self.dims)?;
        Ok(vectors)
    }
}
