//! Vector store abstraction for Quality Store.
//!
//! The [`VectorStore`] trait persists [`ChunkRecord`]s (vector plus text
//! and metadata payload) and runs cosine-similarity search, optionally
//! restricted to a candidate set resolved by the metadata index. This is
//! how structured filters and semantic similarity compose.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorStore::upsert) | Insert or overwrite one chunk |
//! | [`delete`](VectorStore::delete) | Remove one chunk |
//! | [`replace_app`](VectorStore::replace_app) | Atomically swap an app's whole chunk set |
//! | [`delete_app`](VectorStore::delete_app) | Remove every chunk of an app |
//! | [`chunks_for_app`](VectorStore::chunks_for_app) | Ordered chunks for reconstruction |
//! | [`search`](VectorStore::search) | Ranked nearest-neighbor search |
//! | [`load_all`](VectorStore::load_all) | Full scan used to rebuild the metadata index |

pub mod memory;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::ChunkRecord;

/// A ranked search result, carrying enough payload to render a hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub app_id: String,
    pub app_name: String,
    pub sequence_index: u32,
    pub text: String,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f64,
}

/// Result ordering: score descending, then `sequence_index` ascending,
/// then `chunk_id` ascending.
pub fn compare_scored(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.sequence_index.cmp(&b.sequence_index))
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Score `records` against `query`, keep those in `candidates` (if given),
/// and return the best `top_k`.
///
/// Shared by every backend so ranking is identical regardless of where
/// vectors live. `top_k` larger than the candidate count returns all
/// candidates, ranked.
pub fn rank_candidates<'a>(
    query: &[f32],
    records: impl IntoIterator<Item = &'a ChunkRecord>,
    candidates: Option<&BTreeSet<String>>,
    top_k: usize,
) -> Vec<ScoredChunk> {
    if top_k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(f64, &ChunkRecord)> = records
        .into_iter()
        .filter(|r| candidates.map_or(true, |c| c.contains(r.chunk_id())))
        .map(|r| (cosine_similarity(query, &r.vector) as f64, r))
        .collect();
    scored.sort_by(|(sa, a), (sb, b)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
            .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
    });
    scored
        .into_iter()
        .take(top_k)
        .map(|(score, r)| ScoredChunk {
            chunk_id: r.chunk.chunk_id.clone(),
            app_id: r.chunk.app_id.clone(),
            app_name: r.metadata.app_name.clone(),
            sequence_index: r.chunk.sequence_index,
            text: r.chunk.text.clone(),
            score,
        })
        .collect()
}

/// Abstract vector storage backend.
///
/// All operations are async (via `async-trait`) so that the SQLite
/// backend can run on tokio while the in-memory backend returns
/// immediately-ready futures.
///
/// Writers for the same `app_id` must be serialized by the caller;
/// [`replace_app`](Self::replace_app) itself is atomic, so a concurrent
/// reader sees either the old or the new chunk set, never a mix.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite a single chunk record.
    async fn upsert(&self, record: &ChunkRecord) -> Result<()>;

    /// Remove one chunk. Returns `false` if it did not exist.
    async fn delete(&self, chunk_id: &str) -> Result<bool>;

    /// Delete every chunk of `app_id` and insert `records` as one atomic
    /// step. Returns the number of chunks that were replaced.
    async fn replace_app(&self, app_id: &str, records: &[ChunkRecord]) -> Result<usize>;

    /// Remove every chunk of `app_id`, returning how many were removed.
    async fn delete_app(&self, app_id: &str) -> Result<usize>;

    /// All chunks of `app_id`, ordered by `sequence_index`.
    async fn chunks_for_app(&self, app_id: &str) -> Result<Vec<ChunkRecord>>;

    /// Rank stored chunks by cosine similarity to `query`.
    ///
    /// When `candidates` is `Some`, only those chunk ids are scored.
    async fn search(
        &self,
        query: &[f32],
        candidates: Option<&BTreeSet<String>>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>>;

    /// Every stored record, ordered by `app_id` then `sequence_index`.
    async fn load_all(&self) -> Result<Vec<ChunkRecord>>;

    /// Number of stored chunks.
    async fn count(&self) -> Result<usize>;
}
