//! Retrieval engine: store, reconstruct, query and delete analyses.
//!
//! [`Retriever`] composes the chunker, an [`EmbeddingProvider`], the
//! [`MetadataIndex`] and a [`VectorStore`]. It is the only component that
//! writes to the store, and it keeps the index in step with it.
//!
//! # Store path
//!
//! ```text
//! Analysis ──▶ validate ──▶ chunk ──▶ embed (all batches, buffered)
//!                                          │
//!                       replace_app (atomic) ──▶ re-index app
//! ```
//!
//! The path is two steps. [`Retriever::prepare_analysis`] does everything
//! up to the embeddings and writes nothing, so an embedding failure or a
//! cancelled call leaves the previous chunk set in place.
//! [`Retriever::commit_analysis`] writes the store and then the index; it
//! must be driven to completion once started.
//!
//! # Query path
//!
//! ```text
//! filter ──▶ MetadataIndex::filter ──▶ candidates ─┐
//! text ──▶ embed ──────────────────────────────────┴─▶ VectorStore::search
//!                                                         │
//!                                 best chunk per app ◀────┘
//! ```

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use tracing::{debug, info};

use crate::chunk::{chunk_analysis, reassemble, ChunkingParams};
use crate::embedding::{check_vectors, EmbeddingProvider};
use crate::error::{Result, StoreError};
use crate::index::{MetadataFilter, MetadataIndex};
use crate::models::{
    validate_app_id, Analysis, AppSummary, ChunkRecord, QueryHit, StoreReceipt, StoredAnalysis,
};
use crate::store::{compare_scored, ScoredChunk, VectorStore};

/// Tunables for the retrieval engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    pub chunking: ChunkingParams,
    /// Result count used when a query does not set one.
    pub default_top_k: usize,
    /// Hits scoring below this are dropped.
    pub min_score: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            chunking: ChunkingParams::default(),
            default_top_k: 5,
            min_score: 0.0,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if !(-1.0..=1.0).contains(&self.min_score) {
            return Err(StoreError::Configuration(format!(
                "retrieval.min_score must be within [-1.0, 1.0], got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

/// A semantic query with optional structured filters.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub text: String,
    pub filter: MetadataFilter,
    pub top_k: Option<usize>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// An analysis that has been validated, chunked and embedded, but not
/// written.
#[derive(Debug, Clone)]
pub struct PreparedAnalysis {
    app_id: String,
    records: Vec<ChunkRecord>,
}

impl PreparedAnalysis {
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn chunk_count(&self) -> usize {
        self.records.len()
    }
}

/// Storage and retrieval over one collection.
pub struct Retriever<S: VectorStore> {
    store: S,
    embedder: Arc<dyn EmbeddingProvider>,
    index: RwLock<MetadataIndex>,
    params: RetrievalParams,
}

impl<S: VectorStore> Retriever<S> {
    /// Open a retriever over `store`, rebuilding the metadata index from
    /// the persisted records.
    ///
    /// Fails with [`StoreError::DimensionMismatch`] when the collection
    /// was written by an embedder of a different dimension.
    pub async fn open(
        store: S,
        embedder: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
    ) -> Result<Self> {
        params.validate()?;

        let records = store.load_all().await?;
        if let Some(bad) = records.iter().find(|r| r.vector.len() != embedder.dims()) {
            return Err(StoreError::DimensionMismatch {
                expected: embedder.dims(),
                actual: bad.vector.len(),
            });
        }
        let index = MetadataIndex::rebuild(&records);
        info!(
            chunks = index.len(),
            apps = index.apps().len(),
            model = embedder.model_name(),
            "retriever opened"
        );

        Ok(Self {
            store,
            embedder,
            index: RwLock::new(index),
            params,
        })
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Chunk, embed and persist an analysis, replacing any previous
    /// version stored under the same `app_id`.
    pub async fn store_analysis(&self, analysis: &Analysis) -> Result<StoreReceipt> {
        let prepared = self.prepare_analysis(analysis).await?;
        self.commit_analysis(prepared).await
    }

    /// Validate, chunk and embed `analysis` without touching the store or
    /// the index.
    pub async fn prepare_analysis(&self, analysis: &Analysis) -> Result<PreparedAnalysis> {
        analysis.validate()?;

        let chunks = chunk_analysis(analysis, &self.params.chunking);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_all(&texts).await?;

        let metadata = analysis.metadata();
        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| ChunkRecord {
                chunk,
                metadata: metadata.clone(),
                vector,
            })
            .collect();
        Ok(PreparedAnalysis {
            app_id: analysis.app_id.clone(),
            records,
        })
    }

    /// Replace the app's chunk set in the store, then re-index it.
    ///
    /// Not cancel safe: if the future is dropped after the store write has
    /// been issued, the index no longer matches the store until the next
    /// [`open`](Retriever::open). Run it on a task that is awaited to the end.
    pub async fn commit_analysis(&self, prepared: PreparedAnalysis) -> Result<StoreReceipt> {
        let PreparedAnalysis { app_id, records } = prepared;
        let replaced = self.store.replace_app(&app_id, &records).await?;
        {
            let mut index = self.index_mut()?;
            index.remove(&app_id);
            for r in &records {
                index.index(r.chunk_id(), &r.metadata);
            }
        }

        info!(
            app_id = %app_id,
            chunks = records.len(),
            replaced,
            "stored analysis"
        );
        Ok(StoreReceipt {
            app_id,
            chunk_count: records.len(),
            replaced,
        })
    }

    /// Embed every text, batch by batch, before anything is written.
    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dims = self.embedder.dims();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.embedder.batch_size().max(1)) {
            let embedded = self.embedder.embed_batch(batch).await?;
            check_vectors(&embedded, batch.len(), dims)?;
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Reconstruct the full text and metadata of one analysis.
    pub async fn get_analysis(&self, app_id: &str) -> Result<StoredAnalysis> {
        validate_app_id(app_id)?;
        let records = self.store.chunks_for_app(app_id).await?;
        let Some(first) = records.first() else {
            return Err(StoreError::NotFound(app_id.to_string()));
        };
        let metadata = first.metadata.clone();
        let texts: Vec<&str> = records.iter().map(|r| r.chunk.text.as_str()).collect();

        Ok(StoredAnalysis {
            app_id: app_id.to_string(),
            metadata,
            text: reassemble(&texts, self.params.chunking.overlap_chars),
            chunk_count: records.len(),
        })
    }

    /// Rank applications by their best-matching chunk.
    ///
    /// Blank query text returns no hits. A filter that matches nothing
    /// returns no hits without calling the embedder.
    pub async fn query_analyses(&self, request: &QueryRequest) -> Result<Vec<QueryHit>> {
        let top_k = request.top_k.unwrap_or(self.params.default_top_k);
        if request.text.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let (candidates, limit) = {
            let index = self.index_ref()?;
            if request.filter.is_empty() {
                (None, index.len())
            } else {
                let ids = index.filter(&request.filter);
                let n = ids.len();
                (Some(ids), n)
            }
        };
        if limit == 0 {
            debug!("query has no candidate chunks");
            return Ok(Vec::new());
        }
        debug!(
            candidates = limit,
            filtered = candidates.is_some(),
            "resolved query candidates"
        );

        let query = self.embedder.embed(&request.text).await?;
        check_vectors(std::slice::from_ref(&query), 1, self.embedder.dims())?;

        let ranked = self
            .store
            .search(&query, candidates.as_ref(), limit)
            .await?;

        Ok(best_per_app(ranked, self.params.min_score, top_k))
    }

    /// Every stored application, sorted by `app_id`.
    pub fn get_all_apps(&self) -> Result<Vec<AppSummary>> {
        Ok(self.index_ref()?.apps())
    }

    /// Remove an analysis. Returns the number of chunks removed; an
    /// unknown `app_id` removes nothing.
    ///
    /// Like [`commit_analysis`](Retriever::commit_analysis), this must not
    /// be dropped part way.
    pub async fn delete_analysis(&self, app_id: &str) -> Result<usize> {
        validate_app_id(app_id)?;
        let removed = self.store.delete_app(app_id).await?;
        self.index_mut()?.remove(app_id);
        if removed > 0 {
            info!(app_id, chunks = removed, "deleted analysis");
        }
        Ok(removed)
    }

    /// Chunk ids currently matching `filter`.
    pub fn matching_chunks(&self, filter: &MetadataFilter) -> Result<BTreeSet<String>> {
        Ok(self.index_ref()?.filter(filter))
    }

    fn index_ref(&self) -> Result<RwLockReadGuard<'_, MetadataIndex>> {
        self.index
            .read()
            .map_err(|_| StoreError::from(anyhow!("metadata index lock poisoned")))
    }

    fn index_mut(&self) -> Result<RwLockWriteGuard<'_, MetadataIndex>> {
        self.index
            .write()
            .map_err(|_| StoreError::from(anyhow!("metadata index lock poisoned")))
    }
}

/// Keep the best chunk of each app, drop low scores, cut to `top_k`.
fn best_per_app(ranked: Vec<ScoredChunk>, min_score: f64, top_k: usize) -> Vec<QueryHit> {
    let mut best: HashMap<String, ScoredChunk> = HashMap::new();
    for hit in ranked.into_iter().filter(|h| h.score >= min_score) {
        match best.get(&hit.app_id) {
            Some(current) if compare_scored(current, &hit).is_le() => {}
            _ => {
                best.insert(hit.app_id.clone(), hit);
            }
        }
    }

    let mut hits: Vec<ScoredChunk> = best.into_values().collect();
    hits.sort_by(compare_scored);
    hits.truncate(top_k);
    hits.into_iter()
        .map(|h| QueryHit {
            app_id: h.app_id,
            app_name: h.app_name,
            chunk_id: h.chunk_id,
            sequence_index: h.sequence_index,
            matched_text: h.text,
            score: h.score,
        })
        .collect()
}
