//! In-memory [`VectorStore`] implementation for testing and embedded use.
//!
//! Records live in a `BTreeMap` keyed by `(app_id, sequence_index)` behind
//! a `std::sync::RwLock`. Every mutation takes the write lock once, so
//! [`replace_app`](VectorStore::replace_app) is atomic with respect to
//! readers. Search is brute-force cosine similarity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::models::ChunkRecord;

use super::{rank_candidates, ScoredChunk, VectorStore};

type Key = (String, u32);

/// In-memory store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<BTreeMap<Key, ChunkRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<Key, ChunkRecord>>> {
        self.records
            .read()
            .map_err(|_| StoreError::from(anyhow!("in-memory store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<Key, ChunkRecord>>> {
        self.records
            .write()
            .map_err(|_| StoreError::from(anyhow!("in-memory store lock poisoned")))
    }
}

fn key_of(record: &ChunkRecord) -> Key {
    (record.chunk.app_id.clone(), record.chunk.sequence_index)
}

fn app_range(app_id: &str) -> std::ops::RangeInclusive<Key> {
    (app_id.to_string(), 0)..=(app_id.to_string(), u32::MAX)
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, record: &ChunkRecord) -> Result<()> {
        record.validate()?;
        let mut records = self.write()?;
        records.retain(|_, r| r.chunk.chunk_id != record.chunk.chunk_id);
        records.insert(key_of(record), record.clone());
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool> {
        let mut records = self.write()?;
        let before = records.len();
        records.retain(|_, r| r.chunk.chunk_id != chunk_id);
        Ok(records.len() != before)
    }

    async fn replace_app(&self, app_id: &str, new_records: &[ChunkRecord]) -> Result<usize> {
        for r in new_records {
            r.validate()?;
            if r.app_id() != app_id {
                return Err(StoreError::InvalidRecord(format!(
                    "chunk {} belongs to '{}', not '{}'",
                    r.chunk_id(),
                    r.app_id(),
                    app_id
                )));
            }
        }

        let mut records = self.write()?;
        let old: Vec<Key> = records.range(app_range(app_id)).map(|(k, _)| k.clone()).collect();
        for k in &old {
            records.remove(k);
        }
        for r in new_records {
            records.insert(key_of(r), r.clone());
        }
        Ok(old.len())
    }

    async fn delete_app(&self, app_id: &str) -> Result<usize> {
        let mut records = self.write()?;
        let old: Vec<Key> = records.range(app_range(app_id)).map(|(k, _)| k.clone()).collect();
        for k in &old {
            records.remove(k);
        }
        Ok(old.len())
    }

    async fn chunks_for_app(&self, app_id: &str) -> Result<Vec<ChunkRecord>> {
        let records = self.read()?;
        Ok(records
            .range(app_range(app_id))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn search(
        &self,
        query: &[f32],
        candidates: Option<&BTreeSet<String>>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let records = self.read()?;
        Ok(rank_candidates(query, records.values(), candidates, top_k))
    }

    async fn load_all(&self) -> Result<Vec<ChunkRecord>> {
        Ok(self.read()?.values().cloned().collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id_for;
    use crate::models::{Analysis, Chunk, FocusArea};

    fn record(app: &str, idx: u32, text: &str, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            chunk: Chunk {
                chunk_id: chunk_id_for(app, idx),
                app_id: app.to_string(),
                sequence_index: idx,
                text: text.to_string(),
                hash: String::new(),
            },
            metadata: Analysis::new(app, "Name", [FocusArea::Logging], "").metadata(),
            vector,
        }
    }

    #[tokio::test]
    async fn test_replace_app_swaps_whole_set() {
        let store = InMemoryVectorStore::new();
        let first = vec![
            record("a", 0, "one", vec![1.0, 0.0]),
            record("a", 1, "two", vec![0.0, 1.0]),
            record("a", 2, "three", vec![1.0, 1.0]),
        ];
        assert_eq!(store.replace_app("a", &first).await.unwrap(), 0);
        store
            .replace_app("b", &[record("b", 0, "other", vec![1.0, 0.0])])
            .await
            .unwrap();

        let second = vec![record("a", 0, "uno", vec![1.0, 0.0])];
        assert_eq!(store.replace_app("a", &second).await.unwrap(), 3);

        let chunks = store.chunks_for_app("a").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk.text, "uno");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_app_rejects_foreign_records() {
        let store = InMemoryVectorStore::new();
        let err = store
            .replace_app("a", &[record("b", 0, "x", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord(_)));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_chunks_ordered_by_sequence() {
        let store = InMemoryVectorStore::new();
        for idx in [2u32, 0, 10, 1] {
            store
                .upsert(&record("a", idx, &idx.to_string(), vec![1.0]))
                .await
                .unwrap();
        }
        let order: Vec<u32> = store
            .chunks_for_app("a")
            .await
            .unwrap()
            .iter()
            .map(|r| r.chunk.sequence_index)
            .collect();
        assert_eq!(order, vec![0, 1, 2, 10]);
    }

    #[tokio::test]
    async fn test_delete_single_chunk() {
        let store = InMemoryVectorStore::new();
        let r = record("a", 0, "x", vec![1.0]);
        store.upsert(&r).await.unwrap();
        assert!(store.delete(r.chunk_id()).await.unwrap());
        assert!(!store.delete(r.chunk_id()).await.unwrap());
        assert_eq!(store.delete_app("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_more_than_available_returns_all() {
        let store = InMemoryVectorStore::new();
        store
            .replace_app(
                "a",
                &[
                    record("a", 0, "x", vec![1.0, 0.0]),
                    record("a", 1, "y", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let hits = store.search(&[0.0, 1.0], None, 50).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].sequence_index, 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_invalid_vector() {
        let store = InMemoryVectorStore::new();
        let bad = record("a", 0, "x", vec![]);
        assert!(store.upsert(&bad).await.is_err());
    }
}
