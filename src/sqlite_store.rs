//! SQLite-backed [`VectorStore`] implementation.
//!
//! One table per collection (`chunks_<collection>`), one row per chunk.
//! Each row carries the chunk text, its denormalized analysis metadata and
//! the embedding as a little-endian f32 BLOB. Similarity is computed in
//! process with the shared ranking helper, so results match the in-memory
//! store exactly.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use quality_store_core::embedding::{blob_to_vec, vec_to_blob};
use quality_store_core::models::{
    join_focus_areas, parse_focus_areas, AnalysisMetadata, Chunk, ChunkRecord,
};
use quality_store_core::store::{rank_candidates, ScoredChunk, VectorStore};
use quality_store_core::{Result, StoreError};

use crate::config::validate_collection;
use crate::migrate::table_name;

/// Above this many candidate ids, search scans the table instead of
/// binding an `IN (...)` list.
const MAX_BOUND_CANDIDATES: usize = 900;

const COLUMNS: &str = "chunk_id, app_id, app_name, focus_areas, created_at, \
                       sequence_index, text, hash, extra_json, embedding";

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteVectorStore {
    /// Wrap `pool` for `collection`. The table must already exist; see
    /// [`crate::migrate::migrate_collection`].
    pub fn new(pool: SqlitePool, collection: &str) -> Result<Self> {
        validate_collection(collection)?;
        Ok(Self {
            pool,
            table: table_name(collection),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn select(&self) -> String {
        format!("SELECT {} FROM {}", COLUMNS, self.table)
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table, COLUMNS
        )
    }

    async fn insert<'e, E>(&self, executor: E, record: &ChunkRecord) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let meta = &record.metadata;
        sqlx::query(&self.insert_sql())
            .bind(&record.chunk.chunk_id)
            .bind(&record.chunk.app_id)
            .bind(&meta.app_name)
            .bind(join_focus_areas(&meta.focus_areas))
            .bind(format_ts(&meta.created_at))
            .bind(i64::from(record.chunk.sequence_index))
            .bind(&record.chunk.text)
            .bind(&record.chunk.hash)
            .bind(serde_json::to_string(&meta.extra)?)
            .bind(vec_to_blob(&record.vector))
            .execute(executor)
            .await
            .map_err(StoreError::storage)?;
        Ok(())
    }

    async fn fetch_candidates(&self, ids: &BTreeSet<String>) -> Result<Vec<ChunkRecord>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(self.select());
        builder.push(" WHERE chunk_id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        rows.iter().map(row_to_record).collect()
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_record(row: &SqliteRow) -> Result<ChunkRecord> {
    let chunk_id: String = row.try_get("chunk_id").map_err(StoreError::storage)?;
    let app_id: String = row.try_get("app_id").map_err(StoreError::storage)?;
    let focus: String = row.try_get("focus_areas").map_err(StoreError::storage)?;
    let created_at: String = row.try_get("created_at").map_err(StoreError::storage)?;
    let sequence_index: i64 = row.try_get("sequence_index").map_err(StoreError::storage)?;
    let extra_json: String = row.try_get("extra_json").map_err(StoreError::storage)?;
    let blob: Vec<u8> = row.try_get("embedding").map_err(StoreError::storage)?;

    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(StoreError::storage)?
        .with_timezone(&Utc);
    let sequence_index = u32::try_from(sequence_index).map_err(StoreError::storage)?;

    Ok(ChunkRecord {
        chunk: Chunk {
            chunk_id,
            app_id: app_id.clone(),
            sequence_index,
            text: row.try_get("text").map_err(StoreError::storage)?,
            hash: row.try_get("hash").map_err(StoreError::storage)?,
        },
        metadata: AnalysisMetadata {
            app_id,
            app_name: row.try_get("app_name").map_err(StoreError::storage)?,
            focus_areas: parse_focus_areas(&focus)?,
            created_at,
            extra: serde_json::from_str(&extra_json)?,
        },
        vector: blob_to_vec(&blob),
    })
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, record: &ChunkRecord) -> Result<()> {
        record.validate()?;
        let mut tx = self.pool.begin().await.map_err(StoreError::storage)?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE chunk_id = ? OR (app_id = ? AND sequence_index = ?)",
            self.table
        ))
        .bind(&record.chunk.chunk_id)
        .bind(&record.chunk.app_id)
        .bind(i64::from(record.chunk.sequence_index))
        .execute(&mut *tx)
        .await
        .map_err(StoreError::storage)?;

        self.insert(&mut *tx, record).await?;
        tx.commit().await.map_err(StoreError::storage)?;
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE chunk_id = ?", self.table))
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn replace_app(&self, app_id: &str, records: &[ChunkRecord]) -> Result<usize> {
        for r in records {
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

        let mut tx = self.pool.begin().await.map_err(StoreError::storage)?;

        let removed = sqlx::query(&format!("DELETE FROM {} WHERE app_id = ?", self.table))
            .bind(app_id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::storage)?
            .rows_affected();

        for record in records {
            self.insert(&mut *tx, record).await?;
        }

        tx.commit().await.map_err(StoreError::storage)?;
        Ok(removed as usize)
    }

    async fn delete_app(&self, app_id: &str) -> Result<usize> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE app_id = ?", self.table))
            .bind(app_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        Ok(result.rows_affected() as usize)
    }

    async fn chunks_for_app(&self, app_id: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE app_id = ? ORDER BY sequence_index ASC",
            self.select()
        ))
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn search(
        &self,
        query: &[f32],
        candidates: Option<&BTreeSet<String>>,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if top_k == 0 || candidates.is_some_and(BTreeSet::is_empty) {
            return Ok(Vec::new());
        }

        let records = match candidates {
            Some(ids) if ids.len() <= MAX_BOUND_CANDIDATES => self.fetch_candidates(ids).await?,
            _ => self.load_all().await?,
        };
        Ok(rank_candidates(query, &records, candidates, top_k))
    }

    async fn load_all(&self) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY app_id ASC, sequence_index ASC",
            self.select()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        Ok(n as usize)
    }
}
