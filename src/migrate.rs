//! Schema creation. Every statement is idempotent, so running it on each
//! open is safe.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::{validate_collection, Config};
use crate::db;

/// Table holding the chunks of one collection.
pub fn table_name(collection: &str) -> String {
    format!("chunks_{}", collection)
}

/// Create the chunk table and its indexes for `collection`.
pub async fn migrate_collection(pool: &SqlitePool, collection: &str) -> Result<()> {
    validate_collection(collection)?;
    let table = table_name(collection);

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            chunk_id TEXT PRIMARY KEY,
            app_id TEXT NOT NULL,
            app_name TEXT NOT NULL,
            focus_areas TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            extra_json TEXT NOT NULL DEFAULT '{{}}',
            embedding BLOB NOT NULL,
            UNIQUE(app_id, sequence_index)
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_app_id ON {table}(app_id)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// `qstore init`: create the database file and the configured collection.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_collection(&pool, &config.store.collection).await?;
    pool.close().await;
    Ok(())
}
