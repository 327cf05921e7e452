//! Session: an open handle on one collection.
//!
//! A [`Session`] owns the SQLite pool, the embedding provider and the
//! [`Retriever`]. Callers open one at the start of a unit of work and
//! [`close`](Session::close) it at the end, which flushes the WAL.
//!
//! Reads and the preparation half of a write (validate, chunk, embed) run
//! under the configured deadline (`retrieval.timeout_secs`). Once a write
//! reaches the store it runs on its own task and always finishes, store and
//! index together, even if the caller has given up. Writes for the same
//! `app_id` are serialized through a per-app lock; writes for different
//! apps run concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use quality_store_core::embedding::EmbeddingProvider;
use quality_store_core::models::{Analysis, AppSummary, QueryHit, StoreReceipt, StoredAnalysis};
use quality_store_core::retrieval::{QueryRequest, Retriever};
use quality_store_core::store::VectorStore;
use quality_store_core::{Result, StoreError};

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate::migrate_collection;
use crate::sqlite_store::SqliteVectorStore;

pub struct Session<S: VectorStore = SqliteVectorStore> {
    retriever: Arc<Retriever<S>>,
    timeout: Duration,
    app_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Session<SqliteVectorStore> {
    /// Open the configured collection, building the embedding provider
    /// from `config.embedding`.
    pub async fn open(config: &Config) -> Result<Self> {
        let provider = create_provider(&config.embedding).await?;
        Self::open_with_provider(config, provider).await
    }

    /// Open with an already constructed provider.
    pub async fn open_with_provider(
        config: &Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;
        ensure_writable(config)?;

        let pool = db::connect(config)
            .await
            .map_err(|e| StoreError::Configuration(format!("{:#}", e)))?;
        migrate_collection(&pool, &config.store.collection).await?;

        let store = SqliteVectorStore::new(pool, &config.store.collection)?;
        let retriever = Retriever::open(store, provider, config.retrieval_params()).await?;

        info!(
            path = %config.store.path.display(),
            collection = %config.store.collection,
            "session opened"
        );
        Ok(Self::new(retriever, config.operation_timeout()))
    }

    pub fn pool(&self) -> &SqlitePool {
        self.retriever.store().pool()
    }

    /// Close the pool, checkpointing the WAL.
    pub async fn close(self) {
        self.pool().close().await;
        debug!("session closed");
    }
}

impl<S: VectorStore + 'static> Session<S> {
    /// Wrap an opened retriever; every call is bounded by `timeout`.
    pub fn new(retriever: Retriever<S>, timeout: Duration) -> Self {
        Self {
            retriever: Arc::new(retriever),
            timeout,
            app_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn retriever(&self) -> &Retriever<S> {
        &self.retriever
    }

    /// Store (or replace) an analysis.
    ///
    /// A [`StoreError::Timeout`] means nothing was written.
    pub async fn store(&self, analysis: &Analysis) -> Result<StoreReceipt> {
        let (guard, prepared) = self
            .with_deadline(async {
                let guard = self.lock_app(&analysis.app_id).await?;
                let prepared = self.retriever.prepare_analysis(analysis).await?;
                Ok((guard, prepared))
            })
            .await?;

        let retriever = Arc::clone(&self.retriever);
        run_to_completion(async move {
            let _guard = guard;
            retriever.commit_analysis(prepared).await
        })
        .await
    }

    pub async fn get(&self, app_id: &str) -> Result<StoredAnalysis> {
        self.with_deadline(self.retriever.get_analysis(app_id)).await
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<QueryHit>> {
        self.with_deadline(self.retriever.query_analyses(request))
            .await
    }

    pub fn apps(&self) -> Result<Vec<AppSummary>> {
        self.retriever.get_all_apps()
    }

    /// Delete an analysis; returns the number of chunks removed.
    ///
    /// Only waiting for the app lock is bounded by the deadline.
    pub async fn delete(&self, app_id: &str) -> Result<usize> {
        let guard = self.with_deadline(self.lock_app(app_id)).await?;

        let retriever = Arc::clone(&self.retriever);
        let app_id = app_id.to_string();
        run_to_completion(async move {
            let _guard = guard;
            retriever.delete_analysis(&app_id).await
        })
        .await
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }

    async fn lock_app(&self, app_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .app_locks
                .lock()
                .map_err(|_| StoreError::from(anyhow::anyhow!("app lock table poisoned")))?;
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(app_id.to_string()).or_default())
        };
        Ok(lock.lock_owned().await)
    }
}

/// Run a write on its own task. Dropping the returned future does not stop
/// the write.
async fn run_to_completion<T, F>(write: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(write)
        .await
        .map_err(|e| StoreError::from(anyhow::anyhow!("write task failed: {}", e)))?
}

/// The persistence directory must exist (or be creatable) and accept writes.
fn ensure_writable(config: &Config) -> Result<()> {
    let dir = &config.store.path;
    std::fs::create_dir_all(dir).map_err(|e| {
        StoreError::Configuration(format!("cannot create {}: {}", dir.display(), e))
    })?;
    let marker = dir.join(".qstore-write-check");
    std::fs::write(&marker, b"ok").map_err(|e| {
        StoreError::Configuration(format!("{} is not writable: {}", dir.display(), e))
    })?;
    if let Err(e) = std::fs::remove_file(&marker) {
        debug!(path = %marker.display(), error = %e, "could not remove write check file");
    }
    Ok(())
}
