//! Storage backends for URL records.
//!
//! Everything the service knows about persistence goes through [`UrlStore`].
//! Backends are chosen at startup from [`StoreBackend`] and handed to the
//! shortener as an `Arc<dyn UrlStore>`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::{AppConfig, StoreBackend},
    error::StoreError,
    models::{UrlPatch, UrlRecord},
};

pub mod dynamo;
pub mod memory;
pub mod sqlite;

pub use dynamo::DynamoStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// One page of a scan. `last_key` is set when more records may follow.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub records: Vec<UrlRecord>,
    pub last_key: Option<String>,
}

#[async_trait]
pub trait UrlStore: Send + Sync + 'static {
    /// Insert a new record. Fails with `KeyExists` if the key is taken.
    async fn put_if_absent(&self, record: &UrlRecord) -> StoreResult<()>;

    /// Unconditional upsert. The service only ever inserts through
    /// `put_if_absent`; this is for seeding and restoring records.
    async fn put(&self, record: &UrlRecord) -> StoreResult<()>;

    async fn get(&self, short_id: &str) -> StoreResult<Option<UrlRecord>>;

    /// Atomically add `delta` to the click counter and return the new value.
    /// Fails with `NotFound` if the key is absent.
    async fn increment(&self, short_id: &str, delta: i64) -> StoreResult<i64>;

    /// Apply a partial update in one store call. Fails with `NotFound` if the
    /// key is absent; never creates a record.
    async fn update_fields(&self, short_id: &str, patch: &UrlPatch) -> StoreResult<()>;

    /// Unconditional, idempotent delete.
    async fn delete(&self, short_id: &str) -> StoreResult<()>;

    /// Return up to `limit` records whose key sorts after `start_after`.
    ///
    /// The resume token is the last returned key, so pagination is only
    /// exact while the backend's scan order is stable between calls.
    async fn scan(&self, limit: usize, start_after: Option<&str>) -> StoreResult<ScanPage>;

    /// Cheap round trip used by health checks.
    async fn ping(&self) -> StoreResult<()>;
}

/// Build the configured backend.
pub async fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn UrlStore>> {
    let store: Arc<dyn UrlStore> = match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Sqlite => Arc::new(SqliteStore::connect(&config.database_url).await?),
        StoreBackend::DynamoDb => Arc::new(DynamoStore::connect(&config.dynamo).await?),
    };

    tracing::info!(backend = ?config.store_backend, "URL store ready");
    Ok(store)
}
