use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    QueryBuilder, Sqlite, SqlitePool,
};

use super::{ScanPage, StoreResult, UrlStore};
use crate::{
    error::StoreError,
    models::{UrlPatch, UrlRecord},
};

/// SQLite-backed store. The `urls` table is created by the embedded
/// migrations in `migrations/`.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` and run
    /// migrations.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(
                database_url
                    .parse::<SqliteConnectOptions>()?
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal),
            )
            .await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying migrations first.
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
        Ok(Self { pool })
    }
}

#[async_trait]
impl UrlStore for SqliteStore {
    async fn put_if_absent(&self, record: &UrlRecord) -> StoreResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO urls (short_id, original_url, created_at, expire_at, clicks)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(short_id) DO NOTHING",
        )
        .bind(&record.short_id)
        .bind(&record.original_url)
        .bind(record.created_at)
        .bind(record.expire_at)
        .bind(record.clicks)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::KeyExists(record.short_id.clone()));
        }
        Ok(())
    }

    async fn put(&self, record: &UrlRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO urls (short_id, original_url, created_at, expire_at, clicks)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&record.short_id)
        .bind(&record.original_url)
        .bind(record.created_at)
        .bind(record.expire_at)
        .bind(record.clicks)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, short_id: &str) -> StoreResult<Option<UrlRecord>> {
        let record: Option<UrlRecord> = sqlx::query_as(
            "SELECT short_id, original_url, created_at, expire_at, clicks
             FROM urls WHERE short_id = ?1",
        )
        .bind(short_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn increment(&self, short_id: &str, delta: i64) -> StoreResult<i64> {
        // One statement, so concurrent increments serialise inside SQLite.
        // `fetch_all` steps it to completion; `fetch_optional` can hand back
        // the row before the autocommit lands.
        let mut clicks: Vec<i64> = sqlx::query_scalar(
            "UPDATE urls SET clicks = clicks + ?1 WHERE short_id = ?2 RETURNING clicks",
        )
        .bind(delta)
        .bind(short_id)
        .fetch_all(&self.pool)
        .await?;

        clicks
            .pop()
            .ok_or_else(|| StoreError::NotFound(short_id.to_owned()))
    }

    async fn update_fields(&self, short_id: &str, patch: &UrlPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE urls SET ");
        let mut set = query.separated(", ");
        if let Some(url) = &patch.original_url {
            set.push("original_url = ").push_bind_unseparated(url.clone());
        }
        if let Some(expire_at) = patch.expire_at {
            set.push("expire_at = ").push_bind_unseparated(expire_at);
        }
        query.push(" WHERE short_id = ").push_bind(short_id);

        let affected = query
            .build()
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(short_id.to_owned()));
        }
        Ok(())
    }

    async fn delete(&self, short_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM urls WHERE short_id = ?1")
            .bind(short_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn scan(&self, limit: usize, start_after: Option<&str>) -> StoreResult<ScanPage> {
        // Fetch one extra row to learn whether another page exists.
        let mut records: Vec<UrlRecord> = sqlx::query_as(
            "SELECT short_id, original_url, created_at, expire_at, clicks
             FROM urls
             WHERE short_id > ?1
             ORDER BY short_id
             LIMIT ?2",
        )
        .bind(start_after.unwrap_or(""))
        .bind(limit as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = records.len() > limit;
        records.truncate(limit);

        let last_key = if has_more {
            records.last().map(|r| r.short_id.clone())
        } else {
            None
        };

        Ok(ScanPage { records, last_key })
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
