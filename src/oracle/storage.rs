//! Storage abstraction for the disk cache tier.
//!
//! One row per fingerprint holding the serialized payload, its creation time
//! and its TTL. The cache manager owns interpretation of the payload; this
//! layer only moves text in and out of the database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One persisted cache record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: String,
    /// JSON-serialized payload
    pub payload: String,
    /// Unix milliseconds
    pub created_at: u64,
    pub ttl_ms: u64,
}

impl StoredRecord {
    /// Valid iff `now - created_at < ttl`.
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) < self.ttl_ms
    }
}

/// Contract for the persistent cache tier.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a record by key.
    async fn load(&self, key: &str) -> Result<Option<StoredRecord>>;

    /// Insert or replace a record.
    async fn save(&self, record: &StoredRecord) -> Result<()>;

    /// Remove a record; missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Every persisted record, used to warm the memory tier at startup.
    async fn load_all(&self) -> Result<Vec<StoredRecord>>;

    /// Remove records expired at `now_ms`, returning how many were removed.
    async fn delete_expired(&self, now_ms: u64) -> Result<u64>;

    /// Number of persisted records.
    async fn count(&self) -> Result<i64>;

    /// Remove every record.
    async fn clear(&self) -> Result<()>;
}

#[derive(FromRow)]
struct CacheRow {
    key: String,
    payload: String,
    created_at: i64,
    ttl_ms: i64,
}

impl From<CacheRow> for StoredRecord {
    fn from(row: CacheRow) -> Self {
        Self {
            key: row.key,
            payload: row.payload,
            created_at: row.created_at.max(0) as u64,
            ttl_ms: row.ttl_ms.max(0) as u64,
        }
    }
}

/// SQLite implementation of [`CacheStore`].
pub struct SqliteCacheStore {
    pool: Pool<Sqlite>,
}

impl SqliteCacheStore {
    /// Open (creating if needed) the cache database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .with_context(|| format!("Failed to open cache database {}", path.as_ref().display()))?;

        let store = Self { pool };
        store.create_schema().await?;
        info!("SqliteCacheStore initialized at {}", path.as_ref().display());
        Ok(Arc::new(store))
    }

    /// Private in-memory database; contents vanish with the store.
    pub async fn open_in_memory() -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory cache database")?;

        let store = Self { pool };
        store.create_schema().await?;
        Ok(Arc::new(store))
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_cache (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                ttl_ms INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create analysis_cache table")?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn load(&self, key: &str) -> Result<Option<StoredRecord>> {
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT key, payload, created_at, ttl_ms FROM analysis_cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read cache record")?;

        Ok(row.map(StoredRecord::from))
    }

    async fn save(&self, record: &StoredRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_cache (key, payload, created_at, ttl_ms)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                ttl_ms = excluded.ttl_ms;
            "#,
        )
        .bind(&record.key)
        .bind(&record.payload)
        .bind(record.created_at as i64)
        .bind(record.ttl_ms as i64)
        .execute(&self.pool)
        .await
        .context("Failed to write cache record")?;

        debug!("Persisted cache record {}", record.key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM analysis_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .context("Failed to delete cache record")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query_as::<_, CacheRow>(
            "SELECT key, payload, created_at, ttl_ms FROM analysis_cache",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to read cache records")?;

        Ok(rows.into_iter().map(StoredRecord::from).collect())
    }

    async fn delete_expired(&self, now_ms: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM analysis_cache WHERE ? - created_at >= ttl_ms")
            .bind(now_ms as i64)
            .execute(&self.pool)
            .await
            .context("Failed to sweep expired cache records")?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM analysis_cache")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count cache records")?;
        Ok(count.0)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM analysis_cache")
            .execute(&self.pool)
            .await
            .context("Failed to clear cache records")?;
        Ok(())
    }
}
