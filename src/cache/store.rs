//! Single-snapshot cache store over SQLite.
//!
//! The whole system caches exactly one value: the serialized list of
//! per-source results from the last completed fetch cycle, stored under a
//! well-known key together with its metadata (creation timestamp, update
//! method, duration). There is no per-source caching.
//!
//! Failure policy follows the cache contract rather than the usual Result
//! chain: a read error is a miss, a write error is a logged `false`. Only
//! opening the store can fail hard.
use chrono::Utc;
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::feed::FeedResult;

/// Well-known key for the single cached snapshot.
pub const CACHE_KEY: &str = "RSS_FEEDS_DATA";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store migration failed: {0}")]
    Migration(String),

    #[error("Store error: {0}")]
    Other(#[from] sqlx::Error),
}

/// How the cached snapshot was last written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    /// Background refresh triggered by a read in the staleness band.
    Auto,
    /// Administrative refresh.
    Manual,
    /// Periodic sweep.
    Scheduled,
    /// Synchronous miss-fill or forced refresh during a read.
    Request,
}

impl UpdateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMethod::Auto => "auto",
            UpdateMethod::Manual => "manual",
            UpdateMethod::Scheduled => "scheduled",
            UpdateMethod::Request => "request",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(UpdateMethod::Auto),
            "manual" => Some(UpdateMethod::Manual),
            "scheduled" => Some(UpdateMethod::Scheduled),
            "request" => Some(UpdateMethod::Request),
            _ => None,
        }
    }
}

impl std::fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store-level metadata written alongside the snapshot payload.
#[derive(Debug, Clone)]
pub struct CacheMetadata {
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
    /// Human-readable creation time (RFC 3339).
    pub last_update: String,
    pub update_method: UpdateMethod,
    /// How long the producing fetch cycle took.
    pub update_duration_ms: Option<i64>,
}

/// A snapshot read back from the store.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
    pub results: Vec<FeedResult>,
    pub metadata: CacheMetadata,
    /// Expiry time, epoch milliseconds.
    pub expires_at: i64,
}

// ============================================================================
// Store
// ============================================================================

#[derive(Clone)]
pub struct SnapshotStore {
    pub(crate) pool: SqlitePool,
}

impl SnapshotStore {
    /// Open the store and run migrations. Accepts `:memory:` for tests.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to release
        // before returning SQLITE_BUSY. Overlapping refresh cycles are allowed
        // to race on the single row, so transient contention is expected.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::Other)?
            .pragma("busy_timeout", "5000");

        // An in-memory SQLite database exists per connection; a larger pool
        // would hand out connections that never saw the migration.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::Other)?;

        let store = Self { pool };
        store
            .migrate()
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_cache (
                cache_key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_ms INTEGER NOT NULL,
                last_update TEXT NOT NULL,
                update_method TEXT NOT NULL,
                update_duration_ms INTEGER,
                expires_ms INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Read the cached snapshot with its metadata.
    ///
    /// Returns `None` (a cache miss) when the row is absent, expired, or the
    /// payload is not a non-empty results array. A store-level read error is
    /// also a miss — logged, never fatal.
    pub async fn get(&self) -> Option<CachedSnapshot> {
        let now = now_ms();
        let row: Option<(String, i64, String, String, Option<i64>, i64)> = match sqlx::query_as(
            r#"
            SELECT payload, created_ms, last_update, update_method, update_duration_ms, expires_ms
            FROM snapshot_cache
            WHERE cache_key = ? AND expires_ms > ?
        "#,
        )
        .bind(CACHE_KEY)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!(error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let (payload, created_ms, last_update, method, duration, expires_ms) = row?;

        let results: Vec<FeedResult> = match serde_json::from_str(&payload) {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(error = %e, "Cached payload is not valid JSON, treating as miss");
                return None;
            }
        };
        if results.is_empty() {
            tracing::warn!("Cached payload is empty, treating as miss");
            return None;
        }
        let update_method = match UpdateMethod::parse(&method) {
            Some(m) => m,
            None => {
                tracing::warn!(method = %method, "Unknown update method in cache, treating as miss");
                return None;
            }
        };

        Some(CachedSnapshot {
            results,
            metadata: CacheMetadata {
                timestamp: created_ms,
                last_update,
                update_method,
                update_duration_ms: duration,
            },
            expires_at: expires_ms,
        })
    }

    /// Write the snapshot, replacing any previous one, with an expiry of
    /// `ttl_secs` from now.
    ///
    /// Returns whether the write succeeded; failures are logged, not raised.
    pub async fn put(
        &self,
        results: &[FeedResult],
        ttl_secs: u64,
        method: UpdateMethod,
        update_duration_ms: Option<i64>,
    ) -> bool {
        let payload = match serde_json::to_string(results) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize snapshot");
                return false;
            }
        };

        let now = now_ms();
        let expires = now + (ttl_secs as i64) * 1000;
        let written = sqlx::query(
            r#"
            INSERT OR REPLACE INTO snapshot_cache
                (cache_key, payload, created_ms, last_update, update_method, update_duration_ms, expires_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(CACHE_KEY)
        .bind(&payload)
        .bind(now)
        .bind(Utc::now().to_rfc3339())
        .bind(method.as_str())
        .bind(update_duration_ms)
        .bind(expires)
        .execute(&self.pool)
        .await;

        match written {
            Ok(_) => {
                tracing::info!(ttl_secs = ttl_secs, method = %method, "Snapshot cached");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to write snapshot cache");
                false
            }
        }
    }

    /// Remove the cached snapshot. Used only by the administrative clear.
    pub async fn delete(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM snapshot_cache WHERE cache_key = ?")
            .bind(CACHE_KEY)
            .execute(&self.pool)
            .await?;
        tracing::info!("Snapshot cache cleared");
        Ok(())
    }
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// Tests
// ============================================================================
