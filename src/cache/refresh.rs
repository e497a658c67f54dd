//! Staleness-driven refresh policy over the cached snapshot.
//!
//! One logical resource, four ways to refresh it:
//!
//! - a read that misses (or forces a bypass) fills the cache synchronously;
//! - a read inside the staleness band serves the cached snapshot and spawns a
//!   fire-and-forget background refresh;
//! - the periodic sweep refreshes unless the snapshot is too young to bother;
//! - the administrative refresh bypasses freshness checks entirely.
//!
//! No lock serializes writers. Overlapping cycles (a background refresh racing
//! a sweep) both write full replacements and the last one wins.
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::cache::store::{now_ms, SnapshotStore, UpdateMethod};
use crate::config::{Config, FeedSource};
use crate::feed::{fetch_all, FeedResult};

/// Fraction of the TTL past which a read triggers a background refresh.
const REFRESH_THRESHOLD: f64 = 0.8;
/// Fraction of the TTL below which the sweep considers a refresh redundant.
const SWEEP_MIN_AGE: f64 = 0.4;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Administrative key missing or mismatched. Fails closed.
    #[error("Access denied: key mismatch")]
    Unauthorized,

    /// No feed sources configured; a fetch cycle cannot run.
    #[error("No feed sources configured")]
    NoSources,
}

/// Cache-status indicators attached to a read served from cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub hit: bool,
    /// Snapshot creation time, epoch milliseconds.
    pub created_at: i64,
    /// Snapshot age in seconds.
    pub age: i64,
    /// Expiry time, epoch milliseconds.
    pub expires_at: i64,
    /// Seconds until expiry.
    pub time_to_live: i64,
    pub update_method: UpdateMethod,
}

/// Result of the read operation: the snapshot, plus cache indicators when it
/// was served from cache. The caller chooses whether to expose the wrapper or
/// just the bare data.
#[derive(Debug, Serialize)]
pub struct ReadOutcome {
    #[serde(rename = "data")]
    pub results: Vec<FeedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStatus>,
}

/// What a sweep pass did.
#[derive(Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Snapshot was younger than the minimum refresh age; nothing happened.
    Skipped { age_secs: i64 },
    /// A full fetch cycle ran.
    Refreshed { sources: usize },
}

/// Report returned by a successful administrative refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminReport {
    pub feeds: usize,
    pub cleared: bool,
    /// New expiry time, epoch milliseconds.
    pub expires_at: i64,
    pub timestamp: i64,
}

// ============================================================================
// Coordinator
// ============================================================================

/// Decides, from cache metadata and elapsed time, whether to serve cached
/// data, refresh in the background, or fetch synchronously.
///
/// All collaborators are injected; the coordinator is cheap to clone and a
/// clone is moved into each spawned background task.
#[derive(Clone)]
pub struct RefreshCoordinator {
    store: SnapshotStore,
    client: reqwest::Client,
    sources: Arc<Vec<FeedSource>>,
    ttl_secs: u64,
    admin_key: Option<SecretString>,
}

impl RefreshCoordinator {
    pub fn new(store: SnapshotStore, config: &Config) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            sources: Arc::new(config.sources.clone()),
            ttl_secs: config.cache_ttl_secs,
            admin_key: config.admin_key.clone(),
        }
    }

    fn ttl_ms(&self) -> i64 {
        (self.ttl_secs as i64) * 1000
    }

    /// The read operation.
    ///
    /// With `force_refresh` the cache is bypassed and a synchronous cycle runs
    /// (method `request`). Otherwise a present snapshot is always served; when
    /// its age has entered the staleness band a background refresh (method
    /// `auto`) is spawned exactly once for this call, without delaying the
    /// response or surfacing its outcome.
    pub async fn read(&self, force_refresh: bool) -> Result<ReadOutcome, ServiceError> {
        if !force_refresh {
            if let Some(snapshot) = self.store.get().await {
                let age_ms = now_ms() - snapshot.metadata.timestamp;
                let threshold_ms = (self.ttl_ms() as f64 * REFRESH_THRESHOLD) as i64;
                if age_ms >= threshold_ms {
                    tracing::info!(
                        age_secs = age_ms / 1000,
                        ttl_secs = self.ttl_secs,
                        "Cache nearing expiry, scheduling background refresh"
                    );
                    let this = self.clone();
                    tokio::spawn(async move { this.background_refresh().await });
                }

                let status = CacheStatus {
                    hit: true,
                    created_at: snapshot.metadata.timestamp,
                    age: age_ms / 1000,
                    expires_at: snapshot.expires_at,
                    time_to_live: (snapshot.expires_at - now_ms()).max(0) / 1000,
                    update_method: snapshot.metadata.update_method,
                };
                tracing::debug!(age_secs = status.age, method = %status.update_method, "Serving cached snapshot");
                return Ok(ReadOutcome {
                    results: snapshot.results,
                    cache: Some(status),
                });
            }
            tracing::info!("Cache miss, fetching synchronously");
        } else {
            tracing::info!("Forced refresh, bypassing cache");
        }

        let results = self.run_cycle(UpdateMethod::Request).await?;
        Ok(ReadOutcome {
            results,
            cache: None,
        })
    }

    /// The periodic sweep entry point.
    ///
    /// Skips the cycle when the snapshot is younger than the minimum refresh
    /// age — even a timer should respect the cache.
    pub async fn sweep(&self) -> Result<SweepOutcome, ServiceError> {
        if let Some(snapshot) = self.store.get().await {
            let age_ms = now_ms() - snapshot.metadata.timestamp;
            let min_age_ms = (self.ttl_ms() as f64 * SWEEP_MIN_AGE) as i64;
            if age_ms < min_age_ms {
                tracing::info!(
                    age_secs = age_ms / 1000,
                    min_age_secs = min_age_ms / 1000,
                    "Sweep: snapshot still fresh, skipping"
                );
                return Ok(SweepOutcome::Skipped {
                    age_secs: age_ms / 1000,
                });
            }
        }

        let results = self.run_cycle(UpdateMethod::Scheduled).await?;
        Ok(SweepOutcome::Refreshed {
            sources: results.len(),
        })
    }

    /// The administrative refresh.
    ///
    /// The caller key is checked by exact match against the configured secret
    /// and fails closed: with no secret configured every request is rejected.
    /// With `clear` the cache row is deleted first (a delete failure is logged
    /// and the refresh proceeds). The cycle then runs unconditionally,
    /// ignoring freshness.
    pub async fn admin_refresh(&self, key: &str, clear: bool) -> Result<AdminReport, ServiceError> {
        let Some(secret) = &self.admin_key else {
            tracing::error!("Administrative refresh rejected: no admin key configured");
            return Err(ServiceError::Unauthorized);
        };
        if key != secret.expose_secret() {
            tracing::error!("Administrative refresh rejected: key mismatch");
            return Err(ServiceError::Unauthorized);
        }

        if clear {
            if let Err(e) = self.store.delete().await {
                tracing::warn!(error = %e, "Failed to clear cache before refresh, continuing");
            }
        }

        let results = self.run_cycle(UpdateMethod::Manual).await?;
        let now = now_ms();
        tracing::info!(feeds = results.len(), cleared = clear, "Administrative refresh complete");
        Ok(AdminReport {
            feeds: results.len(),
            cleared: clear,
            expires_at: now + self.ttl_ms(),
            timestamp: now,
        })
    }

    /// One full fetch→parse→store cycle.
    ///
    /// The snapshot is written only after every source was attempted. A write
    /// failure is logged and the fresh results are still returned — the next
    /// read will simply miss.
    async fn run_cycle(&self, method: UpdateMethod) -> Result<Vec<FeedResult>, ServiceError> {
        if self.sources.is_empty() {
            return Err(ServiceError::NoSources);
        }

        let started = Instant::now();
        let results = fetch_all(&self.client, &self.sources).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        if !self
            .store
            .put(&results, self.ttl_secs, method, Some(duration_ms))
            .await
        {
            tracing::warn!(method = %method, "Snapshot write failed, serving uncached results");
        }

        Ok(results)
    }

    async fn background_refresh(&self) {
        match self.run_cycle(UpdateMethod::Auto).await {
            Ok(results) => {
                tracing::info!(sources = results.len(), "Background refresh complete")
            }
            Err(e) => tracing::error!(error = %e, "Background refresh failed"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
