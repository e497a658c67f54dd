//! Snapshot caching and refresh policy.
//!
//! - [`store`] - the single-snapshot key-value store over SQLite
//! - [`refresh`] - the coordinator deciding when cached data is served as-is,
//!   refreshed in the background, or refetched synchronously

pub mod refresh;
pub mod store;

pub use refresh::{
    AdminReport, CacheStatus, ReadOutcome, RefreshCoordinator, ServiceError, SweepOutcome,
};
pub use store::{CacheMetadata, CachedSnapshot, SnapshotStore, StoreError, UpdateMethod, CACHE_KEY};
