//! feeddeck — a feed aggregation core.
//!
//! Fetches multiple RSS/Atom feeds concurrently, normalizes their entries into
//! a common shape, and serves them through a single cached snapshot whose
//! refresh policy balances freshness against upstream load.
//!
//! The HTTP shell and presentation layer are external collaborators: this
//! crate exposes the read, administrative-refresh, and sweep operations as
//! typed calls on [`cache::RefreshCoordinator`].

pub mod cache;
pub mod config;
pub mod feed;
