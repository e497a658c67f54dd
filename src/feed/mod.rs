//! Feed retrieval and normalization.
//!
//! Two submodules make up the front half of the pipeline:
//!
//! - [`parser`] - lenient RSS/Atom extraction with quirk and fallback paths
//! - [`fetcher`] - concurrent per-source HTTP retrieval with uniform results
//!
//! The back half (snapshot caching and refresh policy) lives in [`crate::cache`].

pub mod fetcher;
pub mod parser;

pub use fetcher::{fetch_all, FeedResult, FetchError};
pub use parser::{parse_entries, FeedEntry, ParseStrategy};
