//! Concurrent multi-source fetching.
//!
//! One HTTP request per configured source, all in flight at once, one
//! [`FeedResult`] per source in configuration order. A source that fails —
//! network error, non-2xx status, oversized body — contributes an
//! empty-with-error result and never disturbs its neighbours.
use chrono::Utc;
use futures::future;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::FeedSource;
use crate::feed::parser::{parse_entries, FeedEntry};

/// Upper bound on any single source fetch. One unresponsive upstream must not
/// stall the whole fan-out.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Response bodies above this are rejected to prevent memory exhaustion.
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Browser-like user agent; several providers serve different (or no) content
/// to obvious bot agents.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const ACCEPT: &str = "application/rss+xml, application/xml, text/xml, */*";

// ============================================================================
// Types
// ============================================================================

/// Errors for a single source fetch. These are captured into the source's
/// [`FeedResult::error`] field, not propagated.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, body read)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Per-source outcome of one fetch cycle.
///
/// Exactly one exists per configured source per cycle. Serialized field names
/// match the wire format the presentation layer consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedResult {
    /// Source id from configuration.
    pub source: String,
    /// Source display title from configuration.
    pub title: String,
    /// Canonical site link, empty when not configured.
    pub link: String,
    /// Parsed entries in source order. Empty on failure.
    pub items: Vec<FeedEntry>,
    #[serde(rename = "totalItems")]
    pub total_items: usize,
    /// RFC 3339 timestamp of this fetch attempt.
    #[serde(rename = "lastUpdate")]
    pub last_update: String,
    /// Fetch error message, if the source failed this cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Fetching
// ============================================================================

/// Fetch every configured source concurrently.
///
/// Returns one [`FeedResult`] per source, in configuration order regardless
/// of completion order. Individual failures are captured per source; this
/// function itself cannot fail.
pub async fn fetch_all(client: &reqwest::Client, sources: &[FeedSource]) -> Vec<FeedResult> {
    tracing::info!(sources = sources.len(), "Starting fetch cycle");
    let results = future::join_all(sources.iter().map(|s| fetch_one(client, s))).await;
    tracing::info!(sources = results.len(), "Fetch cycle complete");
    results
}

/// Fetch and parse a single source, downgrading every failure into the
/// result's error field.
async fn fetch_one(client: &reqwest::Client, source: &FeedSource) -> FeedResult {
    let last_update = Utc::now().to_rfc3339();
    let link = source.link.clone().unwrap_or_default();

    match fetch_body(client, &source.url).await {
        Ok(raw) => {
            let items = parse_entries(&raw, source.strategy);
            if items.is_empty() {
                tracing::warn!(source = %source.id, url = %source.url, "Source yielded no entries");
            } else {
                tracing::debug!(source = %source.id, entries = items.len(), "Source fetched");
            }
            FeedResult {
                source: source.id.clone(),
                title: source.title.clone(),
                link,
                total_items: items.len(),
                items,
                last_update,
                error: None,
            }
        }
        Err(e) => {
            tracing::warn!(source = %source.id, url = %source.url, error = %e, "Source fetch failed");
            FeedResult {
                source: source.id.clone(),
                title: source.title.clone(),
                link,
                items: Vec::new(),
                total_items: 0,
                last_update,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn fetch_body(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let response = tokio::time::timeout(
        FETCH_TIMEOUT,
        client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .send(),
    )
    .await
    .map_err(|_| FetchError::Timeout)?
    .map_err(FetchError::Network)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: reject on Content-Length before reading anything
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

// ============================================================================
// Tests
// ============================================================================
