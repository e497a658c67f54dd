//! Configuration for the aggregation service.
//!
//! The config file is optional — a missing file yields `Config::default()`,
//! which has no sources and therefore makes every fetch cycle fail with
//! `ServiceError::NoSources`. Unknown keys are silently ignored by serde,
//! though we log a warning when the file contains potential typos.
//!
//! Environment overrides: `FEEDDECK_CACHE_TTL` (seconds) and
//! `FEEDDECK_ADMIN_KEY` take precedence over file values.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::feed::ParseStrategy;

/// Environment variable overriding `cache_ttl_secs`.
pub const ENV_CACHE_TTL: &str = "FEEDDECK_CACHE_TTL";
/// Environment variable overriding `admin_key`.
pub const ENV_ADMIN_KEY: &str = "FEEDDECK_ADMIN_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A source URL failed validation at load time.
    #[error("Invalid URL for source '{id}': {reason}")]
    InvalidSourceUrl { id: String, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// One configured upstream feed.
///
/// Sources are static application configuration: loaded once at process
/// start, immutable afterwards. The optional `strategy` selects a quirk
/// handling path in the parser for providers whose dialect deviates from
/// standard RSS/Atom (see [`ParseStrategy`]).
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSource {
    /// Stable identifier, carried through to every per-source result.
    pub id: String,
    /// Display title for the source.
    pub title: String,
    /// Feed URL to fetch. Must be http(s) and parseable.
    pub url: String,
    /// Canonical site link, if different from the feed URL.
    #[serde(default)]
    pub link: Option<String>,
    /// Parsing strategy variant. Defaults to the standard RSS/Atom path.
    #[serde(default)]
    pub strategy: ParseStrategy,
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Custom Debug impl masks `admin_key` to prevent secret leakage in logs,
/// error messages, and debug output.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snapshot time-to-live in seconds. Past this age cached data expires
    /// entirely; the 0.8/0.4 staleness bands are derived from it.
    pub cache_ttl_secs: u64,

    /// Shared secret for the administrative refresh operation.
    /// When unset, administrative refresh is rejected unconditionally.
    pub admin_key: Option<SecretString>,

    /// Upstream feeds, in the order their results are served.
    pub sources: Vec<FeedSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 7200,
            admin_key: None,
            sources: Vec::new(),
        }
    }
}

/// Mask admin_key in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "[REDACTED]"))
            .field("sources", &self.sources)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// - Missing file → `Ok(Config::default())` (plus env overrides)
    /// - Empty file → `Ok(Config::default())` (plus env overrides)
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Invalid source URL → `Err(ConfigError::InvalidSourceUrl)`
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides();
        config.validate_sources()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion from a
        // corrupted or maliciously large config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["cache_ttl_secs", "admin_key", "sources"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            ttl_secs = config.cache_ttl_secs,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply `FEEDDECK_CACHE_TTL` and `FEEDDECK_ADMIN_KEY` overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var(ENV_CACHE_TTL) {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => self.cache_ttl_secs = secs,
                _ => {
                    tracing::warn!(value = %raw, var = ENV_CACHE_TTL, "Ignoring invalid TTL override");
                }
            }
        }
        if let Ok(key) = std::env::var(ENV_ADMIN_KEY) {
            if key.is_empty() {
                tracing::warn!(var = ENV_ADMIN_KEY, "Ignoring empty admin key override");
            } else {
                self.admin_key = Some(SecretString::from(key));
            }
        }
    }

    /// Reject sources whose URL is not parseable http(s) — a bad URL would
    /// otherwise surface as a confusing per-source fetch error on every cycle.
    fn validate_sources(&self) -> Result<(), ConfigError> {
        for source in &self.sources {
            let parsed = Url::parse(&source.url).map_err(|e| ConfigError::InvalidSourceUrl {
                id: source.id.clone(),
                reason: e.to_string(),
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(ConfigError::InvalidSourceUrl {
                    id: source.id.clone(),
                    reason: format!("unsupported scheme '{}'", parsed.scheme()),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
