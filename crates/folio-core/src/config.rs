//! Configuration for the content store.
//!
//! Configuration is a flat TOML document. Every key has a default, so an
//! empty file (or no file at all) yields a working store that reads
//! `./articles` and keeps its version ledger under `./data`.
//!
//! ## Example Configuration File
//!
//! ```toml
//! article_dir = "content/articles"
//! data_dir = "var/folio"
//! latest_articles_count = 5
//! enable_nested_categories = true
//! enable_full_text_search = true
//! cache_max_capacity = 1000
//! cache_ttl_seconds = 60
//! debounce_ms = 300
//! ```
//!
//! ```rust
//! use folio_core::Config;
//!
//! let config = Config::from_toml_str("enable_full_text_search = true")?;
//! assert!(config.enable_full_text_search);
//! assert_eq!(config.cache_max_capacity, 1000);
//! # Ok::<(), folio_core::Error>(())
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest writer heap Tantivy accepts.
const MIN_INDEX_HEAP: usize = 15_000_000;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the markdown content tree.
    pub article_dir: PathBuf,

    /// Root of durable state (version ledger).
    pub data_dir: PathBuf,

    /// How many articles `latest_articles` returns.
    pub latest_articles_count: usize,

    /// Load nested directories and derive categories from them.
    pub enable_nested_categories: bool,

    /// Build a full-text index and track popular queries.
    pub enable_full_text_search: bool,

    /// Maximum number of cached responses.
    pub cache_max_capacity: usize,

    /// Lifetime of a cached response in seconds.
    pub cache_ttl_seconds: u64,

    /// Window used to collapse bursts of filesystem events for one path.
    pub debounce_ms: u64,

    /// Largest page size a listing accepts.
    pub max_page_size: usize,

    /// Directory for an on-disk search index. `None` keeps it in RAM.
    pub search_index_dir: Option<PathBuf>,

    /// Tantivy writer heap in bytes.
    pub search_index_heap_size: usize,

    /// Maximum hits returned by one search.
    pub search_result_limit: usize,

    /// File used to persist popular-query counts across restarts.
    pub popular_queries_path: Option<PathBuf>,

    /// Default log level for binaries embedding the store.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            article_dir: PathBuf::from("articles"),
            data_dir: PathBuf::from("data"),
            latest_articles_count: 5,
            enable_nested_categories: false,
            enable_full_text_search: false,
            cache_max_capacity: 1000,
            cache_ttl_seconds: 60,
            debounce_ms: 300,
            max_page_size: 100,
            search_index_dir: None,
            search_index_heap_size: 50_000_000,
            search_result_limit: 20,
            popular_queries_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Platform config location, e.g. `~/.config/folio/config.toml` on Linux.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "folio", "folio")
            .ok_or_else(|| Error::Config("Failed to determine project directories".into()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Reject values the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.latest_articles_count == 0 {
            return Err(Error::Config(
                "latest_articles_count must be greater than 0".into(),
            ));
        }
        if self.cache_max_capacity == 0 {
            return Err(Error::Config(
                "cache_max_capacity must be greater than 0".into(),
            ));
        }
        if self.cache_ttl_seconds == 0 {
            return Err(Error::Config(
                "cache_ttl_seconds must be greater than 0".into(),
            ));
        }
        if self.max_page_size == 0 {
            return Err(Error::Config("max_page_size must be greater than 0".into()));
        }
        if self.search_result_limit == 0 {
            return Err(Error::Config(
                "search_result_limit must be greater than 0".into(),
            ));
        }
        if self.search_index_heap_size < MIN_INDEX_HEAP {
            return Err(Error::Config(format!(
                "search_index_heap_size must be at least {MIN_INDEX_HEAP} bytes"
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "unknown log_level '{}', expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    /// Cache TTL as a [`Duration`].
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Debounce window as a [`Duration`].
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Directory holding the version ledger.
    pub fn versions_root(&self) -> PathBuf {
        self.data_dir.join("articles")
    }
}
