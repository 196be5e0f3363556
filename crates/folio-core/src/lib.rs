//! # folio-core
//!
//! A live, file-backed article store with version history.
//!
//! Articles are markdown files with a YAML front matter block. The store
//! loads them into an in-memory index, watches the directory for changes and
//! serves consistent snapshots to readers while files are edited underneath
//! it. Every content change is recorded in an append-only version ledger and
//! any version can be restored.
//!
//! ## Architecture
//!
//! - **Watching**: debounced filesystem events ([`PathWatcher`])
//! - **Parsing**: front matter to [`Article`] ([`FrontMatterParser`])
//! - **History**: append-only ledger on disk ([`VersionStore`])
//! - **Index**: copy-on-write snapshots swapped atomically ([`ContentIndex`])
//! - **Caching**: LRU + TTL response cache ([`ResponseCache`])
//! - **Search**: optional Tantivy index and popular queries ([`SearchIndexer`])
//! - **Service**: the facade tying it together ([`ContentService`])
//!
//! ## Quick Start
//!
//! ```rust
//! use folio_core::{Config, ContentService, ListFilter};
//!
//! let dir = tempfile::tempdir()?;
//! let articles = dir.path().join("articles");
//! std::fs::create_dir_all(&articles)?;
//! std::fs::write(articles.join("hello.md"), "---\ntitle: Hello\n---\nFirst post\n")?;
//!
//! let config = Config {
//!     article_dir: articles,
//!     data_dir: dir.path().join("data"),
//!     ..Config::default()
//! };
//! let service = ContentService::open(config)?;
//!
//! let article = service.get_article("hello")?;
//! assert_eq!(article.title, "Hello");
//! assert_eq!(article.version, 1);
//!
//! let page = service.list_articles(&ListFilter::default(), 1, 10)?;
//! assert_eq!(page.total, 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`]. Typed outcomes such as
//! [`Error::ArticleNotFound`] map onto stable API codes through
//! [`Error::api_code`]; internal failures render as a generic message via
//! [`Error::public_message`].

/// Bounded LRU + TTL response cache
pub mod cache;
/// Store configuration
pub mod config;
/// Error types and result aliases
pub mod error;
/// Copy-on-write article index
pub mod index;
/// Front matter parsing and rendering
pub mod parser;
/// Full-text search and popular queries
pub mod search;
/// The content service facade
pub mod service;
/// Core data types
pub mod types;
/// Append-only version ledger
pub mod versions;
/// Debounced filesystem watching
pub mod watcher;

pub use cache::{CacheStatsSummary, ResponseCache};
pub use config::Config;
pub use error::{ApiErrorCode, Error, Result};
pub use index::{ContentIndex, IndexChange, IndexSnapshot, Page};
pub use parser::FrontMatterParser;
pub use search::{FullTextBackend, QueryTracker, SearchIndexer, TantivyBackend};
pub use service::{ApplyOutcome, ContentService, RescanReport, WatchHandle};
pub use types::{
    Article, ArticleInput, ArticleMeta, ArticlePage, ArticleSummary, Categories, CategoryNode,
    ListFilter, PopularQuery, SearchHit, VersionDescriptor, VersionReason, VersionRecord,
};
pub use versions::VersionStore;
pub use watcher::{ChangeEvent, ChangeKind, Debouncer, PathWatcher, WatchSignal, WatcherTask};
