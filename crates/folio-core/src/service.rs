//! The content store facade.
//!
//! [`ContentService`] owns every other component and is the only surface an
//! HTTP layer or CLI talks to. Reads go cache → current snapshot → cache.
//! Mutations run under a per-slug lock and always follow the same pipeline:
//!
//! 1. commit the new content to the [`VersionStore`]
//! 2. publish the changed article to the [`ContentIndex`]
//! 3. invalidate the [`ResponseCache`]
//! 4. reindex the article in the [`SearchIndexer`]
//!
//! A failure before step 2 leaves the published state untouched. Search
//! indexing failures after publication are logged; the article is already
//! served and the next change retries it.

use crate::cache::{CacheStatsSummary, ResponseCache};
use crate::config::Config;
use crate::index::{ContentIndex, IndexChange, IndexSnapshot, Page};
use crate::parser::{FrontMatterParser, is_article_file, render, slug_for_path, slugify};
use crate::search::SearchIndexer;
use crate::types::{
    Article, ArticleInput, ArticlePage, ArticleSummary, Categories, ListFilter, PopularQuery,
    SearchHit, VersionDescriptor, VersionRecord,
};
use crate::versions::{VersionStore, validate_article_id};
use crate::watcher::{ChangeEvent, ChangeKind, PathWatcher, WatchSignal, WatcherTask};
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Editor recorded on versions created through admin requests.
const ADMIN_EDITOR: &str = "admin";

/// Upper bound on `-N` suffixes tried when a new slug collides.
const MAX_SLUG_SUFFIX: usize = 100;

#[derive(Debug, Clone)]
enum Cached {
    Page(Arc<ArticlePage>),
    Article(Arc<Article>),
    Summaries(Arc<Vec<ArticleSummary>>),
    Tags(Arc<Vec<String>>),
    Categories(Arc<Categories>),
    Hits(Arc<Vec<SearchHit>>),
}

trait CachedValue: Sized {
    fn into_cached(self: Arc<Self>) -> Cached;
    fn from_cached(cached: Cached) -> Option<Arc<Self>>;
}

macro_rules! cached_value {
    ($ty:ty, $variant:ident) => {
        impl CachedValue for $ty {
            fn into_cached(self: Arc<Self>) -> Cached {
                Cached::$variant(self)
            }

            fn from_cached(cached: Cached) -> Option<Arc<Self>> {
                match cached {
                    Cached::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

cached_value!(ArticlePage, Page);
cached_value!(Article, Article);
cached_value!(Vec<ArticleSummary>, Summaries);
cached_value!(Vec<String>, Tags);
cached_value!(Categories, Categories);
cached_value!(Vec<SearchHit>, Hits);

/// What [`ContentService::apply_change`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// A new version was committed and published.
    Published { slug: String, version: u64 },
    /// The article was dropped from the index. Its history is kept.
    Removed { slug: String },
    /// The file matches the published article.
    Unchanged { slug: String },
    /// Not an article this store tracks.
    Ignored,
}

/// Tally of a [`ContentService::rescan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RescanReport {
    /// Files that produced a new version.
    pub published: usize,
    /// Articles whose file is gone.
    pub removed: usize,
    /// Files identical to the published article.
    pub unchanged: usize,
    /// Files that failed to read or parse.
    pub failed: usize,
}

impl RescanReport {
    fn record(&mut self, path: &Path, result: Result<ApplyOutcome>) {
        match result {
            Ok(ApplyOutcome::Published { .. }) => self.published += 1,
            Ok(ApplyOutcome::Removed { .. }) => self.removed += 1,
            Ok(ApplyOutcome::Unchanged { .. } | ApplyOutcome::Ignored) => self.unchanged += 1,
            Err(e) => {
                log_rejected(path, &e);
                self.failed += 1;
            },
        }
    }
}

struct Inner {
    config: Config,
    parser: FrontMatterParser,
    versions: VersionStore,
    index: ContentIndex,
    cache: ResponseCache<Cached>,
    search: SearchIndexer,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Live, versioned article store. Cheap to clone.
#[derive(Clone)]
pub struct ContentService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ContentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentService")
            .field("root", &self.root())
            .field("generation", &self.inner.index.current().generation())
            .field("search", &self.inner.search)
            .finish_non_exhaustive()
    }
}

impl ContentService {
    /// Open the store described by `config` and load every article.
    pub fn open(config: Config) -> Result<Self> {
        let search = SearchIndexer::from_config(&config)?;
        Self::open_with_search(config, search)
    }

    /// [`open`](Self::open) with an explicit search indexer.
    pub fn open_with_search(config: Config, search: SearchIndexer) -> Result<Self> {
        config.validate()?;

        if !config.article_dir.exists() {
            info!("Creating content directory {}", config.article_dir.display());
            fs::create_dir_all(&config.article_dir)?;
        }
        let root = fs::canonicalize(&config.article_dir)?;
        let versions = VersionStore::open(config.versions_root())?;

        let service = Self {
            inner: Arc::new(Inner {
                parser: FrontMatterParser::new(root, config.enable_nested_categories),
                versions,
                index: ContentIndex::new(),
                cache: ResponseCache::new(config.cache_max_capacity, config.cache_ttl()),
                search,
                locks: Mutex::new(HashMap::new()),
                config,
            }),
        };
        service.load_all()?;
        Ok(service)
    }

    fn load_all(&self) -> Result<()> {
        let inner = &self.inner;
        let mut owners: HashMap<String, PathBuf> = HashMap::new();
        let mut articles = Vec::new();

        for path in discover(self.root(), inner.config.enable_nested_categories) {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable {}: {e}", path.display());
                    continue;
                },
            };
            let mut article = match inner.parser.parse(&path, &bytes) {
                Ok(article) => article,
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    continue;
                },
            };
            if let Some(owner) = owners.get(&article.slug) {
                warn!(
                    "Skipping {}: slug '{}' already used by {}",
                    path.display(),
                    article.slug,
                    owner.display()
                );
                continue;
            }
            article.version = inner.versions.commit(&article.slug, &article.raw)?;
            owners.insert(article.slug.clone(), path);
            articles.push(Arc::new(article));
        }

        let snapshot = inner
            .index
            .publish_all(articles.iter().cloned().map(IndexChange::Upsert));
        inner.search.rebuild(&articles)?;
        info!(
            "Loaded {} articles from {} (generation {})",
            articles.len(),
            self.root().display(),
            snapshot.generation()
        );
        Ok(())
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Canonical content root.
    pub fn root(&self) -> &Path {
        self.inner.parser.root()
    }

    /// The snapshot currently served.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.inner.index.current()
    }

    // ---- reads -------------------------------------------------------

    /// One page of public articles matching `filter`.
    pub fn list_articles(
        &self,
        filter: &ListFilter,
        page: usize,
        limit: usize,
    ) -> Result<Arc<ArticlePage>> {
        let page = Page::new(page, limit, self.inner.config.max_page_size)?;
        let snapshot = self.snapshot();
        let filter = filter.normalized();
        let text = filter
            .query
            .as_deref()
            .filter(|_| self.inner.search.is_enabled());
        let key = format!(
            "list:g{}:s{}:{}:p{}:l{}",
            snapshot.generation(),
            self.search_generation(text.is_some()),
            filter.signature(),
            page.page,
            page.limit
        );
        self.cached(key, || {
            let matches = match text {
                Some(q) => Some(self.inner.search.matching_slugs(q)?),
                None => None,
            };
            Ok(Arc::new(snapshot.list(&filter, page, matches.as_ref())))
        })
    }

    /// A public article with its body.
    pub fn get_article(&self, slug: &str) -> Result<Arc<Article>> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(Error::ArticleNotFound(String::new()));
        }
        let snapshot = self.snapshot();
        let key = format!("article:g{}:{slug}", snapshot.generation());
        self.cached(key, || {
            snapshot
                .get(slug)
                .ok_or_else(|| Error::ArticleNotFound(slug.to_string()))
        })
    }

    /// The configured number of most recent articles.
    pub fn latest_articles(&self) -> Result<Arc<Vec<ArticleSummary>>> {
        let snapshot = self.snapshot();
        let count = self.inner.config.latest_articles_count;
        let key = format!("latest:g{}:{count}", snapshot.generation());
        self.cached(key, || Ok(Arc::new(snapshot.latest(count))))
    }

    /// Distinct tags of public articles, sorted.
    pub fn tags(&self) -> Result<Arc<Vec<String>>> {
        let snapshot = self.snapshot();
        let key = format!("tags:g{}", snapshot.generation());
        self.cached(key, || Ok(Arc::new(snapshot.tags())))
    }

    /// Flat list, or a tree when nested categories are enabled.
    pub fn categories(&self) -> Result<Arc<Categories>> {
        let snapshot = self.snapshot();
        let nested = self.inner.config.enable_nested_categories;
        let key = format!("categories:g{}:{nested}", snapshot.generation());
        self.cached(key, || Ok(Arc::new(snapshot.categories(nested))))
    }

    /// History of a live article, newest first.
    pub fn list_versions(&self, slug: &str) -> Result<Vec<VersionDescriptor>> {
        self.require_article(slug)?;
        Ok(self.inner.versions.list(slug.trim()))
    }

    /// One stored version of a live article.
    pub fn get_version(&self, slug: &str, version: u64) -> Result<Arc<VersionRecord>> {
        self.require_article(slug)?;
        self.inner.versions.get(slug.trim(), version)
    }

    /// Ranked full-text hits for `query`.
    ///
    /// The query counts toward popularity before it runs.
    pub fn search(&self, query: &str) -> Result<Arc<Vec<SearchHit>>> {
        let search = &self.inner.search;
        if !search.is_enabled() {
            return Err(Error::FullTextDisabled);
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::EmptySearchQuery);
        }
        search.record_query(query)?;

        let snapshot = self.snapshot();
        let key = format!(
            "search:g{}:s{}:{}",
            snapshot.generation(),
            search.generation(),
            query.to_lowercase()
        );
        self.cached(key, || {
            let hits = search
                .query(query)?
                .into_iter()
                .filter(|hit| snapshot.get(&hit.slug).is_some())
                .collect();
            Ok(Arc::new(hits))
        })
    }

    /// Most frequent searches, count descending then query ascending.
    pub fn popular_searches(&self, limit: usize) -> Result<Vec<PopularQuery>> {
        self.inner.search.popular(limit)
    }

    /// Response cache counters.
    pub fn cache_stats(&self) -> CacheStatsSummary {
        self.inner.cache.stats()
    }

    fn require_article(&self, slug: &str) -> Result<Arc<Article>> {
        let slug = slug.trim();
        self.snapshot()
            .get(slug)
            .ok_or_else(|| Error::ArticleNotFound(slug.to_string()))
    }

    fn search_generation(&self, used: bool) -> u64 {
        if used { self.inner.search.generation() } else { 0 }
    }

    fn cached<T: CachedValue>(
        &self,
        key: String,
        compute: impl FnOnce() -> Result<Arc<T>>,
    ) -> Result<Arc<T>> {
        if let Some(hit) = self.inner.cache.get(&key).and_then(T::from_cached) {
            return Ok(hit);
        }
        let value = compute()?;
        self.inner.cache.insert(key, Arc::clone(&value).into_cached());
        Ok(value)
    }

    // ---- mutations ---------------------------------------------------

    /// Bring the index in line with the file named by `event`.
    ///
    /// The file's current state decides the outcome, not the event kind, so
    /// stale or reordered events converge on what is on disk. A file that
    /// fails to parse leaves the published article untouched.
    pub async fn apply_change(&self, event: &ChangeEvent) -> Result<ApplyOutcome> {
        let path = event.path.as_path();
        if !is_article_file(path) || !self.tracks(path) {
            return Ok(ApplyOutcome::Ignored);
        }
        let slug = slug_for_path(path)?;
        if validate_article_id(&slug).is_err() {
            return Ok(ApplyOutcome::Ignored);
        }
        let _guard = self.lock_slug(&slug).await;
        debug!("Applying {:?} for {}", event.kind, path.display());

        match tokio::fs::read(path).await {
            Ok(bytes) => self.ingest(path, &bytes, None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(self.remove(&slug, path)),
            Err(e) => Err(e.into()),
        }
    }

    /// Reconcile the whole content tree against the current snapshot.
    pub async fn rescan(&self) -> Result<RescanReport> {
        let files = discover(self.root(), self.inner.config.enable_nested_categories);
        let on_disk: HashSet<&PathBuf> = files.iter().collect();
        let stale: Vec<PathBuf> = self
            .snapshot()
            .all()
            .filter(|a| !on_disk.contains(&a.source_path))
            .map(|a| a.source_path.clone())
            .collect();

        let mut report = RescanReport::default();
        for path in files.iter().chain(&stale) {
            let event = ChangeEvent::new(path.clone(), ChangeKind::Modified);
            report.record(path, self.apply_change(&event).await);
        }
        info!(
            "Rescan of {}: {} published, {} removed, {} unchanged, {} failed",
            self.root().display(),
            report.published,
            report.removed,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }

    /// Append version `version` of `slug` as its new current version and
    /// write it back to the article file.
    pub async fn restore_version(&self, slug: &str, version: u64, is_admin: bool) -> Result<u64> {
        if !is_admin {
            return Err(Error::Forbidden(format!(
                "Restoring '{slug}' requires admin rights"
            )));
        }
        let slug = slug.trim();
        validate_article_id(slug)?;
        let _guard = self.lock_slug(slug).await;

        let record = self.inner.versions.get(slug, version)?;
        let path = self
            .snapshot()
            .get_any(slug)
            .map_or_else(|| self.root().join(format!("{slug}.md")), |a| a.source_path.clone());
        let mut article = self.inner.parser.parse(&path, record.content.as_bytes())?;

        let previous = fs::read(&path).ok();
        write_atomically(&path, record.content.as_bytes())?;
        let new_version = match self
            .inner
            .versions
            .restore_as(slug, version, Some(ADMIN_EDITOR))
        {
            Ok(v) => v,
            Err(e) => {
                roll_back(&path, previous.as_deref());
                return Err(e);
            },
        };

        article.version = new_version;
        self.publish_upsert(Arc::new(article));
        info!("Restored {slug} v{version} as v{new_version}");
        Ok(new_version)
    }

    /// Write a new article file and publish it.
    ///
    /// The slug is derived from the title; collisions get a `-2`, `-3`, …
    /// suffix.
    pub async fn create_article(&self, input: &ArticleInput, is_admin: bool) -> Result<Arc<Article>> {
        if !is_admin {
            return Err(Error::Forbidden("Creating articles requires admin rights".into()));
        }
        validate_input(input)?;
        let base = slugify(&input.title);
        let candidates = std::iter::once(base.clone())
            .chain((2..=MAX_SLUG_SUFFIX).map(|n| format!("{base}-{n}")));

        for slug in candidates {
            // Checked under the lock so concurrent creates never pick the same slug.
            let _guard = self.lock_slug(&slug).await;
            if self.slug_taken(&slug) {
                continue;
            }

            let path = self.root().join(format!("{slug}.md"));
            let text = render(input, Utc::now(), None)?;
            write_atomically(&path, text.as_bytes())?;
            return match self.ingest(&path, text.as_bytes(), Some(ADMIN_EDITOR)) {
                Ok(_) => self.authored(&slug),
                Err(e) => {
                    roll_back(&path, None);
                    Err(e)
                },
            };
        }
        Err(Error::InvalidInput(format!("No free slug for '{base}'")))
    }

    /// Rewrite an existing article from author input and publish it.
    pub async fn update_article(
        &self,
        slug: &str,
        input: &ArticleInput,
        is_admin: bool,
    ) -> Result<Arc<Article>> {
        if !is_admin {
            return Err(Error::Forbidden(format!(
                "Updating '{slug}' requires admin rights"
            )));
        }
        validate_input(input)?;
        let slug = slug.trim();
        validate_article_id(slug)?;
        let _guard = self.lock_slug(slug).await;

        let existing = self
            .snapshot()
            .get_any(slug)
            .ok_or_else(|| Error::ArticleNotFound(slug.to_string()))?;
        let text = render(input, existing.meta.created_at, Some(Utc::now()))?;
        let path = existing.source_path.clone();

        let previous = fs::read(&path).ok();
        write_atomically(&path, text.as_bytes())?;
        match self.ingest(&path, text.as_bytes(), Some(ADMIN_EDITOR)) {
            Ok(_) => self.authored(slug),
            Err(e) => {
                roll_back(&path, previous.as_deref());
                Err(e)
            },
        }
    }

    /// Parse, commit and publish one file. Caller holds the slug lock.
    fn ingest(&self, path: &Path, bytes: &[u8], editor: Option<&str>) -> Result<ApplyOutcome> {
        let mut article = self.inner.parser.parse(path, bytes)?;

        if let Some(existing) = self.snapshot().get_any(&article.slug) {
            if existing.source_path != path && existing.source_path.exists() {
                return Err(Error::InvalidInput(format!(
                    "Slug '{}' is already used by {}",
                    article.slug,
                    existing.source_path.display()
                )));
            }
            if existing.source_path == path && existing.checksum == article.checksum {
                return Ok(ApplyOutcome::Unchanged {
                    slug: article.slug,
                });
            }
        }

        let version = self
            .inner
            .versions
            .commit_as(&article.slug, &article.raw, editor)?;
        article.version = version;
        let slug = article.slug.clone();
        self.publish_upsert(Arc::new(article));
        info!("Published {slug} v{version}");
        Ok(ApplyOutcome::Published { slug, version })
    }

    fn remove(&self, slug: &str, path: &Path) -> ApplyOutcome {
        let owned = self
            .snapshot()
            .get_any(slug)
            .is_some_and(|a| a.source_path == path);
        if !owned {
            return ApplyOutcome::Ignored;
        }

        self.inner.index.publish(IndexChange::Remove(slug.to_string()));
        self.invalidate();
        if let Err(e) = self.inner.search.remove(slug) {
            error!("Failed to drop {slug} from the search index: {e}");
        }
        info!("Removed {slug}");
        ApplyOutcome::Removed {
            slug: slug.to_string(),
        }
    }

    fn publish_upsert(&self, article: Arc<Article>) {
        self.inner
            .index
            .publish(IndexChange::Upsert(Arc::clone(&article)));
        self.invalidate();
        if let Err(e) = self.inner.search.reindex(&article) {
            error!("Failed to reindex {}: {e}", article.slug);
        }
    }

    fn invalidate(&self) {
        let dropped = self.inner.cache.invalidate_all();
        debug!("Invalidated {dropped} cached responses");
    }

    fn authored(&self, slug: &str) -> Result<Arc<Article>> {
        self.snapshot()
            .get_any(slug)
            .ok_or_else(|| Error::ArticleNotFound(slug.to_string()))
    }

    fn slug_taken(&self, slug: &str) -> bool {
        self.snapshot().get_any(slug).is_some() || self.root().join(format!("{slug}.md")).exists()
    }

    /// Whether `path` lies where this store loads articles from.
    fn tracks(&self, path: &Path) -> bool {
        if self.inner.config.enable_nested_categories {
            path.starts_with(self.root())
        } else {
            path.parent() == Some(self.root())
        }
    }

    async fn lock_slug(&self, slug: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.locks.lock();
            Arc::clone(locks.entry(slug.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    // ---- lifecycle ---------------------------------------------------

    /// Start watching the content root.
    ///
    /// Changes are applied by one background task in the order the watcher
    /// releases them. Must be called inside a tokio runtime.
    pub fn watch(&self) -> WatchHandle {
        let watcher = PathWatcher::new(self.root(), self.inner.config.debounce());
        let (task, signals) = watcher.spawn();
        let consumer = tokio::spawn(consume(self.clone(), signals));
        WatchHandle {
            watcher: task,
            consumer,
        }
    }

    /// Persist popular queries and drop process-scoped state.
    pub fn shutdown(&self) -> Result<()> {
        if let Some(tracker) = self.inner.search.tracker() {
            if let Some(path) = &self.inner.config.popular_queries_path {
                tracker.save(path)?;
                debug!("Saved {} popular queries to {}", tracker.len(), path.display());
            }
            tracker.reset();
        }
        self.invalidate();
        info!("Content service shut down");
        Ok(())
    }
}

/// Running watcher plus its change consumer.
#[derive(Debug)]
pub struct WatchHandle {
    watcher: WatcherTask,
    consumer: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop watching. Changes already released are applied first.
    pub async fn stop(self) {
        self.watcher.stop().await;
        if let Err(e) = self.consumer.await {
            warn!("Change consumer ended abnormally: {e}");
        }
    }
}

async fn consume(service: ContentService, mut signals: mpsc::UnboundedReceiver<WatchSignal>) {
    while let Some(signal) = signals.recv().await {
        match signal {
            WatchSignal::Change(change) => match service.apply_change(&change).await {
                Ok(ApplyOutcome::Ignored) => {},
                Ok(outcome) => debug!("{}: {outcome:?}", change.path.display()),
                Err(e) => log_rejected(&change.path, &e),
            },
            WatchSignal::Rescan => {
                if let Err(e) = service.rescan().await {
                    error!("Rescan failed: {e}");
                }
            },
        }
    }
    debug!("Change consumer finished");
}

fn log_rejected(path: &Path, e: &Error) {
    match e {
        Error::Parse(_) | Error::InvalidInput(_) => {
            warn!("Keeping previous state for {}: {e}", path.display());
        },
        _ => error!("Failed to apply change to {}: {e}", path.display()),
    }
}

fn validate_input(input: &ArticleInput) -> Result<()> {
    if input.title.trim().is_empty() {
        return Err(Error::InvalidInput("Title cannot be empty".into()));
    }
    if input.content.trim().is_empty() {
        return Err(Error::InvalidInput("Content cannot be empty".into()));
    }
    Ok(())
}

/// Article files under `root`, sorted by path. Top level only unless
/// `nested`; hidden directories are skipped.
fn discover(root: &Path, nested: bool) -> Vec<PathBuf> {
    let max_depth = if nested { usize::MAX } else { 1 };
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with('.'))
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {e}", root.display());
                None
            },
        })
        .filter(|entry| entry.file_type().is_file() && is_article_file(entry.path()))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

fn roll_back(path: &Path, previous: Option<&[u8]>) {
    let result = match previous {
        Some(bytes) => write_atomically(path, bytes),
        None => fs::remove_file(path).map_err(Error::from),
    };
    if let Err(e) = result {
        error!("Failed to roll back {}: {e}", path.display());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            article_dir: dir.path().join("articles"),
            data_dir: dir.path().join("data"),
            ..Config::default()
        }
    }

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        path
    }

    fn article_text(title: &str, date: &str) -> String {
        format!("---\ntitle: {title}\ndate: {date}\ntags: [rust]\n---\n\nBody of {title}\n")
    }

    #[test]
    fn test_open_loads_top_level_articles() {
        // Given: Two valid articles, one broken file and one nested file
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        write(&cfg.article_dir, "a.md", &article_text("A", "2024-01-01"));
        write(&cfg.article_dir, "b.md", &article_text("B", "2024-02-01"));
        write(&cfg.article_dir, "broken.md", "no front matter");
        write(&cfg.article_dir, "README.md", &article_text("Readme", "2024-01-01"));
        write(&cfg.article_dir, "deep/c.md", &article_text("C", "2024-03-01"));

        // When: Opening the store
        let service = ContentService::open(cfg).unwrap();

        // Then: Only the valid top-level articles are served, newest first
        let latest = service.latest_articles().unwrap();
        let slugs: Vec<_> = latest.iter().map(|a| a.slug.as_str()).collect();
        assert_eq!(slugs, vec!["b", "a"]);
        assert_eq!(service.get_article("a").unwrap().version, 1);
        assert!(matches!(
            service.get_article("c"),
            Err(Error::ArticleNotFound(_))
        ));
    }

    #[test]
    fn test_nested_categories_load_subdirectories() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.enable_nested_categories = true;
        write(&cfg.article_dir, "guides/rust/ownership.md", &article_text("Ownership", "2024-01-01"));
        write(&cfg.article_dir, ".hidden/secret.md", &article_text("Secret", "2024-01-01"));

        let service = ContentService::open(cfg).unwrap();
        let article = service.get_article("ownership").unwrap();
        assert_eq!(article.meta.category.as_deref(), Some("guides/rust"));
        assert!(service.get_article("secret").is_err());

        let categories = service.categories().unwrap();
        let Categories::Nested(tree) = categories.as_ref() else {
            panic!("expected nested categories");
        };
        assert_eq!(tree[0].name, "guides");
        assert_eq!(tree[0].count, 1);
    }

    #[test]
    fn test_reopen_does_not_duplicate_versions() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        write(&cfg.article_dir, "a.md", &article_text("A", "2024-01-01"));

        let first = ContentService::open(cfg.clone()).unwrap();
        assert_eq!(first.list_versions("a").unwrap().len(), 1);
        drop(first);

        let second = ContentService::open(cfg).unwrap();
        assert_eq!(second.list_versions("a").unwrap().len(), 1);
        assert_eq!(second.get_article("a").unwrap().version, 1);
    }

    #[test]
    fn test_pagination_bounds() {
        let dir = TempDir::new().unwrap();
        let service = ContentService::open(config(&dir)).unwrap();
        let filter = ListFilter::default();
        assert!(matches!(
            service.list_articles(&filter, 0, 10),
            Err(Error::BadPagination(_))
        ));
        assert!(matches!(
            service.list_articles(&filter, 1, 101),
            Err(Error::BadPagination(_))
        ));
        assert_eq!(service.list_articles(&filter, 1, 100).unwrap().total, 0);
    }

    #[test]
    fn test_blank_tag_listing_does_not_poison_unfiltered_listing() {
        // Given: A store with one article
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        write(&cfg.article_dir, "a.md", &article_text("A", "2024-01-01"));
        let service = ContentService::open(cfg).unwrap();

        // When: Listing with a blank tag, then with no filter
        let blank = ListFilter {
            tag: Some(String::new()),
            ..ListFilter::default()
        };
        let with_blank = service.list_articles(&blank, 1, 10).unwrap();
        let plain = service.list_articles(&ListFilter::default(), 1, 10).unwrap();

        // Then: A blank tag is no filter and both answers count the article
        assert_eq!(with_blank.total, 1);
        assert_eq!(plain.total, 1);
        assert_eq!(plain.articles[0].slug, "a");
    }

    #[test]
    fn test_full_text_listing_counts_every_match() {
        // Given: More matching articles than the search result limit
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.enable_full_text_search = true;
        cfg.search_result_limit = 20;
        for i in 0..25 {
            write(
                &cfg.article_dir,
                &format!("post-{i:02}.md"),
                &article_text(&format!("Rust {i}"), "2024-01-01"),
            );
        }
        let service = ContentService::open(cfg).unwrap();

        // When: Filtering the listing by free text
        let filter = ListFilter {
            query: Some("rust".into()),
            ..ListFilter::default()
        };
        let page = service.list_articles(&filter, 1, 100).unwrap();
        let second = service.list_articles(&filter, 2, 20).unwrap();

        // Then: Totals and later pages cover all matches
        assert_eq!(page.total, 25);
        assert_eq!(page.articles.len(), 25);
        assert_eq!(second.articles.len(), 5);
        assert_eq!(second.total_pages, 2);
        // Ranked search keeps its cap.
        assert_eq!(service.search("rust").unwrap().len(), 20);
    }

    #[test]
    fn test_huge_cache_ttl_does_not_abort_reads() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.cache_ttl_seconds = u64::MAX;
        write(&cfg.article_dir, "a.md", &article_text("A", "2024-01-01"));
        cfg.validate().unwrap();

        let service = ContentService::open(cfg).unwrap();
        assert_eq!(service.get_article("a").unwrap().title, "A");
        assert_eq!(service.get_article("a").unwrap().title, "A");
        assert_eq!(service.cache_stats().hits, 1);
    }

    #[test]
    fn test_search_disabled_precedes_empty_query() {
        let dir = TempDir::new().unwrap();
        let service = ContentService::open(config(&dir)).unwrap();
        assert!(matches!(service.search(""), Err(Error::FullTextDisabled)));
        assert!(matches!(service.search("rust"), Err(Error::FullTextDisabled)));
        assert!(matches!(
            service.popular_searches(5),
            Err(Error::FullTextDisabled)
        ));
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_article() {
        // Given: A published article
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let path = write(&cfg.article_dir, "a.md", &article_text("A", "2024-01-01"));
        let service = ContentService::open(cfg).unwrap();
        let path = fs::canonicalize(path).unwrap();

        // When: The file is overwritten with invalid front matter
        fs::write(&path, "---\ntitle: [unterminated\n---\nbody").unwrap();
        let result = service
            .apply_change(&ChangeEvent::new(&path, ChangeKind::Modified))
            .await;

        // Then: The error is reported and the old article is still served
        assert!(matches!(result, Err(Error::Parse(_))));
        assert_eq!(service.get_article("a").unwrap().title, "A");
        assert_eq!(service.list_versions("a").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_file_is_not_recommitted() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let path = write(&cfg.article_dir, "a.md", &article_text("A", "2024-01-01"));
        let service = ContentService::open(cfg).unwrap();
        let path = fs::canonicalize(path).unwrap();
        let generation = service.snapshot().generation();

        let outcome = service
            .apply_change(&ChangeEvent::new(&path, ChangeKind::Modified))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged { slug: "a".into() });
        assert_eq!(service.snapshot().generation(), generation);
    }

    #[tokio::test]
    async fn test_non_article_paths_are_ignored() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let service = ContentService::open(cfg).unwrap();
        let outside = dir.path().join("elsewhere.md");
        fs::write(&outside, article_text("Out", "2024-01-01")).unwrap();
        let notes = service.root().join("notes.txt");

        for path in [outside, notes] {
            let outcome = service
                .apply_change(&ChangeEvent::new(&path, ChangeKind::Created))
                .await
                .unwrap();
            assert_eq!(outcome, ApplyOutcome::Ignored);
        }
    }

    #[tokio::test]
    async fn test_create_and_update_require_admin() {
        let dir = TempDir::new().unwrap();
        let service = ContentService::open(config(&dir)).unwrap();
        let input = ArticleInput {
            title: "Fresh".into(),
            content: "Hello".into(),
            ..ArticleInput::default()
        };
        assert!(matches!(
            service.create_article(&input, false).await,
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            service.update_article("fresh", &input, false).await,
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_create_picks_free_slug() {
        let dir = TempDir::new().unwrap();
        let service = ContentService::open(config(&dir)).unwrap();
        let input = ArticleInput {
            title: "Hello World".into(),
            tags: vec!["intro".into()],
            content: "First post".into(),
            ..ArticleInput::default()
        };

        let first = service.create_article(&input, true).await.unwrap();
        let second = service.create_article(&input, true).await.unwrap();

        assert_eq!(first.slug, "hello-world");
        assert_eq!(second.slug, "hello-world-2");
        assert_eq!(first.version, 1);
        assert!(service.root().join("hello-world-2.md").exists());
        let versions = service.list_versions("hello-world").unwrap();
        assert_eq!(versions[0].editor.as_deref(), Some(ADMIN_EDITOR));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_creates_get_distinct_slugs() {
        // Given: Two admins creating articles with the same title at once
        let dir = TempDir::new().unwrap();
        let service = ContentService::open(config(&dir)).unwrap();
        let input = ArticleInput {
            title: "Hello World".into(),
            content: "Body".into(),
            ..ArticleInput::default()
        };
        let spawn_create = |service: ContentService, input: ArticleInput| {
            tokio::spawn(async move { service.create_article(&input, true).await })
        };

        // When: Both run concurrently
        let (a, b) = tokio::join!(
            spawn_create(service.clone(), input.clone()),
            spawn_create(service.clone(), input)
        );

        // Then: Both succeed with distinct slugs
        let mut slugs = vec![a.unwrap().unwrap().slug.clone(), b.unwrap().unwrap().slug.clone()];
        slugs.sort();
        assert_eq!(slugs, vec!["hello-world", "hello-world-2"]);
        assert_eq!(service.list_articles(&ListFilter::default(), 1, 10).unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_input() {
        let dir = TempDir::new().unwrap();
        let service = ContentService::open(config(&dir)).unwrap();
        let input = ArticleInput {
            title: "  ".into(),
            content: "x".into(),
            ..ArticleInput::default()
        };
        assert!(matches!(
            service.create_article(&input, true).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_update_keeps_created_date() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        write(&cfg.article_dir, "a.md", &article_text("A", "2024-01-01"));
        let service = ContentService::open(cfg).unwrap();
        let created = service.get_article("a").unwrap().meta.created_at;

        let input = ArticleInput {
            title: "A revised".into(),
            content: "New body".into(),
            ..ArticleInput::default()
        };
        let updated = service.update_article("a", &input, true).await.unwrap();

        assert_eq!(updated.title, "A revised");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.meta.created_at, created);
        assert!(updated.meta.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_rescan_picks_up_missed_changes() {
        // Given: A store whose files change without events
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let a = write(&cfg.article_dir, "a.md", &article_text("A", "2024-01-01"));
        let service = ContentService::open(cfg.clone()).unwrap();
        fs::remove_file(a).unwrap();
        write(&cfg.article_dir, "b.md", &article_text("B", "2024-01-02"));

        // When: Rescanning
        let report = service.rescan().await.unwrap();

        // Then: The index matches the directory
        assert_eq!(report.published, 1);
        assert_eq!(report.removed, 1);
        assert!(service.get_article("a").is_err());
        assert_eq!(service.get_article("b").unwrap().title, "B");
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["b.md", "a.md", "#draft.md#", ".hidden.md", "notes.txt"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let names: Vec<_> = discover(dir.path(), false)
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.md", "b.md"]);
    }
}
