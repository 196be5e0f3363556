//! Optional full-text search and popular-query tracking.
//!
//! [`SearchIndexer`] is either disabled, in which case every query answers
//! [`Error::FullTextDisabled`], or wraps a [`FullTextBackend`]. The bundled
//! backend is [`TantivyBackend`].
//!
//! ## Ranking
//!
//! Title, description, body and tags are indexed twice: once with the
//! default tokenizer and once with the English stemmer. The exact fields are
//! boosted above the stemmed ones, so a document containing the literal
//! query term outranks one that only matches after stemming.

use crate::config::Config;
use crate::types::{Article, PopularQuery, SearchHit};
use crate::{Error, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{Query, QueryParser};
use tantivy::schema::{
    Field, IndexRecordOption, STORED, STRING, Schema, TEXT, TextFieldIndexing, TextOptions, Value,
};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term, doc};
use tracing::{debug, info, warn};

const SNIPPET_LEN: usize = 160;
const MAX_TRACKED_QUERIES: usize = 10_000;

/// Storage and ranking engine behind [`SearchIndexer`].
pub trait FullTextBackend: Send + Sync {
    /// Replace the postings for `article.slug`. Drafts are removed instead.
    fn upsert(&self, article: &Article) -> Result<()>;

    /// Drop the postings for `slug`.
    fn remove(&self, slug: &str) -> Result<()>;

    /// Replace the whole index with `articles`.
    fn rebuild(&self, articles: &[Arc<Article>]) -> Result<()>;

    /// Ranked hits for a non-blank query, best first.
    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Every slug matching a non-blank query, unranked and uncapped.
    fn matching_slugs(&self, query: &str) -> Result<HashSet<String>>;
}

#[derive(Debug, Clone, Copy)]
struct Fields {
    slug: Field,
    title: Field,
    description: Field,
    body: Field,
    tags: Field,
    title_stem: Field,
    description_stem: Field,
    body_stem: Field,
}

impl Fields {
    fn schema() -> (Schema, Self) {
        let stemmed = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );

        let mut builder = Schema::builder();
        let fields = Self {
            slug: builder.add_text_field("slug", STRING | STORED),
            title: builder.add_text_field("title", TEXT | STORED),
            description: builder.add_text_field("description", TEXT),
            body: builder.add_text_field("body", TEXT | STORED),
            tags: builder.add_text_field("tags", TEXT),
            title_stem: builder.add_text_field("title_stem", stemmed.clone()),
            description_stem: builder.add_text_field("description_stem", stemmed.clone()),
            body_stem: builder.add_text_field("body_stem", stemmed),
        };
        (builder.build(), fields)
    }
}

/// Tantivy-backed index held in RAM or in a directory.
pub struct TantivyBackend {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl TantivyBackend {
    /// Index that lives only in memory.
    pub fn in_ram(heap_size: usize) -> Result<Self> {
        let (schema, fields) = Fields::schema();
        Self::from_index(Index::create_in_ram(schema), fields, heap_size)
    }

    /// Open the index in `dir`, creating it if needed.
    pub fn open_or_create(dir: &Path, heap_size: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Index(format!("Failed to create index directory: {e}")))?;
        let directory = MmapDirectory::open(dir)
            .map_err(|e| Error::Index(format!("Failed to open index directory: {e}")))?;
        let (schema, fields) = Fields::schema();
        let index = Index::open_or_create(directory, schema)
            .map_err(|e| Error::Index(format!("Failed to open index: {e}")))?;
        Self::from_index(index, fields, heap_size)
    }

    fn from_index(index: Index, fields: Fields, heap_size: usize) -> Result<Self> {
        let writer = index
            .writer(heap_size)
            .map_err(|e| Error::Index(format!("Failed to create writer: {e}")))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| Error::Index(format!("Failed to create reader: {e}")))?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn document(&self, article: &Article) -> TantivyDocument {
        let f = self.fields;
        doc!(
            f.slug => article.slug.as_str(),
            f.title => article.title.as_str(),
            f.description => article.meta.description.as_str(),
            f.body => article.body.as_str(),
            f.tags => article.meta.tags.join(" "),
            f.title_stem => article.title.as_str(),
            f.description_stem => article.meta.description.as_str(),
            f.body_stem => article.body.as_str(),
        )
    }

    fn commit(&self, writer: &mut IndexWriter) -> Result<()> {
        writer
            .commit()
            .map_err(|e| Error::Index(format!("Failed to commit: {e}")))?;
        self.reader
            .reload()
            .map_err(|e| Error::Index(format!("Failed to reload reader: {e}")))
    }

    fn parser(&self) -> QueryParser {
        let f = self.fields;
        let mut parser = QueryParser::for_index(
            &self.index,
            vec![
                f.title,
                f.description,
                f.body,
                f.tags,
                f.title_stem,
                f.description_stem,
                f.body_stem,
            ],
        );
        parser.set_field_boost(f.title, 4.0);
        parser.set_field_boost(f.tags, 3.0);
        parser.set_field_boost(f.description, 2.0);
        parser.set_field_boost(f.body, 2.0);
        parser.set_field_boost(f.title_stem, 1.0);
        parser.set_field_boost(f.description_stem, 0.5);
        parser.set_field_boost(f.body_stem, 0.5);
        parser
    }

    fn field_text(doc: &TantivyDocument, field: Field) -> Result<String> {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::Index("Field not found in document".into()))
    }

    fn parse(&self, query: &str) -> Box<dyn Query> {
        let parser = self.parser();
        let escaped = escape_query(query);
        match parser.parse_query(&escaped) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Strict parse of '{query}' failed ({e}), retrying leniently");
                parser.parse_query_lenient(&escaped).0
            },
        }
    }
}

impl FullTextBackend for TantivyBackend {
    fn upsert(&self, article: &Article) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.fields.slug, &article.slug));
        if !article.meta.draft {
            writer
                .add_document(self.document(article))
                .map_err(|e| Error::Index(format!("Failed to add document: {e}")))?;
        }
        self.commit(&mut writer)?;
        debug!("Reindexed {}", article.slug);
        Ok(())
    }

    fn remove(&self, slug: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.fields.slug, slug));
        self.commit(&mut writer)
    }

    fn rebuild(&self, articles: &[Arc<Article>]) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .delete_all_documents()
            .map_err(|e| Error::Index(format!("Failed to clear index: {e}")))?;
        let mut indexed = 0usize;
        for article in articles.iter().filter(|a| !a.meta.draft) {
            writer
                .add_document(self.document(article))
                .map_err(|e| Error::Index(format!("Failed to add document: {e}")))?;
            indexed += 1;
        }
        self.commit(&mut writer)?;
        info!("Built search index with {indexed} articles");
        Ok(())
    }

    fn query(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let parsed = self.parse(query);
        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&*parsed, &TopDocs::with_limit(limit))
            .map_err(|e| Error::Index(format!("Search failed: {e}")))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::Index(format!("Failed to retrieve doc: {e}")))?;
            let body = Self::field_text(&doc, self.fields.body)?;
            hits.push(SearchHit {
                slug: Self::field_text(&doc, self.fields.slug)?,
                title: Self::field_text(&doc, self.fields.title)?,
                score,
                snippet: extract_snippet(&body, query, SNIPPET_LEN),
            });
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.slug.cmp(&b.slug)));
        Ok(hits)
    }

    fn matching_slugs(&self, query: &str) -> Result<HashSet<String>> {
        let parsed = self.parse(query);
        let searcher = self.reader.searcher();
        let addresses = searcher
            .search(&*parsed, &DocSetCollector)
            .map_err(|e| Error::Index(format!("Search failed: {e}")))?;

        let mut slugs = HashSet::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::Index(format!("Failed to retrieve doc: {e}")))?;
            slugs.insert(Self::field_text(&doc, self.fields.slug)?);
        }
        Ok(slugs)
    }
}

/// Escape Tantivy query syntax so user input is searched literally.
fn escape_query(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() * 2);
    for ch in query.chars() {
        if matches!(
            ch,
            '\\' | '"' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '~' | ':' | '*' | '!'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Window of `content` around the first query term it contains.
fn extract_snippet(content: &str, query: &str, max_len: usize) -> String {
    let content_lower = content.to_lowercase();
    let position = query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter_map(|term| content_lower.find(&term))
        .min();

    // Lowercasing can shift byte offsets for some scripts; only trust the
    // position when both strings line up.
    let position = position.filter(|_| content_lower.len() == content.len());

    let start_byte = position.map_or(0, |p| p.saturating_sub(max_len / 3));
    let start = floor_char_boundary(content, start_byte);
    let end = floor_char_boundary(content, (start + max_len).min(content.len()));

    let mut snippet = String::with_capacity(end - start + 6);
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.push_str(content[start..end].trim());
    if end < content.len() {
        snippet.push_str("...");
    }
    snippet
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[derive(Debug, Clone)]
struct QueryStat {
    count: u64,
    last_seen: chrono::DateTime<Utc>,
}

/// Process-scoped popular-query counter.
#[derive(Debug, Default)]
pub struct QueryTracker {
    counts: Mutex<HashMap<String, QueryStat>>,
}

impl QueryTracker {
    /// Empty instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence. Blank queries are ignored.
    pub fn record(&self, query: &str) {
        let Some(normalized) = normalize_query(query) else {
            return;
        };
        let now = Utc::now();
        let mut counts = self.counts.lock();
        if let Some(stat) = counts.get_mut(&normalized) {
            stat.count += 1;
            stat.last_seen = now;
            return;
        }
        if counts.len() >= MAX_TRACKED_QUERIES {
            // Forget the least popular, stalest entry.
            if let Some(victim) = counts
                .iter()
                .min_by(|a, b| {
                    a.1.count
                        .cmp(&b.1.count)
                        .then_with(|| a.1.last_seen.cmp(&b.1.last_seen))
                })
                .map(|(query, _)| query.clone())
            {
                counts.remove(&victim);
            }
        }
        counts.insert(
            normalized,
            QueryStat {
                count: 1,
                last_seen: now,
            },
        );
    }

    /// Top `limit` queries by count, ties broken by query text.
    pub fn popular(&self, limit: usize) -> Vec<PopularQuery> {
        let mut all = self.snapshot();
        all.truncate(limit);
        all
    }

    /// Every tracked query in popularity order.
    pub fn snapshot(&self) -> Vec<PopularQuery> {
        let mut all: Vec<PopularQuery> = self
            .counts
            .lock()
            .iter()
            .map(|(query, stat)| PopularQuery {
                query: query.clone(),
                count: stat.count,
                last_seen: stat.last_seen,
            })
            .collect();
        all.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.query.cmp(&b.query)));
        all
    }

    /// Distinct queries tracked.
    pub fn len(&self) -> usize {
        self.counts.lock().len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.counts.lock().is_empty()
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.counts.lock().clear();
    }

    /// Merge counts previously written by [`save`](Self::save).
    pub fn load(&self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let bytes = std::fs::read(path)?;
        let saved: Vec<PopularQuery> = serde_json::from_slice(&bytes)?;
        let mut counts = self.counts.lock();
        for entry in &saved {
            let Some(normalized) = normalize_query(&entry.query) else {
                continue;
            };
            let stat = counts.entry(normalized).or_insert(QueryStat {
                count: 0,
                last_seen: entry.last_seen,
            });
            stat.count += entry.count;
            stat.last_seen = stat.last_seen.max(entry.last_seen);
        }
        Ok(saved.len())
    }

    /// Write all counts to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.snapshot())?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.persist(path)
            .map_err(|e| Error::Storage(format!("Failed to save popular queries: {}", e.error)))?;
        Ok(())
    }
}

/// Trim, collapse inner whitespace and lowercase. `None` when blank.
pub fn normalize_query(query: &str) -> Option<String> {
    let normalized = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

struct EnabledSearch {
    backend: Arc<dyn FullTextBackend>,
    tracker: QueryTracker,
    generation: AtomicU64,
    limit: usize,
}

/// Full-text capability, present or explicitly disabled.
pub struct SearchIndexer {
    inner: Option<EnabledSearch>,
}

impl std::fmt::Debug for SearchIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchIndexer")
            .field("enabled", &self.is_enabled())
            .field("generation", &self.generation())
            .finish()
    }
}

impl SearchIndexer {
    /// Indexer that answers every query with `FullTextDisabled`.
    pub const fn disabled() -> Self {
        Self { inner: None }
    }

    /// Enabled indexer over a custom backend.
    pub fn with_backend(backend: Arc<dyn FullTextBackend>, limit: usize) -> Self {
        Self {
            inner: Some(EnabledSearch {
                backend,
                tracker: QueryTracker::new(),
                generation: AtomicU64::new(0),
                limit,
            }),
        }
    }

    /// Build the indexer described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.enable_full_text_search {
            return Ok(Self::disabled());
        }
        let backend = match &config.search_index_dir {
            Some(dir) => TantivyBackend::open_or_create(dir, config.search_index_heap_size)?,
            None => TantivyBackend::in_ram(config.search_index_heap_size)?,
        };
        let indexer = Self::with_backend(Arc::new(backend), config.search_result_limit);
        if let (Some(path), Some(enabled)) = (&config.popular_queries_path, &indexer.inner) {
            match enabled.tracker.load(path) {
                Ok(loaded) => debug!("Loaded {loaded} popular queries from {}", path.display()),
                Err(e) => warn!("Ignoring unreadable popular queries file {}: {e}", path.display()),
            }
        }
        Ok(indexer)
    }

    /// Whether full-text search is on.
    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Bumped on every index change; 0 when disabled.
    pub fn generation(&self) -> u64 {
        self.inner
            .as_ref()
            .map_or(0, |s| s.generation.load(Ordering::Acquire))
    }

    /// Update postings for one article. No-op when disabled.
    pub fn reindex(&self, article: &Article) -> Result<()> {
        let Some(search) = &self.inner else {
            return Ok(());
        };
        search.backend.upsert(article)?;
        search.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop postings for a removed article. No-op when disabled.
    pub fn remove(&self, slug: &str) -> Result<()> {
        let Some(search) = &self.inner else {
            return Ok(());
        };
        search.backend.remove(slug)?;
        search.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Replace the index contents. No-op when disabled.
    pub fn rebuild(&self, articles: &[Arc<Article>]) -> Result<()> {
        let Some(search) = &self.inner else {
            return Ok(());
        };
        search.backend.rebuild(articles)?;
        search.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Ranked hits for `query`.
    ///
    /// Checks the capability before the query text, so a disabled indexer
    /// answers `FullTextDisabled` even for blank input.
    pub fn query(&self, query: &str) -> Result<Vec<SearchHit>> {
        let search = self.enabled()?;
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::EmptySearchQuery);
        }
        search.backend.query(query, search.limit)
    }

    /// Every slug matching `query`. Unlike [`Self::query`] the result
    /// limit does not apply, so listing filters see all matches.
    pub fn matching_slugs(&self, query: &str) -> Result<HashSet<String>> {
        let search = self.enabled()?;
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::EmptySearchQuery);
        }
        search.backend.matching_slugs(query)
    }

    /// Count a query toward popularity.
    pub fn record_query(&self, query: &str) -> Result<()> {
        self.enabled()?.tracker.record(query);
        Ok(())
    }

    /// Most frequent queries.
    pub fn popular(&self, limit: usize) -> Result<Vec<PopularQuery>> {
        Ok(self.enabled()?.tracker.popular(limit))
    }

    /// The tracker, when enabled.
    pub fn tracker(&self) -> Option<&QueryTracker> {
        self.inner.as_ref().map(|s| &s.tracker)
    }

    fn enabled(&self) -> Result<&EnabledSearch> {
        self.inner.as_ref().ok_or(Error::FullTextDisabled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::ArticleMeta;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn article(slug: &str, title: &str, body: &str) -> Arc<Article> {
        Arc::new(Article {
            slug: slug.to_string(),
            title: title.to_string(),
            meta: ArticleMeta {
                description: String::new(),
                author: None,
                tags: vec![],
                category: None,
                draft: false,
                created_at: Utc::now(),
                updated_at: None,
            },
            body: body.to_string(),
            raw: String::new(),
            source_path: PathBuf::new(),
            version: 1,
            checksum: String::new(),
        })
    }

    fn enabled() -> SearchIndexer {
        SearchIndexer::with_backend(Arc::new(TantivyBackend::in_ram(15_000_000).unwrap()), 20)
    }

    #[test]
    fn test_disabled_signals_instead_of_empty() {
        let search = SearchIndexer::disabled();
        assert!(matches!(search.query("hello"), Err(Error::FullTextDisabled)));
        assert!(matches!(search.query(""), Err(Error::FullTextDisabled)));
        assert!(matches!(search.popular(5), Err(Error::FullTextDisabled)));
        assert!(matches!(search.record_query("x"), Err(Error::FullTextDisabled)));
        // Index maintenance is a silent no-op.
        assert!(search.reindex(&article("a", "A", "b")).is_ok());
        assert_eq!(search.generation(), 0);
    }

    #[test]
    fn test_blank_query_rejected() {
        let search = enabled();
        for q in ["", "   ", "\t\n"] {
            assert!(matches!(search.query(q), Err(Error::EmptySearchQuery)));
        }
    }

    #[test]
    fn test_reindex_and_query() {
        // Given: Two indexed articles
        let search = enabled();
        search
            .rebuild(&[
                article("hello", "Hello", "A friendly greeting for everyone."),
                article("rust", "Rust notes", "Ownership and borrowing explained."),
            ])
            .unwrap();

        // When: Querying a body term
        let hits = search.query("borrowing").unwrap();

        // Then: Only the matching article comes back with a snippet
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slug, "rust");
        assert!(hits[0].snippet.contains("borrowing"));
    }

    #[test]
    fn test_reindex_replaces_previous_postings() {
        let search = enabled();
        search.reindex(&article("post", "Cats", "all about cats")).unwrap();
        search.reindex(&article("post", "Dogs", "all about dogs")).unwrap();

        assert!(search.matching_slugs("cats").unwrap().is_empty());
        assert_eq!(
            search.matching_slugs("dogs").unwrap(),
            HashSet::from(["post".to_string()])
        );
        assert_eq!(search.generation(), 2);
    }

    #[test]
    fn test_drafts_and_removed_articles_not_found() {
        let search = enabled();
        let mut hidden = (*article("secret", "Secret", "hidden plans")).clone();
        hidden.meta.draft = true;
        search.reindex(&hidden).unwrap();
        search.reindex(&article("gone", "Gone", "hidden treasure")).unwrap();
        search.remove("gone").unwrap();

        assert!(search.matching_slugs("hidden").unwrap().is_empty());
    }

    #[test]
    fn test_matching_slugs_ignores_result_limit() {
        // Given: More matching articles than the result limit
        let search = SearchIndexer::with_backend(
            Arc::new(TantivyBackend::in_ram(15_000_000).unwrap()),
            3,
        );
        let articles: Vec<_> = (0..8)
            .map(|i| article(&format!("post-{i}"), "Rust", "rust everywhere"))
            .collect();
        search.rebuild(&articles).unwrap();

        // When: Ranking versus collecting every match
        let hits = search.query("rust").unwrap();
        let all = search.matching_slugs("rust").unwrap();

        // Then: Only the ranked hits are capped
        assert_eq!(hits.len(), 3);
        assert_eq!(all.len(), 8);
        assert!(all.contains("post-7"));
    }

    #[test]
    fn test_exact_outranks_stemmed() {
        // Given: One article with the literal term and one with a stem variant
        let search = enabled();
        search
            .rebuild(&[
                article("exact", "Running", "running running every day"),
                article("stemmed", "Runs", "she runs each day"),
            ])
            .unwrap();

        // When: Searching the literal form
        let hits = search.query("running").unwrap();

        // Then: Both match and the exact one ranks first
        let slugs: Vec<_> = hits.iter().map(|h| h.slug.as_str()).collect();
        assert_eq!(slugs, vec!["exact", "stemmed"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_query_syntax_is_escaped() {
        let search = enabled();
        search
            .reindex(&article("c", "C++ tips", "Use std::vector (carefully)"))
            .unwrap();
        for q in ["std::vector", "(carefully", "title:tips", "\"unbalanced", "a^2~"] {
            assert!(search.query(q).is_ok(), "query {q:?} failed");
        }
    }

    #[test]
    fn test_on_disk_index() {
        let dir = TempDir::new().unwrap();
        let backend = TantivyBackend::open_or_create(&dir.path().join("idx"), 15_000_000).unwrap();
        backend.upsert(&article("disk", "On disk", "persisted words")).unwrap();
        let hits = backend.query("persisted", 10).unwrap();
        assert_eq!(hits[0].slug, "disk");
    }

    #[test]
    fn test_popular_ordering_and_ties() {
        let tracker = QueryTracker::new();
        for q in ["rust", "Rust ", "beta", "alpha", "beta", "  RUST"] {
            tracker.record(q);
        }
        tracker.record("   ");

        let popular = tracker.popular(10);
        let pairs: Vec<_> = popular.iter().map(|p| (p.query.as_str(), p.count)).collect();
        assert_eq!(pairs, vec![("rust", 3), ("beta", 2), ("alpha", 1)]);

        tracker.record("alpha");
        let top2: Vec<_> = tracker.popular(2).into_iter().map(|p| p.query).collect();
        // alpha and beta tie at 2; lexical order breaks it.
        assert_eq!(top2, vec!["rust", "alpha"]);
    }

    #[test]
    fn test_tracker_save_load_and_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/popular.json");
        let tracker = QueryTracker::new();
        tracker.record("hello");
        tracker.record("hello");
        tracker.save(&path).unwrap();

        let restored = QueryTracker::new();
        assert_eq!(restored.load(&path).unwrap(), 1);
        assert_eq!(restored.popular(1)[0].count, 2);

        restored.reset();
        assert!(restored.is_empty());
        assert_eq!(QueryTracker::new().load(&dir.path().join("none.json")).unwrap(), 0);
    }

    #[test]
    fn test_snippet_windows_utf8_safely() {
        let body = "é".repeat(200) + " needle " + &"ü".repeat(200);
        let snippet = extract_snippet(&body, "needle", 40);
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));

        let plain = "x".repeat(50) + " needle here";
        assert!(extract_snippet(&plain, "needle", 40).contains("needle"));
        assert_eq!(extract_snippet("short", "zzz", 40), "short");
    }

    proptest! {
        #[test]
        fn test_popular_is_sorted(queries in prop::collection::vec("[a-d]{1,2}", 0..60)) {
            let tracker = QueryTracker::new();
            for q in &queries {
                tracker.record(q);
            }
            let popular = tracker.popular(100);
            for pair in popular.windows(2) {
                prop_assert!(
                    pair[0].count > pair[1].count
                        || (pair[0].count == pair[1].count && pair[0].query < pair[1].query)
                );
            }
            let total: u64 = popular.iter().map(|p| p.count).sum();
            prop_assert_eq!(total, queries.len() as u64);
        }

        #[test]
        fn test_snippet_never_panics(body in ".{0,300}", query in ".{0,20}") {
            let _ = extract_snippet(&body, &query, 60);
        }
    }
}
