//! In-memory article index with atomic snapshot publication.
//!
//! Readers call [`ContentIndex::current`] and get an `Arc<IndexSnapshot>`:
//! an immutable view that stays valid for as long as they hold it. Writers
//! build the next snapshot from the previous one with a single article
//! changed, then swap the pointer. A reader therefore sees either the whole
//! old state or the whole new state, never a mix.
//!
//! Reads are wait-free (`ArcSwap::load_full`). Writers serialize on a
//! mutex that readers never touch.

use crate::types::{
    Article, ArticlePage, ArticleSummary, Categories, CategoryNode, ListFilter,
};
use crate::{Error, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// One mutation applied by [`ContentIndex::publish`].
#[derive(Debug, Clone)]
pub enum IndexChange {
    /// Insert or replace the article with this slug.
    Upsert(Arc<Article>),
    /// Drop the article with this slug.
    Remove(String),
}

/// Validated pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub page: usize,
    /// Entries per page.
    pub limit: usize,
}

impl Page {
    /// Accepts `page >= 1` and `1 <= limit <= max_limit`.
    pub fn new(page: usize, limit: usize, max_limit: usize) -> Result<Self> {
        if page == 0 {
            return Err(Error::BadPagination("page must be at least 1".into()));
        }
        if limit == 0 || limit > max_limit {
            return Err(Error::BadPagination(format!(
                "limit must be between 1 and {max_limit}"
            )));
        }
        Ok(Self { page, limit })
    }
}

/// Immutable point-in-time view of all articles.
///
/// Drafts are stored so slug lookups can see them, but they never appear in
/// listings, tags, categories or public lookups.
#[derive(Debug, Default, Clone)]
pub struct IndexSnapshot {
    generation: u64,
    articles: HashMap<String, Arc<Article>>,
    tags: BTreeMap<String, BTreeSet<String>>,
    categories: BTreeMap<String, BTreeSet<String>>,
    // Public slugs, newest first.
    order: Vec<String>,
}

fn listing_order(a: &Article, b: &Article) -> Ordering {
    b.meta
        .created_at
        .cmp(&a.meta.created_at)
        .then_with(|| a.slug.cmp(&b.slug))
}

impl IndexSnapshot {
    /// Monotonic publication counter; 0 for the empty initial snapshot.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Public article count.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Non-draft article by slug.
    pub fn get(&self, slug: &str) -> Option<Arc<Article>> {
        self.articles
            .get(slug)
            .filter(|a| !a.meta.draft)
            .cloned()
    }

    /// Article by slug including drafts.
    pub fn get_any(&self, slug: &str) -> Option<Arc<Article>> {
        self.articles.get(slug).cloned()
    }

    /// Every stored article including drafts.
    pub fn all(&self) -> impl Iterator<Item = &Arc<Article>> {
        self.articles.values()
    }

    /// Filtered, paginated listing.
    ///
    /// `text_matches`, when given, replaces the substring match on
    /// `filter.query` with a precomputed slug set from the search index.
    pub fn list(
        &self,
        filter: &ListFilter,
        page: Page,
        text_matches: Option<&HashSet<String>>,
    ) -> ArticlePage {
        let filter = filter.normalized();
        let needle = filter.query.as_deref().map(str::to_lowercase);
        let tag_slugs = filter.tag.as_deref().map(|t| self.tags.get(t));
        let category = filter.category.as_deref();

        let matching: Vec<&Arc<Article>> = self
            .order
            .iter()
            .filter_map(|slug| self.articles.get(slug))
            .filter(|article| match tag_slugs {
                Some(Some(slugs)) => slugs.contains(&article.slug),
                Some(None) => false,
                None => true,
            })
            .filter(|article| {
                category.is_none_or(|c| {
                    article
                        .meta
                        .category
                        .as_deref()
                        .is_some_and(|ac| in_category(ac, c))
                })
            })
            .filter(|article| match (text_matches, needle.as_deref()) {
                (Some(set), _) => set.contains(&article.slug),
                (None, Some(needle)) => {
                    article.title.to_lowercase().contains(needle)
                        || article.meta.description.to_lowercase().contains(needle)
                },
                (None, None) => true,
            })
            .collect();

        let total = matching.len();
        let articles = matching
            .into_iter()
            .skip((page.page - 1).saturating_mul(page.limit))
            .take(page.limit)
            .map(|a| a.summary())
            .collect();

        ArticlePage {
            articles,
            total,
            page: page.page,
            limit: page.limit,
            total_pages: total.div_ceil(page.limit),
        }
    }

    /// The `n` most recent public articles.
    pub fn latest(&self, n: usize) -> Vec<ArticleSummary> {
        self.order
            .iter()
            .take(n)
            .filter_map(|slug| self.articles.get(slug))
            .map(|a| a.summary())
            .collect()
    }

    /// Distinct tags of public articles, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.tags.keys().cloned().collect()
    }

    /// Distinct categories of public articles.
    ///
    /// Flat mode lists every category path. Nested mode returns a tree in
    /// which each node counts the articles filed at or below it.
    pub fn categories(&self, nested: bool) -> Categories {
        if !nested {
            return Categories::Flat(self.categories.keys().cloned().collect());
        }

        let mut roots: Vec<CategoryNode> = Vec::new();
        for (path, slugs) in &self.categories {
            let mut level = &mut roots;
            let mut prefix = String::new();
            for segment in path.split('/') {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(segment);
                let position = match level.iter().position(|n| n.name == segment) {
                    Some(position) => position,
                    None => {
                        level.push(CategoryNode {
                            name: segment.to_string(),
                            path: prefix.clone(),
                            count: 0,
                            children: Vec::new(),
                        });
                        level.len() - 1
                    },
                };
                let node = &mut level[position];
                node.count += slugs.len();
                level = &mut node.children;
            }
        }
        Categories::Nested(roots)
    }

    fn apply(&mut self, change: IndexChange) {
        match change {
            IndexChange::Upsert(article) => {
                self.detach(&article.slug);
                self.attach(article);
            },
            IndexChange::Remove(slug) => self.detach(&slug),
        }
    }

    fn detach(&mut self, slug: &str) {
        let Some(old) = self.articles.remove(slug) else {
            return;
        };
        if old.meta.draft {
            return;
        }
        for tag in &old.meta.tags {
            remove_member(&mut self.tags, tag, slug);
        }
        if let Some(category) = &old.meta.category {
            remove_member(&mut self.categories, category, slug);
        }
        self.order.retain(|s| s != slug);
    }

    fn attach(&mut self, article: Arc<Article>) {
        let slug = article.slug.clone();
        if !article.meta.draft {
            for tag in &article.meta.tags {
                self.tags
                    .entry(tag.clone())
                    .or_default()
                    .insert(slug.clone());
            }
            if let Some(category) = &article.meta.category {
                self.categories
                    .entry(category.clone())
                    .or_default()
                    .insert(slug.clone());
            }
            let articles = &self.articles;
            let position = self
                .order
                .binary_search_by(|probe| {
                    articles
                        .get(probe)
                        .map_or(Ordering::Less, |existing| listing_order(existing, &article))
                })
                .unwrap_or_else(|p| p);
            self.order.insert(position, slug.clone());
        }
        self.articles.insert(slug, article);
    }
}

fn in_category(article_category: &str, filter: &str) -> bool {
    article_category == filter
        || article_category
            .strip_prefix(filter)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn remove_member(map: &mut BTreeMap<String, BTreeSet<String>>, key: &str, slug: &str) {
    if let Some(members) = map.get_mut(key) {
        members.remove(slug);
        if members.is_empty() {
            map.remove(key);
        }
    }
}

/// Holder of the current [`IndexSnapshot`].
#[derive(Debug)]
pub struct ContentIndex {
    current: ArcSwap<IndexSnapshot>,
    writer: Mutex<()>,
}

impl Default for ContentIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentIndex {
    /// Index serving an empty snapshot.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(IndexSnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// The snapshot in effect right now.
    pub fn current(&self) -> Arc<IndexSnapshot> {
        self.current.load_full()
    }

    /// Apply one change and make the result current.
    pub fn publish(&self, change: IndexChange) -> Arc<IndexSnapshot> {
        self.publish_all(std::iter::once(change))
    }

    /// Apply several changes as one publication with a single generation bump.
    pub fn publish_all(
        &self,
        changes: impl IntoIterator<Item = IndexChange>,
    ) -> Arc<IndexSnapshot> {
        let _writer = self.writer.lock();
        let previous = self.current.load_full();
        let mut next = (*previous).clone();
        for change in changes {
            next.apply(change);
        }
        next.generation = previous.generation + 1;
        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));
        tracing::debug!(
            "Published index generation {} ({} public articles)",
            next.generation,
            next.len()
        );
        next
    }
}
