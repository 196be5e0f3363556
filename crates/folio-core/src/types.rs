use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Front-matter derived metadata of an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMeta {
    /// Short summary, empty when absent.
    pub description: String,
    /// Author name, when given.
    pub author: Option<String>,
    /// Sorted, de-duplicated.
    pub tags: Vec<String>,
    /// Slash separated path, e.g. `guides/rust`.
    pub category: Option<String>,
    /// Hidden from every public read.
    pub draft: bool,
    /// From the `date` field, else the file modification time.
    pub created_at: DateTime<Utc>,
    /// From the `updated` field.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A parsed, published article.
///
/// Metadata, body and `raw` always come from the same file read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    /// URL-safe identifier derived from the file name.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Front-matter metadata.
    #[serde(flatten)]
    pub meta: ArticleMeta,
    /// Markdown body without the front matter block.
    pub body: String,
    /// Full file text the article was parsed from.
    #[serde(skip)]
    pub raw: String,
    /// File the article was loaded from.
    #[serde(skip)]
    pub source_path: PathBuf,
    /// Current version number, 0 until committed.
    pub version: u64,
    /// SHA-256 of `raw`, hex encoded.
    pub checksum: String,
}

impl Article {
    /// Listing view without the body.
    pub fn summary(&self) -> ArticleSummary {
        ArticleSummary {
            slug: self.slug.clone(),
            title: self.title.clone(),
            description: self.meta.description.clone(),
            author: self.meta.author.clone(),
            tags: self.meta.tags.clone(),
            category: self.meta.category.clone(),
            created_at: self.meta.created_at,
            updated_at: self.meta.updated_at,
            version: self.version,
        }
    }
}

/// Listing entry: an article without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleSummary {
    /// Article slug.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Short summary.
    pub description: String,
    /// Author name, when given.
    pub author: Option<String>,
    /// Sorted, de-duplicated tags.
    pub tags: Vec<String>,
    /// Slash separated category path.
    pub category: Option<String>,
    /// Publication date.
    pub created_at: DateTime<Utc>,
    /// Last edit date, when given.
    pub updated_at: Option<DateTime<Utc>>,
    /// Current version number.
    pub version: u64,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticlePage {
    /// Entries on this page, newest first.
    pub articles: Vec<ArticleSummary>,
    /// Matches across all pages.
    pub total: usize,
    /// 1-based page number.
    pub page: usize,
    /// Entries per page.
    pub limit: usize,
    /// Page count for `limit`.
    pub total_pages: usize,
}

/// Optional listing filters, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListFilter {
    /// Exact tag match.
    pub tag: Option<String>,
    /// Matches the category and its descendants.
    pub category: Option<String>,
    /// Free text. Uses the search index when enabled, otherwise a
    /// case-insensitive match on title and description.
    pub query: Option<String>,
}

impl ListFilter {
    /// Trimmed copy with blank fields dropped and the category path
    /// collapsed to `a/b` form.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let category = self.category.as_deref().and_then(|c| {
            let joined = c
                .split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("/");
            (!joined.is_empty()).then_some(joined)
        });
        Self {
            tag: non_blank(self.tag.as_deref()),
            category,
            query: non_blank(self.query.as_deref()),
        }
    }

    /// Cache-key form of the normalized filter. Each field is length
    /// prefixed so no value can spill into its neighbour.
    pub fn signature(&self) -> String {
        let normalized = self.normalized();
        let mut out = String::new();
        for (name, value) in [
            ("tag", &normalized.tag),
            ("category", &normalized.category),
            ("q", &normalized.query),
        ] {
            match value {
                Some(v) => out.push_str(&format!("{name}={}:{v};", v.len())),
                None => out.push_str(&format!("{name}=-;")),
            }
        }
        out
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A node of the nested category tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryNode {
    /// Last path segment.
    pub name: String,
    /// Full slash separated path.
    pub path: String,
    /// Articles filed directly under this node or below it.
    pub count: usize,
    /// Sub-categories, sorted by name.
    pub children: Vec<CategoryNode>,
}

/// Category listing, shaped by `enable_nested_categories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Categories {
    /// Sorted category paths.
    Flat(Vec<String>),
    /// Root nodes of the category tree.
    Nested(Vec<CategoryNode>),
}

/// Why a version was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionReason {
    /// The file changed.
    Edit,
    /// An earlier version was restored.
    Restore,
}

/// Immutable ledger entry. Never rewritten once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Slug of the article.
    pub article_id: String,
    /// 1-based, gapless.
    pub version: u64,
    /// Full file text.
    pub content: String,
    /// Hex SHA-256 of `content`.
    pub sha256: String,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Why the version exists.
    pub reason: VersionReason,
    /// Source version when `reason` is `Restore`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<u64>,
    /// Who made the change, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
}

impl VersionRecord {
    /// Listing form without the content.
    pub fn descriptor(&self) -> VersionDescriptor {
        VersionDescriptor {
            article_id: self.article_id.clone(),
            version: self.version,
            sha256: self.sha256.clone(),
            timestamp: self.timestamp,
            reason: self.reason,
            restored_from: self.restored_from,
            editor: self.editor.clone(),
            size: self.content.len(),
        }
    }
}

/// Version listing entry without content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionDescriptor {
    /// Slug of the article.
    pub article_id: String,
    /// Current version number.
    pub version: u64,
    /// Hex SHA-256 of the content.
    pub sha256: String,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Why the version exists.
    pub reason: VersionReason,
    /// Source version when restored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<u64>,
    /// Who made the change, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,
    /// Content length in bytes.
    pub size: usize,
}

/// One ranked full-text match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Article slug.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Relevance, higher is better.
    pub score: f32,
    /// Body excerpt around the first matching term.
    pub snippet: String,
}

/// A search query and how often it was asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularQuery {
    /// Normalized query text.
    pub query: String,
    /// Times asked.
    pub count: u64,
    /// Most recent time asked.
    pub last_seen: DateTime<Utc>,
}

/// Author supplied fields for create and update requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleInput {
    /// Display title.
    pub title: String,
    /// Short summary.
    #[serde(default)]
    pub description: String,
    /// Author name, when given.
    #[serde(default)]
    pub author: Option<String>,
    /// Tags; blanks and duplicates are dropped.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Slash separated category path.
    #[serde(default)]
    pub category: Option<String>,
    /// Keep the article out of public reads.
    #[serde(default)]
    pub draft: bool,
    /// Markdown body.
    pub content: String,
}
