//! Front matter parsing for markdown articles.
//!
//! An article file starts with a YAML block fenced by `---` lines:
//!
//! ```text
//! ---
//! title: Hello
//! tags: [intro, meta]
//! category: notes/daily
//! date: 2024-05-01
//! ---
//! Body in markdown.
//! ```
//!
//! `title` is the only required key. Anything that fails to parse is
//! reported as [`Error::Parse`] so the caller can keep the last good entry.

use crate::types::{Article, ArticleInput, ArticleMeta};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

/// Parses content files into [`Article`]s relative to a content root.
#[derive(Debug, Clone)]
pub struct FrontMatterParser {
    root: PathBuf,
    nested_categories: bool,
}

#[derive(Debug, Deserialize)]
struct RawFrontMatter {
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    tags: Option<TagList>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    date: Option<String>,
    #[serde(default, alias = "last_updated")]
    updated: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TagList {
    List(Vec<String>),
    Csv(String),
}

#[derive(Serialize)]
struct RenderedFrontMatter<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    author: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    draft: bool,
    date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<String>,
}

impl FrontMatterParser {
    /// Parser for files under `root`.
    pub fn new(root: impl Into<PathBuf>, nested_categories: bool) -> Self {
        Self {
            root: root.into(),
            nested_categories,
        }
    }

    /// Content root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse one file. `bytes` must be the complete file contents.
    pub fn parse(&self, path: &Path, bytes: &[u8]) -> Result<Article> {
        let slug = slug_for_path(path)?;
        let raw = std::str::from_utf8(bytes)
            .map_err(|e| Error::Parse(format!("{}: not valid UTF-8: {e}", path.display())))?;

        let (yaml, body) = split_front_matter(raw).ok_or_else(|| {
            Error::Parse(format!("{}: missing front matter block", path.display()))
        })?;

        if yaml.trim().is_empty() {
            return Err(Error::Parse(format!(
                "{}: front matter is empty",
                path.display()
            )));
        }

        let front: RawFrontMatter = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Parse(format!("{}: invalid front matter: {e}", path.display())))?;

        let title = front
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Parse(format!("{}: missing required 'title'", path.display())))?
            .to_string();

        let created_at = match front.date.as_deref() {
            Some(value) => parse_date(value)
                .ok_or_else(|| Error::Parse(format!("{}: invalid date '{value}'", path.display())))?,
            None => file_time(path),
        };
        let updated_at = match front.updated.as_deref() {
            Some(value) => Some(parse_date(value).ok_or_else(|| {
                Error::Parse(format!("{}: invalid updated date '{value}'", path.display()))
            })?),
            None => None,
        };

        let tags = match front.tags {
            Some(TagList::List(list)) => normalize_tags(list),
            Some(TagList::Csv(text)) => normalize_tags(text.split(',').map(str::to_string)),
            None => Vec::new(),
        };

        // Directory placement outranks front matter when nesting is on.
        let category = self
            .directory_category(path)
            .or_else(|| front.category.as_deref().and_then(normalize_category));

        Ok(Article {
            slug,
            title,
            meta: ArticleMeta {
                description: front.description.unwrap_or_default().trim().to_string(),
                author: front
                    .author
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty()),
                tags,
                category,
                draft: front.draft,
                created_at,
                updated_at,
            },
            body: body.trim_start_matches(['\r', '\n']).to_string(),
            raw: raw.to_string(),
            source_path: path.to_path_buf(),
            version: 0,
            checksum: checksum(raw),
        })
    }

    fn directory_category(&self, path: &Path) -> Option<String> {
        if !self.nested_categories {
            return None;
        }
        let parent = path.parent()?.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = parent
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        }
    }
}

/// Produce file text for an authored article.
pub fn render(
    input: &ArticleInput,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
) -> Result<String> {
    let tags = normalize_tags(input.tags.iter().cloned());
    let category = input.category.as_deref().and_then(normalize_category);
    let front = RenderedFrontMatter {
        title: input.title.trim(),
        description: input.description.trim(),
        author: input.author.as_deref().map(str::trim).filter(|a| !a.is_empty()),
        tags: &tags,
        category: category.as_deref(),
        draft: input.draft,
        date: created_at.to_rfc3339(),
        updated: updated_at.map(|u| u.to_rfc3339()),
    };
    let yaml = serde_yaml::to_string(&front)?;
    Ok(format!("---\n{yaml}---\n\n{}\n", input.content.trim_end()))
}

/// Whether a path names an article file.
///
/// Accepts `*.md`, skipping hidden files, editor backups and `README.md`.
pub fn is_article_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.starts_with('#') || name.ends_with('~') {
        return false;
    }
    if name.eq_ignore_ascii_case("readme.md") {
        return false;
    }
    path.extension().and_then(|e| e.to_str()) == Some("md")
}

/// Slug for a content path: its file stem.
pub fn slug_for_path(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Parse(format!("{}: cannot derive slug", path.display())))
}

/// Turn a title into a slug: lowercase ASCII alphanumerics joined by `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "article".to_string()
    } else {
        slug
    }
}

/// Hex SHA-256 of text.
pub fn checksum(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text.strip_prefix("---")?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn file_time(path: &Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_or(DateTime::<Utc>::UNIX_EPOCH, DateTime::<Utc>::from)
}

fn normalize_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn normalize_category(value: &str) -> Option<String> {
    let joined = value
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() { None } else { Some(joined) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use proptest::prelude::*;

    fn parser() -> FrontMatterParser {
        FrontMatterParser::new("/content", true)
    }

    #[test]
    fn test_parse_basic_article() {
        // Given: A file with full front matter
        let text = "---\ntitle: Hello\ndescription: First post\nauthor: Ana\ntags: [intro, meta, intro]\ndate: 2024-05-01\n---\n\n# Hello\n\nBody text.\n";

        // When: Parsing it
        let article = parser()
            .parse(Path::new("/content/hello.md"), text.as_bytes())
            .unwrap();

        // Then: Every field comes from the same read
        assert_eq!(article.slug, "hello");
        assert_eq!(article.title, "Hello");
        assert_eq!(article.meta.description, "First post");
        assert_eq!(article.meta.author.as_deref(), Some("Ana"));
        assert_eq!(article.meta.tags, vec!["intro", "meta"]);
        assert_eq!(article.meta.created_at.year(), 2024);
        assert_eq!(article.body, "# Hello\n\nBody text.\n");
        assert_eq!(article.raw, text);
        assert_eq!(article.checksum, checksum(text));
        assert!(!article.meta.draft);
    }

    #[test]
    fn test_missing_title_is_parse_error() {
        let cases = [
            "---\ndescription: no title\n---\nbody",
            "---\ntitle: \"   \"\n---\nbody",
            "---\n---\nbody",
            "no front matter at all",
            "---\ntitle: Unclosed\nbody",
            "---\ntitle: [unterminated\n---\nbody",
        ];
        for case in cases {
            let result = parser().parse(Path::new("/content/x.md"), case.as_bytes());
            assert!(
                matches!(result, Err(Error::Parse(_))),
                "expected parse error for {case:?}"
            );
        }
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let bytes = [b'-', b'-', b'-', b'\n', 0xff, 0xfe];
        let result = parser().parse(Path::new("/content/x.md"), &bytes);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_invalid_date_is_parse_error() {
        let text = "---\ntitle: T\ndate: yesterday\n---\n";
        let result = parser().parse(Path::new("/content/x.md"), text.as_bytes());
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_date_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();
        assert_eq!(parse_date("2024-05-01T10:30:00Z"), Some(expected));
        assert_eq!(parse_date("2024-05-01 10:30:00"), Some(expected));
        assert_eq!(
            parse_date("2024-05-01"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_date("05/01/2024"), None);
    }

    #[test]
    fn test_crlf_front_matter() {
        let text = "---\r\ntitle: Windows\r\n---\r\nBody\r\n";
        let article = parser()
            .parse(Path::new("/content/win.md"), text.as_bytes())
            .unwrap();
        assert_eq!(article.title, "Windows");
        assert_eq!(article.body, "Body\r\n");
    }

    #[test]
    fn test_category_from_directory_when_nested() {
        let text = "---\ntitle: Deep\n---\nbody";
        let article = parser()
            .parse(Path::new("/content/guides/rust/deep.md"), text.as_bytes())
            .unwrap();
        assert_eq!(article.meta.category.as_deref(), Some("guides/rust"));

        let flat = FrontMatterParser::new("/content", false)
            .parse(Path::new("/content/guides/rust/deep.md"), text.as_bytes())
            .unwrap();
        assert_eq!(flat.meta.category, None);
    }

    #[test]
    fn test_directory_category_wins_when_nested() {
        // Given: A nested file whose front matter names another category
        let text = "---\ntitle: Deep\ncategory: \" /news//local/ \"\n---\nbody";

        // When: Parsing with and without nested categories
        let nested = parser()
            .parse(Path::new("/content/guides/deep.md"), text.as_bytes())
            .unwrap();
        let flat = FrontMatterParser::new("/content", false)
            .parse(Path::new("/content/guides/deep.md"), text.as_bytes())
            .unwrap();
        let top_level = parser()
            .parse(Path::new("/content/deep.md"), text.as_bytes())
            .unwrap();

        // Then: The directory wins when nesting, front matter otherwise
        assert_eq!(nested.meta.category.as_deref(), Some("guides"));
        assert_eq!(flat.meta.category.as_deref(), Some("news/local"));
        assert_eq!(top_level.meta.category.as_deref(), Some("news/local"));
    }

    #[test]
    fn test_comma_separated_tags() {
        let text = "---\ntitle: T\ntags: \"rust, async , ,rust\"\n---\n";
        let article = parser()
            .parse(Path::new("/content/t.md"), text.as_bytes())
            .unwrap();
        assert_eq!(article.meta.tags, vec!["async", "rust"]);
    }

    #[test]
    fn test_is_article_file() {
        assert!(is_article_file(Path::new("a/b/post.md")));
        assert!(!is_article_file(Path::new("a/README.md")));
        assert!(!is_article_file(Path::new("a/readme.md")));
        assert!(!is_article_file(Path::new("a/.post.md.swp")));
        assert!(!is_article_file(Path::new("a/.hidden.md")));
        assert!(!is_article_file(Path::new("a/post.md~")));
        assert!(!is_article_file(Path::new("a/post.txt")));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust 2024 -- Edition "), "rust-2024-edition");
        assert_eq!(slugify("???"), "article");
    }

    #[test]
    fn test_render_parses_back() {
        // Given: Author input
        let input = ArticleInput {
            title: "Hello 2".into(),
            description: "second".into(),
            tags: vec!["b".into(), "a".into()],
            category: Some("notes".into()),
            content: "Body here".into(),
            ..ArticleInput::default()
        };
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        // When: Rendering and parsing the result
        let text = render(&input, created, None).unwrap();
        let article = FrontMatterParser::new("/content", false)
            .parse(Path::new("/content/hello-2.md"), text.as_bytes())
            .unwrap();

        // Then: Metadata survives
        assert!(text.starts_with("---\n"));
        assert_eq!(article.title, "Hello 2");
        assert_eq!(article.meta.tags, vec!["a", "b"]);
        assert_eq!(article.meta.category.as_deref(), Some("notes"));
        assert_eq!(article.meta.created_at, created);
        assert_eq!(article.body, "Body here\n");
    }

    proptest! {
        #[test]
        fn test_slugify_output_is_url_safe(title in ".{0,80}") {
            let slug = slugify(&title);
            prop_assert!(!slug.is_empty());
            prop_assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            prop_assert!(!slug.contains("--"));
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_parse_never_panics(text in ".{0,400}") {
            let _ = parser().parse(Path::new("/content/p.md"), text.as_bytes());
        }
    }
}
