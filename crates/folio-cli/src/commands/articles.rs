use anyhow::{Context, Result};
use colored::Colorize;
use folio_core::{ArticleInput, Categories, CategoryNode, ContentService, ListFilter};
use serde_json::json;
use std::io::Read;
use std::path::Path;

use crate::output::{OutputFormat, format_date, print_json, print_summary};

pub fn list(
    service: &ContentService,
    filter: &ListFilter,
    page: usize,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let result = service.list_articles(filter, page, limit)?;
    match format {
        OutputFormat::Json => print_json(&*result)?,
        OutputFormat::Text => {
            if result.articles.is_empty() {
                println!("{}", "No articles found".yellow());
                return Ok(());
            }
            for article in &result.articles {
                print_summary(article);
            }
            println!(
                "{}",
                format!(
                    "Page {}/{} ({} articles)",
                    result.page,
                    result.total_pages.max(1),
                    result.total
                )
                .dimmed()
            );
        },
    }
    Ok(())
}

pub fn show(service: &ContentService, slug: &str, meta_only: bool, format: OutputFormat) -> Result<()> {
    let article = service.get_article(slug)?;
    match format {
        OutputFormat::Json if meta_only => print_json(&article.summary())?,
        OutputFormat::Json => print_json(&*article)?,
        OutputFormat::Text => {
            println!("{}", article.title.bold());
            println!(
                "{} v{}  {}",
                article.slug.cyan(),
                article.version,
                format_date(article.meta.created_at).dimmed()
            );
            if let Some(author) = &article.meta.author {
                println!("by {author}");
            }
            if let Some(category) = &article.meta.category {
                println!("category: {category}");
            }
            if !article.meta.tags.is_empty() {
                println!("tags: {}", article.meta.tags.join(", "));
            }
            if !article.meta.description.is_empty() {
                println!("{}", article.meta.description.italic());
            }
            if !meta_only {
                println!();
                println!("{}", article.body.trim_end());
            }
        },
    }
    Ok(())
}

pub fn latest(service: &ContentService, format: OutputFormat) -> Result<()> {
    let articles = service.latest_articles()?;
    match format {
        OutputFormat::Json => print_json(&*articles)?,
        OutputFormat::Text => articles.iter().for_each(print_summary),
    }
    Ok(())
}

pub fn tags(service: &ContentService, format: OutputFormat) -> Result<()> {
    let tags = service.tags()?;
    match format {
        OutputFormat::Json => print_json(&*tags)?,
        OutputFormat::Text => {
            for tag in tags.iter() {
                println!("{tag}");
            }
        },
    }
    Ok(())
}

pub fn categories(service: &ContentService, format: OutputFormat) -> Result<()> {
    let categories = service.categories()?;
    match format {
        OutputFormat::Json => print_json(&*categories)?,
        OutputFormat::Text => match &*categories {
            Categories::Flat(list) => list.iter().for_each(|c| println!("{c}")),
            Categories::Nested(roots) => print_tree(roots, 0),
        },
    }
    Ok(())
}

fn print_tree(nodes: &[CategoryNode], depth: usize) {
    for node in nodes {
        println!(
            "{}{} {}",
            "  ".repeat(depth),
            node.name,
            format!("({})", node.count).dimmed()
        );
        print_tree(&node.children, depth + 1);
    }
}

/// Fields for `folio new`.
pub struct NewArticle<'a> {
    pub title: &'a str,
    pub body: &'a Path,
    pub description: Option<&'a str>,
    pub author: Option<&'a str>,
    pub tags: &'a [String],
    pub category: Option<&'a str>,
    pub draft: bool,
}

pub async fn create(service: &ContentService, new: &NewArticle<'_>, format: OutputFormat) -> Result<()> {
    let content = read_body(new.body)?;
    let input = ArticleInput {
        title: new.title.to_string(),
        description: new.description.unwrap_or_default().to_string(),
        author: new.author.map(str::to_string),
        tags: new.tags.to_vec(),
        category: new.category.map(str::to_string),
        draft: new.draft,
        content,
    };

    // The local operator owns the content directory.
    let article = service.create_article(&input, true).await?;
    match format {
        OutputFormat::Json => print_json(&json!({
            "slug": article.slug,
            "version": article.version,
            "path": article.source_path,
        }))?,
        OutputFormat::Text => println!(
            "{} {} ({})",
            "Created".green(),
            article.slug.cyan(),
            article.source_path.display()
        ),
    }
    Ok(())
}

fn read_body(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut body = String::new();
        std::io::stdin()
            .read_to_string(&mut body)
            .context("Failed to read body from stdin")?;
        return Ok(body);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}
