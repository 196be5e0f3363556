//! Output helpers shared by the commands.

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use folio_core::ArticleSummary;
use serde::Serialize;

pub use crate::cli::OutputFormat;

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// One listing line: date, slug, title and tags.
pub fn print_summary(article: &ArticleSummary) {
    let tags = if article.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", article.tags.join(", "))
    };
    println!(
        "{}  {}  {}{}",
        format_date(article.created_at).dimmed(),
        article.slug.cyan(),
        article.title.bold(),
        tags.dimmed()
    );
}
