use anyhow::Result;
use colored::Colorize;
use folio_core::ContentService;

use crate::output::{OutputFormat, print_json};

pub fn search(service: &ContentService, query: &str, format: OutputFormat) -> Result<()> {
    let hits = service.search(query)?;
    match format {
        OutputFormat::Json => print_json(&*hits)?,
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("{}", format!("No results for '{query}'").yellow());
                return Ok(());
            }
            for hit in hits.iter() {
                println!(
                    "{}  {}  {}",
                    format!("{:>6.2}", hit.score).dimmed(),
                    hit.slug.cyan(),
                    hit.title.bold()
                );
                if !hit.snippet.is_empty() {
                    println!("        {}", hit.snippet.replace('\n', " "));
                }
            }
        },
    }
    Ok(())
}

pub fn popular(service: &ContentService, limit: usize, format: OutputFormat) -> Result<()> {
    let queries = service.popular_searches(limit)?;
    match format {
        OutputFormat::Json => print_json(&queries)?,
        OutputFormat::Text => {
            for q in &queries {
                println!("{:>5}  {}", q.count, q.query);
            }
        },
    }
    Ok(())
}
