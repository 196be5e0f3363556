use anyhow::Result;
use colored::Colorize;
use folio_core::{ContentService, VersionReason};
use serde_json::json;

use crate::output::{OutputFormat, print_json};

pub fn versions(service: &ContentService, slug: &str, format: OutputFormat) -> Result<()> {
    let versions = service.list_versions(slug)?;
    match format {
        OutputFormat::Json => print_json(&versions)?,
        OutputFormat::Text => {
            for v in &versions {
                let reason = match (v.reason, v.restored_from) {
                    (VersionReason::Restore, Some(from)) => format!("restore of v{from}"),
                    (VersionReason::Restore, None) => "restore".to_string(),
                    (VersionReason::Edit, _) => "edit".to_string(),
                };
                println!(
                    "{}  {}  {}  {}",
                    format!("v{}", v.version).bold(),
                    v.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                    reason,
                    format!("{} bytes", v.size).dimmed()
                );
            }
        },
    }
    Ok(())
}

pub fn version(service: &ContentService, slug: &str, version: u64, format: OutputFormat) -> Result<()> {
    let record = service.get_version(slug, version)?;
    match format {
        OutputFormat::Json => print_json(&*record)?,
        OutputFormat::Text => print!("{}", record.content),
    }
    Ok(())
}

pub async fn restore(
    service: &ContentService,
    slug: &str,
    version: u64,
    format: OutputFormat,
) -> Result<()> {
    let new_version = service.restore_version(slug, version, true).await?;
    match format {
        OutputFormat::Json => print_json(&json!({
            "slug": slug,
            "restored": version,
            "version": new_version,
        }))?,
        OutputFormat::Text => println!(
            "{} {} v{} as v{}",
            "Restored".green(),
            slug.cyan(),
            version,
            new_version
        ),
    }
    Ok(())
}
