use anyhow::{Context, Result};
use colored::Colorize;
use folio_core::ContentService;
use tracing::info;

use crate::output::{OutputFormat, print_json};

pub async fn watch(service: &ContentService) -> Result<()> {
    let handle = service.watch();
    info!(
        "Watching {} ({} articles); press Ctrl-C to stop",
        service.root().display(),
        service.snapshot().len()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.stop().await;
    info!("Stopped watching");
    Ok(())
}

pub async fn rescan(service: &ContentService, format: OutputFormat) -> Result<()> {
    let report = service.rescan().await?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => println!(
            "{} {} published, {} removed, {} unchanged, {} failed",
            "Rescanned:".green(),
            report.published,
            report.removed,
            report.unchanged,
            report.failed
        ),
    }
    Ok(())
}
