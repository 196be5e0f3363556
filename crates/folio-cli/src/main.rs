//! folio CLI - operate a live, versioned article store
//!
//! Loads configuration, initializes logging and dispatches to the command
//! modules. Every command opens the store, runs, and shuts it down so that
//! popular-query counts are persisted.

use anyhow::{Context, Result};
use clap::Parser;
use folio_core::{Config, ContentService};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    initialize_logging(&cli, &config)?;

    if matches!(cli.command, Commands::Config) {
        return commands::show_config(&config, cli.format);
    }

    let service = ContentService::open(config).context("Failed to open content store")?;
    let result = execute_command(&cli, &service).await;
    service.shutdown().context("Failed to shut down content store")?;
    result
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match Config::default_path() {
            Ok(path) => Config::load_or_default(&path)?,
            Err(_) => Config::default(),
        },
    };

    if let Some(dir) = &cli.article_dir {
        config.article_dir.clone_from(dir);
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir.clone_from(dir);
    }
    if cli.full_text {
        config.enable_full_text_search = true;
    }
    config.validate()?;
    Ok(config)
}

fn initialize_logging(cli: &Cli, config: &Config) -> Result<()> {
    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        config.log_level.parse().unwrap_or(Level::INFO)
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    if cli.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn execute_command(cli: &Cli, service: &ContentService) -> Result<()> {
    let format = cli.format;
    match &cli.command {
        Commands::List {
            tag,
            category,
            query,
            page,
            limit,
        } => {
            let filter = folio_core::ListFilter {
                tag: tag.clone(),
                category: category.clone(),
                query: query.clone(),
            };
            commands::list(service, &filter, *page, *limit, format)?;
        },

        Commands::Show { slug, meta } => {
            commands::show(service, slug, *meta, format)?;
        },

        Commands::Latest => commands::latest(service, format)?,

        Commands::Tags => commands::tags(service, format)?,

        Commands::Categories => commands::categories(service, format)?,

        Commands::Versions { slug } => commands::versions(service, slug, format)?,

        Commands::Version { slug, version } => {
            commands::version(service, slug, *version, format)?;
        },

        Commands::Restore { slug, version } => {
            commands::restore(service, slug, *version, format).await?;
        },

        Commands::Search { query } => {
            commands::search(service, &query.join(" "), format)?;
        },

        Commands::Popular { limit } => commands::popular(service, *limit, format)?,

        Commands::New {
            title,
            body,
            description,
            author,
            tags,
            category,
            draft,
        } => {
            let input = commands::NewArticle {
                title,
                body,
                description: description.as_deref(),
                author: author.as_deref(),
                tags,
                category: category.as_deref(),
                draft: *draft,
            };
            commands::create(service, &input, format).await?;
        },

        Commands::Watch => commands::watch(service).await?,

        Commands::Rescan => commands::rescan(service, format).await?,

        Commands::Config => {},
    }

    Ok(())
}
