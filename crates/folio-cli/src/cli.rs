//! # CLI Structure and Argument Parsing
//!
//! `folio` is an operator tool over a content directory: it loads the store,
//! runs one command against it and exits, or keeps watching with `folio watch`.
//!
//! ```bash
//! folio list --tag rust --page 2
//! folio show hello
//! folio versions hello
//! folio restore hello 1
//! folio --full-text search "borrow checker"
//! folio watch
//! ```
//!
//! Global options (`--config`, `--article-dir`, `--data-dir`, `--full-text`,
//! `--verbose`, `--quiet`) apply to every command and override values from
//! the config file.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for command results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Parser, Clone, Debug)]
#[command(name = "folio")]
#[command(version)]
#[command(about = "folio - live, versioned article store", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML config file
    #[arg(long, global = true, env = "FOLIO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the article directory
    #[arg(long, global = true, env = "FOLIO_ARTICLE_DIR")]
    pub article_dir: Option<PathBuf>,

    /// Override the data directory holding version history
    #[arg(long, global = true, env = "FOLIO_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable full-text search for this run
    #[arg(long, global = true)]
    pub full_text: bool,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress informational messages (only show errors)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format
    #[arg(short = 'f', long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// List published articles
    List {
        /// Only articles with this tag
        #[arg(long)]
        tag: Option<String>,

        /// Only articles in this category or below it
        #[arg(long)]
        category: Option<String>,

        /// Free-text filter
        #[arg(long, short = 's')]
        query: Option<String>,

        /// Page number (1-based)
        #[arg(long, default_value = "1")]
        page: usize,

        /// Articles per page
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },

    /// Show one article
    Show {
        slug: String,

        /// Print only the front matter fields
        #[arg(long)]
        meta: bool,
    },

    /// Most recent articles
    Latest,

    /// Distinct tags
    Tags,

    /// Distinct categories
    Categories,

    /// Version history of an article
    Versions { slug: String },

    /// Print one stored version
    Version { slug: String, version: u64 },

    /// Restore an earlier version as the new current version
    Restore { slug: String, version: u64 },

    /// Full-text search
    Search {
        /// Search terms
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Most frequent searches
    Popular {
        #[arg(long, short = 'n', default_value = "10")]
        limit: usize,
    },

    /// Create an article from a markdown body
    New {
        /// Article title
        #[arg(long)]
        title: String,

        /// File holding the markdown body (`-` for stdin)
        #[arg(long)]
        body: PathBuf,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long)]
        category: Option<String>,

        /// Keep the article hidden
        #[arg(long)]
        draft: bool,
    },

    /// Watch the article directory and apply changes until interrupted
    Watch,

    /// Reconcile the article directory with the index once
    Rescan,

    /// Show the effective configuration
    Config,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["folio", "list", "--tag", "rust", "-f", "json", "-v"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
        match cli.command {
            Commands::List { tag, page, limit, .. } => {
                assert_eq!(tag.as_deref(), Some("rust"));
                assert_eq!(page, 1);
                assert_eq!(limit, 20);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["folio", "-v", "-q", "tags"]).is_err());
    }

    #[test]
    fn test_search_joins_terms() {
        let cli = Cli::try_parse_from(["folio", "search", "borrow", "checker"]).unwrap();
        let Commands::Search { query } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(query.join(" "), "borrow checker");
    }

    #[test]
    fn test_search_requires_terms() {
        assert!(Cli::try_parse_from(["folio", "search"]).is_err());
    }
}
