//! Command implementations.

mod articles;
mod config;
mod history;
mod search;
mod watch;

pub use articles::{NewArticle, categories, create, latest, list, show, tags};
pub use config::show_config;
pub use history::{restore, version, versions};
pub use search::{popular, search};
pub use watch::{rescan, watch};
