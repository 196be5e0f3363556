//! Error types and handling for folio-core operations.
//!
//! Every fallible operation in the store returns [`Result<T>`]. Errors fall into
//! two groups:
//!
//! - **Typed results** returned straight to callers: missing articles or
//!   versions, rejected input, a disabled capability, a forbidden mutation.
//! - **Internal failures** (I/O, parsing, index, storage): logged with full
//!   context and rendered generically at the API boundary so no detail leaks.
//!
//! ## API Codes
//!
//! Each variant maps onto one of the stable API error codes through
//! [`Error::api_code`]:
//!
//! ```rust
//! use folio_core::{ApiErrorCode, Error};
//!
//! let err = Error::ArticleNotFound("hello".to_string());
//! assert_eq!(err.api_code(), ApiErrorCode::ArticleNotFound);
//! assert_eq!(err.api_code().as_str(), "ARTICLE_NOT_FOUND");
//! ```

use serde::Serialize;
use thiserror::Error;

/// The main error type for folio-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed.
    ///
    /// Covers reading content files, writing version records and renaming
    /// temporary files into place.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A content file could not be turned into an article.
    ///
    /// ## Common Causes
    ///
    /// - Missing or unterminated front matter block
    /// - Invalid YAML
    /// - Missing or blank `title`
    /// - Unparseable `date`
    #[error("Parse error: {0}")]
    Parse(String),

    /// Full-text index operation failed.
    #[error("Index error: {0}")]
    Index(String),

    /// Version ledger operation failed.
    ///
    /// Raised for corrupt version records, checksum mismatches and attempts
    /// to overwrite an existing version file.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration is invalid or inaccessible.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The filesystem watcher could not be created or subscribed.
    #[error("Watch error: {0}")]
    Watch(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No live article has the given slug.
    #[error("Article not found: {0}")]
    ArticleNotFound(String),

    /// The article exists but has no such version.
    #[error("Version {version} not found for article '{slug}'")]
    VersionNotFound {
        /// Article slug.
        slug: String,
        /// Requested version number.
        version: u64,
    },

    /// A search was issued with a blank query.
    #[error("Search query must not be empty")]
    EmptySearchQuery,

    /// Page or limit outside the accepted range.
    #[error("Invalid pagination: {0}")]
    BadPagination(String),

    /// Any other rejected caller input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Full-text search is turned off in configuration.
    #[error("Full-text search is disabled")]
    FullTextDisabled,

    /// The caller lacks the admin capability required for a mutation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Generic error for uncategorized failures.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(err: tantivy::TantivyError) -> Self {
        Self::Index(err.to_string())
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}

/// Stable error codes exposed to the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    /// No such article.
    ArticleNotFound,
    /// No such version of an existing article.
    VersionNotFound,
    /// Full-text search is not enabled.
    FulltextDisabled,
    /// Blank search query.
    EmptySearchQuery,
    /// Malformed caller input.
    BadRequest,
    /// Caller is not allowed to perform the mutation.
    Forbidden,
    /// Anything internal.
    InternalServer,
}

impl ApiErrorCode {
    /// Wire representation of the code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ArticleNotFound => "ARTICLE_NOT_FOUND",
            Self::VersionNotFound => "VERSION_NOT_FOUND",
            Self::FulltextDisabled => "FULLTEXT_DISABLED",
            Self::EmptySearchQuery => "EMPTY_SEARCH_QUERY",
            Self::BadRequest => "BAD_REQUEST",
            Self::Forbidden => "FORBIDDEN",
            Self::InternalServer => "INTERNAL_SERVER",
        }
    }

    /// HTTP status conventionally paired with the code.
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ArticleNotFound | Self::VersionNotFound => 404,
            Self::FulltextDisabled => 501,
            Self::EmptySearchQuery | Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::InternalServer => 500,
        }
    }
}

impl std::fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Check if the error might be recoverable through retry logic.
    ///
    /// Interrupted or timed-out I/O and watcher subscription failures are
    /// worth retrying; everything else is permanent.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            Self::Watch(_) => true,
            _ => false,
        }
    }

    /// Get the error category as a string identifier for logging.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Parse(_) => "parse",
            Self::Index(_) => "index",
            Self::Storage(_) => "storage",
            Self::Config(_) => "config",
            Self::Watch(_) => "watch",
            Self::Serialization(_) => "serialization",
            Self::ArticleNotFound(_) | Self::VersionNotFound { .. } => "not_found",
            Self::EmptySearchQuery | Self::BadPagination(_) | Self::InvalidInput(_) => {
                "invalid_input"
            },
            Self::FullTextDisabled => "disabled",
            Self::Forbidden(_) => "forbidden",
            Self::Other(_) => "other",
        }
    }

    /// Map the error onto its API code.
    #[must_use]
    pub const fn api_code(&self) -> ApiErrorCode {
        match self {
            Self::ArticleNotFound(_) => ApiErrorCode::ArticleNotFound,
            Self::VersionNotFound { .. } => ApiErrorCode::VersionNotFound,
            Self::FullTextDisabled => ApiErrorCode::FulltextDisabled,
            Self::EmptySearchQuery => ApiErrorCode::EmptySearchQuery,
            Self::BadPagination(_) | Self::InvalidInput(_) => ApiErrorCode::BadRequest,
            Self::Forbidden(_) => ApiErrorCode::Forbidden,
            Self::Io(_)
            | Self::Parse(_)
            | Self::Index(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Watch(_)
            | Self::Serialization(_)
            | Self::Other(_) => ApiErrorCode::InternalServer,
        }
    }

    /// Whether the error is an internal failure rather than a typed result.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.api_code(), ApiErrorCode::InternalServer)
    }

    /// Message safe to hand to an external caller.
    ///
    /// Internal errors collapse to a generic sentence; typed results keep
    /// their display text.
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

/// Convenience type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::disallowed_macros,
    clippy::unwrap_used,
    clippy::unnecessary_wraps
)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;

    #[test]
    fn test_error_display_formatting() {
        // Given: Typed errors
        let not_found = Error::ArticleNotFound("hello".to_string());
        let version = Error::VersionNotFound {
            slug: "hello".to_string(),
            version: 7,
        };

        // When/Then: Display carries the identifying data
        assert_eq!(not_found.to_string(), "Article not found: hello");
        assert_eq!(version.to_string(), "Version 7 not found for article 'hello'");
        assert_eq!(
            Error::EmptySearchQuery.to_string(),
            "Search query must not be empty"
        );
        assert_eq!(Error::Other("boom".to_string()).to_string(), "boom");
    }

    #[test]
    fn test_api_codes_cover_taxonomy() {
        let cases = vec![
            (
                Error::ArticleNotFound("a".into()),
                "ARTICLE_NOT_FOUND",
                404,
            ),
            (
                Error::VersionNotFound {
                    slug: "a".into(),
                    version: 2,
                },
                "VERSION_NOT_FOUND",
                404,
            ),
            (Error::FullTextDisabled, "FULLTEXT_DISABLED", 501),
            (Error::EmptySearchQuery, "EMPTY_SEARCH_QUERY", 400),
            (Error::BadPagination("page 0".into()), "BAD_REQUEST", 400),
            (Error::InvalidInput("title".into()), "BAD_REQUEST", 400),
            (Error::Forbidden("restore".into()), "FORBIDDEN", 403),
            (Error::Parse("yaml".into()), "INTERNAL_SERVER", 500),
            (
                Error::Io(io::Error::other("disk")),
                "INTERNAL_SERVER",
                500,
            ),
        ];

        for (error, code, status) in cases {
            assert_eq!(error.api_code().as_str(), code);
            assert_eq!(error.api_code().http_status(), status);
        }
    }

    #[test]
    fn test_internal_errors_hide_details() {
        // Given: An internal error carrying a filesystem path
        let error = Error::Storage("/srv/data/articles/x/versions/3.json exists".into());

        // Then: The public message does not leak it
        assert!(error.is_internal());
        assert_eq!(error.public_message(), "Internal server error");

        // And: Typed results keep their message
        let typed = Error::ArticleNotFound("x".into());
        assert_eq!(typed.public_message(), "Article not found: x");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(Error::Io(io::Error::new(io::ErrorKind::Interrupted, "x")).is_recoverable());
        assert!(Error::Watch("inotify limit".into()).is_recoverable());
        assert!(!Error::Io(io::Error::new(io::ErrorKind::NotFound, "x")).is_recoverable());
        assert!(!Error::Parse("bad".into()).is_recoverable());
        assert!(!Error::Forbidden("x".into()).is_recoverable());
    }

    #[test]
    fn test_error_from_serde_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: Error = err.into();
        assert_eq!(error.category(), "serialization");
    }

    #[test]
    fn test_api_code_serializes_as_wire_string() {
        let json = serde_json::to_string(&ApiErrorCode::FulltextDisabled).unwrap();
        assert_eq!(json, "\"FULLTEXT_DISABLED\"");
    }

    proptest! {
        #[test]
        fn test_parse_error_with_arbitrary_messages(msg in r".{0,200}") {
            let error = Error::Parse(msg.clone());
            prop_assert!(error.to_string().contains(&msg));
            prop_assert_eq!(error.category(), "parse");
            prop_assert_eq!(error.public_message(), "Internal server error");
        }

        #[test]
        fn test_not_found_keeps_slug(slug in "[a-z0-9-]{1,40}") {
            let error = Error::ArticleNotFound(slug.clone());
            prop_assert!(error.public_message().contains(&slug));
            prop_assert!(!error.is_internal());
        }
    }
}
