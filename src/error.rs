//! Unified error handling for the feedhound crate
//!
//! Domain errors live next to the code that raises them
//! ([`FetchError`], [`ParseError`], [`TierError`], [`StorageError`]). This
//! module folds them into a single [`Error`] for crate boundaries and gives
//! every error a [`category`](FeedhoundErrorTrait::category) and a
//! recoverability flag.
//!
//! ```rust,ignore
//! use feedhound::error::{Error, FeedhoundErrorTrait};
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), error = %err, "Will retry");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::crawler::rate_limit::RateLimitError;
pub use crate::storage::StorageError;
pub use crate::utils::error::{FetchError, ParseError, TierError};

/// Common interface of feedhound errors
pub trait FeedhoundErrorTrait: std::error::Error {
    /// Whether retrying the operation later may succeed
    fn is_recoverable(&self) -> bool;

    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP, timeouts, render service
    Network,
    /// Feed, markup and selector errors
    Parsing,
    /// Content rejected by the quality gate
    Quality,
    Storage,
    Config,
    Scheduler,
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Quality => "quality",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FeedhoundErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidUrl(_) | Self::Decode(_) => false,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Http(_) | Self::Timeout(_) | Self::MaxRetriesExceeded | Self::Render(_) => true,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidUrl(_) => ErrorCategory::Config,
            Self::Decode(_) => ErrorCategory::Parsing,
            _ => ErrorCategory::Network,
        }
    }
}

impl FeedhoundErrorTrait for ParseError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Rejected(_) => ErrorCategory::Quality,
            Self::InvalidSelector(_) | Self::InvalidPattern(_) => ErrorCategory::Config,
            _ => ErrorCategory::Parsing,
        }
    }
}

impl FeedhoundErrorTrait for TierError {
    fn is_recoverable(&self) -> bool {
        TierError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(e) => e.category(),
            Self::Parse(e) => e.category(),
            Self::NotConfigured(_) => ErrorCategory::Config,
            Self::NoArticlesFound => ErrorCategory::Parsing,
            Self::TimedOut(_) => ErrorCategory::Scheduler,
        }
    }
}

impl FeedhoundErrorTrait for StorageError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

/// Unified error type for the feedhound crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Tier error: {0}")]
    Tier(#[from] TierError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Rate limit configuration error: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl FeedhoundErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Parse(e) => FeedhoundErrorTrait::is_recoverable(e),
            Self::Tier(e) => e.is_recoverable(),
            Self::Storage(e) => FeedhoundErrorTrait::is_recoverable(e),
            Self::Io(_) => true,
            Self::RateLimit(_) | Self::Json(_) | Self::Toml(_) | Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(e) => e.category(),
            Self::Parse(e) => e.category(),
            Self::Tier(e) => FeedhoundErrorTrait::category(e),
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Parsing,
            Self::RateLimit(_) | Self::Toml(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Sqlite(err))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: err.to_string(),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let fetch_err = Error::Fetch(FetchError::Timeout("https://a.example/".into()));
        assert_eq!(fetch_err.category(), ErrorCategory::Network);

        let parse_err = Error::Parse(ParseError::TitleNotFound);
        assert_eq!(parse_err.category(), ErrorCategory::Parsing);

        let rejected = Error::Parse(ParseError::Rejected("binary garbage".into()));
        assert_eq!(rejected.category(), ErrorCategory::Quality);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Fetch(FetchError::Timeout("x".into())).is_recoverable());
        assert!(!Error::Parse(ParseError::TitleNotFound).is_recoverable());

        let gone = FetchError::Status {
            status: 404,
            url: "https://a.example/".into(),
        };
        assert!(!Error::Fetch(gone).is_recoverable());

        let busy = FetchError::Status {
            status: 503,
            url: "https://a.example/".into(),
        };
        assert!(Error::Fetch(busy).is_recoverable());
    }

    #[test]
    fn test_tier_error_category_follows_cause() {
        let err: Error = TierError::Parse(ParseError::InvalidSelector("div[".into())).into();
        assert_eq!(err.category(), ErrorCategory::Config);
        assert_eq!(Error::Tier(TierError::TimedOut(600)).category(), ErrorCategory::Scheduler);
    }

    #[test]
    fn test_storage_conversion() {
        let err: Error = StorageError::Duplicate("https://a.example/1".into()).into();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("interval must be positive");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert_eq!(err.category().to_string(), "config");
    }

    #[test]
    fn test_other_error() {
        let err = Error::with_source("loading sources", io::Error::other("disk"));
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "loading sources");
    }
}
