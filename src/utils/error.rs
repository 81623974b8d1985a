//! Error types for the feedhound fetch tiers
//!
//! This module defines the domain errors raised by the transport, the parsers
//! and the tier orchestration.

use thiserror::Error;

/// Errors that can occur during HTTP fetching operations
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status code
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Request timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Maximum retry attempts exceeded without a recorded cause
    #[error("Maximum retry attempts exceeded")]
    MaxRetriesExceeded,

    /// Content decoding error
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Headless render engine failure
    #[error("Render engine error: {0}")]
    Render(String),
}

impl FetchError {
    /// Status code carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors that can occur during parsing and extraction
#[derive(Error, Debug)]
pub enum ParseError {
    /// Feed document could not be parsed
    #[error("Feed parse failed: {0}")]
    Feed(String),

    /// Sitemap or other XML could not be parsed
    #[error("XML parse failed: {0}")]
    Xml(String),

    /// Title not found in page
    #[error("Title not found in article")]
    TitleNotFound,

    /// Content not found in page
    #[error("Content not found in article")]
    ContentNotFound,

    /// Invalid CSS selector in source configuration
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// Invalid regular expression in source configuration
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Content rejected by the quality policy
    #[error("Content rejected: {0}")]
    Rejected(String),
}

/// Errors raised by a fetch tier
#[derive(Error, Debug)]
pub enum TierError {
    /// Fetch error
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Tier is not configured for this source
    #[error("Tier not configured: {0}")]
    NotConfigured(String),

    /// No candidate articles produced
    #[error("No articles found")]
    NoArticlesFound,

    /// Tier exceeded its time budget
    #[error("Tier timed out after {0} seconds")]
    TimedOut(u64),
}

impl TierError {
    /// Whether retrying the tier later may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(FetchError::InvalidUrl(_)) => false,
            Self::Fetch(e) => !matches!(e.status(), Some(400..=404)),
            Self::Parse(_) | Self::NotConfigured(_) => false,
            Self::NoArticlesFound | Self::TimedOut(_) => true,
        }
    }
}
