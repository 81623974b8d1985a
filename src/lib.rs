//! feedhound - tiered article ingestion with deduplication
//!
//! Fetches articles from configured sources through a chain of fetch tiers
//! and admits them only when they are not already stored.
//!
//! # Architecture
//!
//! - [`config`] - Configuration file, environment overrides, sources file
//! - [`crawler`] - HTTP transport, rate limiting, fetch tiers, orchestrator, scheduler
//! - [`parser`] - Article field extraction from HTML
//! - [`dedup`] - Content fingerprints and the admission gate
//! - [`storage`] - Article and source store traits with memory and SQLite backends
//! - [`models`] - Core data structures
//! - [`metrics`] - Fetch statistics and Prometheus series
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedhound::crawler::{Fetcher, FetcherConfig, HttpTransport, RequestConfig, RequestLimiter, RateLimitConfig, TierOptions};
//! use feedhound::models::Source;
//! use feedhound::parser::ArticleExtractor;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let limiter = Arc::new(RequestLimiter::new(RateLimitConfig::default())?);
//!     let transport = Arc::new(HttpTransport::new(RequestConfig::default(), limiter)?);
//!     let fetcher = Fetcher::standard(
//!         transport,
//!         ArticleExtractor::default(),
//!         None,
//!         TierOptions::default(),
//!         FetcherConfig::default(),
//!     );
//!
//!     let source = Source::new("vendor", "Vendor Blog", "https://blog.vendor.example/")
//!         .with_feed("https://blog.vendor.example/feed.xml");
//!     let result = fetcher.fetch_source(&source).await;
//!     println!("{} articles via {}", result.article_count(), result.method);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crawler;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AppConfig, SourcesFile};
    pub use crate::crawler::{FetchScheduler, FetchTier, Fetcher, FetcherConfig, HttpTransport};
    pub use crate::dedup::{AdmitOutcome, DedupConfig, Deduplicator};
    pub use crate::error::{Error, ErrorCategory, FeedhoundErrorTrait, Result};
    pub use crate::models::{CandidateArticle, FetchMethod, FetchResult, Source, SourceConfig};
    pub use crate::parser::ArticleExtractor;
    pub use crate::storage::{ArticleStore, MemoryStore, SourceStore, SqliteStore};
}

pub use models::{CandidateArticle, FetchMethod, FetchResult, Source};
