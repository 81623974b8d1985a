//! Storage boundary for articles and sources
//!
//! The fetch tiers and the deduplicator only talk to storage through the
//! [`ArticleStore`] and [`SourceStore`] traits. Two implementations ship with
//! the crate: an in-memory store and a SQLite store.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CandidateArticle, Source};

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON column could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unique constraint on canonical URL or content hash rejected the write
    #[error("Duplicate article: {0}")]
    Duplicate(String),

    /// Unknown record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock poisoned or similar internal failure
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A persisted article as seen by the deduplicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredArticle {
    pub id: i64,
    pub source_id: String,
    pub canonical_url: String,
    pub title: String,
    pub content_hash: String,
    pub simhash: Option<u64>,
    pub simhash_bucket: Option<u8>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Article persistence used by the deduplicator
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn find_by_canonical_url(&self, url: &str) -> Result<Option<StoredArticle>, StorageError>;

    async fn find_by_content_hash(&self, hash: &str)
        -> Result<Option<StoredArticle>, StorageError>;

    /// Articles in `bucket` that carry a simhash
    async fn find_by_bucket(&self, bucket: u8) -> Result<Vec<StoredArticle>, StorageError>;

    /// Persist a candidate with its fingerprints
    async fn create(&self, candidate: &CandidateArticle) -> Result<StoredArticle, StorageError>;
}

/// Source persistence used by the scheduler
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Source>, StorageError>;

    /// Record a check and return the source's consecutive failure count
    async fn mark_check_result(
        &self,
        source_id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<u32, StorageError>;

    /// Stop scheduling a source
    async fn disable(&self, source_id: &str) -> Result<(), StorageError>;
}

/// Apply a check result to a source record
pub(crate) fn apply_check_result(source: &mut Source, success: bool, at: DateTime<Utc>) {
    source.last_checked = Some(at);
    if success {
        source.last_success = Some(at);
        source.consecutive_failures = 0;
    } else {
        source.consecutive_failures = source.consecutive_failures.saturating_add(1);
    }
}
