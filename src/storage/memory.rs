//! In-memory article and source store
//!
//! Enforces the same uniqueness rules as the SQLite store so that dry runs and
//! tests see identical admission behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{apply_check_result, ArticleStore, SourceStore, StorageError, StoredArticle};
use crate::models::{CandidateArticle, Source};

#[derive(Default)]
struct Articles {
    rows: Vec<StoredArticle>,
    by_url: HashMap<String, usize>,
    by_hash: HashMap<String, usize>,
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    articles: RwLock<Articles>,
    sources: RwLock<HashMap<String, Source>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with sources
    pub fn with_sources(sources: Vec<Source>) -> Self {
        let map = sources
            .into_iter()
            .map(|s| (s.identifier.clone(), s))
            .collect();
        Self {
            articles: RwLock::new(Articles::default()),
            sources: RwLock::new(map),
        }
    }

    /// Number of stored articles
    pub async fn article_count(&self) -> usize {
        self.articles.read().await.rows.len()
    }

    /// Snapshot of one source
    pub async fn source(&self, source_id: &str) -> Option<Source> {
        self.sources.read().await.get(source_id).cloned()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn find_by_canonical_url(&self, url: &str) -> Result<Option<StoredArticle>, StorageError> {
        let articles = self.articles.read().await;
        Ok(articles.by_url.get(url).map(|&i| articles.rows[i].clone()))
    }

    async fn find_by_content_hash(
        &self,
        hash: &str,
    ) -> Result<Option<StoredArticle>, StorageError> {
        let articles = self.articles.read().await;
        Ok(articles.by_hash.get(hash).map(|&i| articles.rows[i].clone()))
    }

    async fn find_by_bucket(&self, bucket: u8) -> Result<Vec<StoredArticle>, StorageError> {
        let articles = self.articles.read().await;
        Ok(articles
            .rows
            .iter()
            .filter(|a| a.simhash.is_some() && a.simhash_bucket == Some(bucket))
            .cloned()
            .collect())
    }

    async fn create(&self, candidate: &CandidateArticle) -> Result<StoredArticle, StorageError> {
        let mut articles = self.articles.write().await;

        if articles.by_url.contains_key(&candidate.canonical_url) {
            return Err(StorageError::Duplicate(candidate.canonical_url.clone()));
        }
        if articles.by_hash.contains_key(&candidate.content_hash) {
            return Err(StorageError::Duplicate(candidate.content_hash.clone()));
        }

        let stored = StoredArticle {
            id: articles.rows.len() as i64 + 1,
            source_id: candidate.source_id.clone(),
            canonical_url: candidate.canonical_url.clone(),
            title: candidate.title.clone(),
            content_hash: candidate.content_hash.clone(),
            simhash: Some(candidate.simhash),
            simhash_bucket: Some(candidate.simhash_bucket),
            published_at: candidate.published_at,
            created_at: Utc::now(),
        };

        let index = articles.rows.len();
        articles.by_url.insert(stored.canonical_url.clone(), index);
        articles.by_hash.insert(stored.content_hash.clone(), index);
        articles.rows.push(stored.clone());

        Ok(stored)
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Source>, StorageError> {
        let sources = self.sources.read().await;
        let mut active: Vec<Source> = sources.values().filter(|s| s.active).cloned().collect();
        active.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(active)
    }

    async fn mark_check_result(
        &self,
        source_id: &str,
        success: bool,
        at: DateTime<Utc>,
    ) -> Result<u32, StorageError> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(source_id)
            .ok_or_else(|| StorageError::NotFound(source_id.to_string()))?;
        apply_check_result(source, success, at);
        Ok(source.consecutive_failures)
    }

    async fn disable(&self, source_id: &str) -> Result<(), StorageError> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(source_id)
            .ok_or_else(|| StorageError::NotFound(source_id.to_string()))?;
        source.active = false;
        Ok(())
    }
}
