//! Uniform interface over the fetch tiers

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::models::{CandidateArticle, FetchMethod, Source};
use crate::utils::error::TierError;

/// Candidates and counters produced by one tier for one source
#[derive(Debug, Clone, Default)]
pub struct TierOutput {
    pub articles: Vec<CandidateArticle>,
    pub stats: BTreeMap<String, u64>,
}

impl TierOutput {
    /// Increment counter `key`
    pub fn bump(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&mut self, key: &str, n: u64) {
        *self.stats.entry(key.to_string()).or_insert(0) += n;
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

/// One fetching strategy
#[async_trait]
pub trait FetchTier: Send + Sync {
    /// Method recorded when this tier wins
    fn method(&self) -> FetchMethod;

    /// Whether the tier should be tried for `source`
    fn applies_to(&self, source: &Source) -> bool;

    /// Produce candidates for `source`
    async fn fetch_source(&self, source: &Source) -> Result<TierOutput, TierError>;
}
