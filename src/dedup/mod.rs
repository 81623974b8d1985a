//! Admission gate in front of the article store
//!
//! A candidate is checked, cheapest first, against:
//! 1. stored articles with the same canonical URL
//! 2. stored articles with the same content hash
//! 3. stored articles in the same simhash bucket within the Hamming threshold
//!
//! Exact matches reject the candidate. Near matches are reported and only
//! reject when [`DedupConfig::block_near_duplicates`] is set.

pub mod fingerprint;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::CandidateArticle;
use crate::storage::{ArticleStore, StorageError, StoredArticle};
use fingerprint::{hamming_distance, DEFAULT_SIMILARITY_THRESHOLD};

/// Deduplication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum Hamming distance counted as similar
    pub threshold: u32,

    /// Treat near-duplicates as duplicates
    pub block_near_duplicates: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            block_near_duplicates: false,
        }
    }
}

/// Why an existing record matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    CanonicalUrl,
    ContentHash,
    NearDuplicate,
}

/// Result of [`Deduplicator::admit`]
#[derive(Debug, Clone)]
pub struct AdmitOutcome {
    /// Candidate was persisted
    pub admitted: bool,

    /// The record that blocked admission
    pub existing: Option<StoredArticle>,

    /// Kind of match for `existing`
    pub duplicate_kind: Option<DuplicateKind>,

    /// Same-bucket records within the threshold
    pub similar: Vec<StoredArticle>,

    /// Newly stored record when admitted
    pub stored: Option<StoredArticle>,
}

impl AdmitOutcome {
    fn duplicate(existing: StoredArticle, kind: DuplicateKind, similar: Vec<StoredArticle>) -> Self {
        Self {
            admitted: false,
            existing: Some(existing),
            duplicate_kind: Some(kind),
            similar,
            stored: None,
        }
    }

    fn admitted(stored: StoredArticle, similar: Vec<StoredArticle>) -> Self {
        Self {
            admitted: true,
            existing: None,
            duplicate_kind: None,
            similar,
            stored: Some(stored),
        }
    }
}

/// Deduplicating gate over an [`ArticleStore`]
pub struct Deduplicator {
    store: Arc<dyn ArticleStore>,
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(store: Arc<dyn ArticleStore>, config: DedupConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Check a candidate and persist it when new
    pub async fn admit(&self, candidate: &CandidateArticle) -> Result<AdmitOutcome, StorageError> {
        if let Some(existing) = self
            .store
            .find_by_canonical_url(&candidate.canonical_url)
            .await?
        {
            tracing::debug!(
                url = %candidate.canonical_url,
                existing_id = existing.id,
                "Duplicate canonical URL"
            );
            return Ok(AdmitOutcome::duplicate(
                existing,
                DuplicateKind::CanonicalUrl,
                Vec::new(),
            ));
        }

        // Fingerprints may be stale if the tier edited title or content.
        let mut candidate = candidate.clone();
        candidate.refresh_fingerprint();

        if let Some(existing) = self
            .store
            .find_by_content_hash(&candidate.content_hash)
            .await?
        {
            tracing::debug!(
                url = %candidate.canonical_url,
                existing_id = existing.id,
                "Duplicate content hash"
            );
            return Ok(AdmitOutcome::duplicate(
                existing,
                DuplicateKind::ContentHash,
                Vec::new(),
            ));
        }

        let similar = self.find_similar(&candidate).await?;

        if self.config.block_near_duplicates {
            if let Some(first) = similar.first().cloned() {
                tracing::info!(
                    url = %candidate.canonical_url,
                    existing_id = first.id,
                    "Near-duplicate blocked"
                );
                return Ok(AdmitOutcome::duplicate(
                    first,
                    DuplicateKind::NearDuplicate,
                    similar,
                ));
            }
        }

        let stored = match self.store.create(&candidate).await {
            Ok(stored) => stored,
            // Lost a race with a concurrent admit; the store's unique index decided.
            Err(StorageError::Duplicate(key)) => {
                tracing::debug!(url = %candidate.canonical_url, key = %key, "Duplicate on insert");
                let existing = match self
                    .store
                    .find_by_canonical_url(&candidate.canonical_url)
                    .await?
                {
                    Some(existing) => Some((existing, DuplicateKind::CanonicalUrl)),
                    None => self
                        .store
                        .find_by_content_hash(&candidate.content_hash)
                        .await?
                        .map(|e| (e, DuplicateKind::ContentHash)),
                };
                return match existing {
                    Some((existing, kind)) => Ok(AdmitOutcome::duplicate(existing, kind, similar)),
                    None => Err(StorageError::Duplicate(key)),
                };
            }
            Err(e) => return Err(e),
        };

        if !similar.is_empty() {
            tracing::info!(
                url = %candidate.canonical_url,
                similar = similar.len(),
                "Admitted with near-duplicates"
            );
        }

        Ok(AdmitOutcome::admitted(stored, similar))
    }

    /// Same-bucket records within the configured threshold
    pub async fn find_similar(
        &self,
        candidate: &CandidateArticle,
    ) -> Result<Vec<StoredArticle>, StorageError> {
        let neighbours = self.store.find_by_bucket(candidate.simhash_bucket).await?;

        Ok(neighbours
            .into_iter()
            .filter(|stored| {
                stored.simhash.is_some_and(|hash| {
                    hamming_distance(hash, candidate.simhash) <= self.config.threshold
                })
            })
            .collect())
    }
}
