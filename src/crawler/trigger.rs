//! Background fetch scheduler
//!
//! Wakes on a fixed interval, fetches the sources that are due, hands every
//! result to a caller-supplied [`ResultHandler`] and records source health.
//! Sources whose consecutive failures reach the threshold are disabled.
//! Nothing that happens inside a cycle stops the loop.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use super::orchestrator::Fetcher;
use crate::dedup::{AdmitOutcome, Deduplicator, DuplicateKind};
use crate::models::FetchResult;
use crate::storage::{SourceStore, StorageError};

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between cycles
    pub interval_secs: u64,

    /// Consecutive failures after which a source is disabled
    pub failure_threshold: u32,

    /// Run a cycle right away instead of waiting one interval
    pub run_immediately: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            failure_threshold: 10,
            run_immediately: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

// ============================================================================
// Result handling
// ============================================================================

/// Receives every fetch result of a cycle
#[async_trait]
pub trait ResultHandler: Send + Sync {
    async fn handle(&self, result: &FetchResult);
}

/// Counts from admitting one result's candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdmitSummary {
    pub admitted: usize,
    pub duplicates: usize,
    pub near_duplicates: usize,
    pub errors: usize,
}

/// Handler that runs every candidate through the deduplicator
pub struct AdmitHandler {
    dedup: Arc<Deduplicator>,
}

impl AdmitHandler {
    pub fn new(dedup: Arc<Deduplicator>) -> Self {
        Self { dedup }
    }

    /// Admit the candidates of `result`
    pub async fn admit_all(&self, result: &FetchResult) -> AdmitSummary {
        let mut summary = AdmitSummary::default();
        for candidate in &result.articles {
            match self.dedup.admit(candidate).await {
                Ok(outcome) => tally(&mut summary, &outcome),
                Err(e) => {
                    tracing::error!(
                        source = %result.source_id,
                        url = %candidate.canonical_url,
                        error = %e,
                        "Admission failed"
                    );
                    summary.errors += 1;
                }
            }
        }

        if !result.articles.is_empty() {
            tracing::info!(
                source = %result.source_id,
                admitted = summary.admitted,
                duplicates = summary.duplicates,
                near_duplicates = summary.near_duplicates,
                "Candidates admitted"
            );
        }
        summary
    }
}

fn tally(summary: &mut AdmitSummary, outcome: &AdmitOutcome) {
    if !outcome.similar.is_empty() {
        summary.near_duplicates += 1;
    }
    let label = match (outcome.admitted, outcome.duplicate_kind) {
        (true, _) => {
            summary.admitted += 1;
            "admitted"
        }
        (false, kind) => {
            summary.duplicates += 1;
            match kind {
                Some(DuplicateKind::CanonicalUrl) => "duplicate_url",
                Some(DuplicateKind::ContentHash) => "duplicate_hash",
                Some(DuplicateKind::NearDuplicate) | None => "near_duplicate",
            }
        }
    };
    crate::metrics::record_dedup_outcome(label);
}

#[async_trait]
impl ResultHandler for AdmitHandler {
    async fn handle(&self, result: &FetchResult) {
        self.admit_all(result).await;
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Events emitted by the scheduler
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    CycleStarted,
    SourceFetched {
        source_id: String,
        success: bool,
        articles: usize,
    },
    SourceDisabled {
        source_id: String,
        failures: u32,
    },
    CycleCompleted(CycleSummary),
    CycleFailed(String),
}

/// Totals of one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub sources: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub articles: usize,
    pub disabled: usize,
}

/// Periodic driver of [`Fetcher::fetch_due_sources`]
pub struct FetchScheduler {
    fetcher: Arc<Fetcher>,
    sources: Arc<dyn SourceStore>,
    config: SchedulerConfig,
    event_sender: broadcast::Sender<SchedulerEvent>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl FetchScheduler {
    pub fn new(fetcher: Arc<Fetcher>, sources: Arc<dyn SourceStore>, config: SchedulerConfig) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        let (shutdown, shutdown_rx) = watch::channel(false);
        Self {
            fetcher,
            sources,
            config,
            event_sender,
            shutdown,
            shutdown_rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_sender.subscribe()
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.event_sender.send(event);
    }

    /// Fetch due sources once, hand results to `handler`, record health
    pub async fn run_cycle(
        &self,
        handler: &dyn ResultHandler,
        force: bool,
    ) -> Result<CycleSummary, StorageError> {
        self.emit(SchedulerEvent::CycleStarted);
        let results = self
            .fetcher
            .fetch_due_sources(self.sources.as_ref(), force)
            .await?;

        let mut summary = CycleSummary {
            sources: results.len(),
            ..CycleSummary::default()
        };

        for result in &results {
            if result.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            summary.articles += result.article_count();

            handler.handle(result).await;
            self.emit(SchedulerEvent::SourceFetched {
                source_id: result.source_id.clone(),
                success: result.success,
                articles: result.article_count(),
            });

            if self.record_health(result).await {
                summary.disabled += 1;
            }
        }

        tracing::info!(
            sources = summary.sources,
            succeeded = summary.succeeded,
            failed = summary.failed,
            articles = summary.articles,
            disabled = summary.disabled,
            "Fetch cycle completed"
        );
        self.emit(SchedulerEvent::CycleCompleted(summary));
        Ok(summary)
    }

    /// Returns whether the source got disabled
    async fn record_health(&self, result: &FetchResult) -> bool {
        let failures = match self
            .sources
            .mark_check_result(&result.source_id, result.success, Utc::now())
            .await
        {
            Ok(failures) => failures,
            Err(e) => {
                tracing::warn!(source = %result.source_id, error = %e, "Could not record check result");
                return false;
            }
        };

        if result.success || failures < self.config.failure_threshold {
            return false;
        }

        match self.sources.disable(&result.source_id).await {
            Ok(()) => {
                tracing::warn!(
                    source = %result.source_id,
                    failures,
                    threshold = self.config.failure_threshold,
                    "Source disabled after repeated failures"
                );
                crate::metrics::record_source_disabled();
                self.emit(SchedulerEvent::SourceDisabled {
                    source_id: result.source_id.clone(),
                    failures,
                });
                true
            }
            Err(e) => {
                tracing::error!(source = %result.source_id, error = %e, "Could not disable source");
                false
            }
        }
    }

    /// Run cycles until [`stop`](Self::stop) is called
    pub async fn start(&self, handler: Arc<dyn ResultHandler>) {
        tracing::info!(interval_secs = self.config.interval_secs, "Starting fetch scheduler");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        if !self.config.run_immediately {
            interval.tick().await;
        }

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle(handler.as_ref(), false).await {
                        tracing::error!(error = %e, "Fetch cycle failed");
                        self.emit(SchedulerEvent::CycleFailed(e.to_string()));
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("Fetch scheduler shutting down");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}
