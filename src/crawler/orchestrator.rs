//! Per-source tier orchestration
//!
//! Tiers are tried in order and the first one that yields candidates wins:
//! feed → rendered → structured → legacy, each only when it applies to the
//! source. Errors and empty outputs fall through to the next tier. When every
//! tier comes up empty the result is `all_failed` with the collected reasons.
//!
//! Many sources run in parallel, one task per source, bounded by a semaphore.
//! A task that panics becomes an `error` result for its source only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use super::discovery::PageDelay;
use super::feed::FeedReader;
use super::fetcher::HttpTransport;
use super::host_policy::HostPolicyTable;
use super::legacy::LegacyScraper;
use super::rendered::{RenderConfig, RenderEngine, RenderedScraper};
use super::structured::{StructuredScraper, DEFAULT_MAX_PAGES_PER_SOURCE};
use super::tier::FetchTier;
use crate::metrics::FetchMetrics;
use crate::models::{FetchMethod, FetchResult, Source};
use crate::parser::ArticleExtractor;
use crate::storage::{SourceStore, StorageError};
use crate::utils::error::TierError;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Sources fetched at the same time
    pub max_concurrent: usize,

    /// Budget for all tiers of one source
    pub source_timeout_secs: u64,

    /// Pause between page requests within one source
    pub page_delay: PageDelay,

    /// Pages extracted per source by the structured and rendered tiers
    pub max_pages_per_source: usize,

    /// Fetch entry pages to date undated feed entries
    pub fetch_page_dates: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            source_timeout_secs: 600,
            page_delay: PageDelay::default(),
            max_pages_per_source: DEFAULT_MAX_PAGES_PER_SOURCE,
            fetch_page_dates: true,
        }
    }
}

impl FetcherConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }
}

/// Feed-tier and render-tier options for [`Fetcher::standard`]
#[derive(Debug, Clone, Default)]
pub struct TierOptions {
    pub host_policies: HostPolicyTable,
    /// Replaces the default title deny-list when set
    pub title_filters: Option<Vec<String>>,
    pub render: RenderConfig,
}

/// Runs the tier chain for sources
pub struct Fetcher {
    tiers: Vec<Arc<dyn FetchTier>>,
    config: FetcherConfig,
    semaphore: Arc<Semaphore>,
    metrics: Arc<FetchMetrics>,
}

impl Fetcher {
    /// Fetcher over an explicit, ordered tier list
    pub fn new(tiers: Vec<Arc<dyn FetchTier>>, config: FetcherConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            tiers,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            metrics: Arc::new(FetchMetrics::new()),
        }
    }

    /// Fetcher with the feed, rendered (when an engine is given), structured
    /// and legacy tiers
    pub fn standard(
        transport: Arc<HttpTransport>,
        extractor: ArticleExtractor,
        engine: Option<Arc<dyn RenderEngine>>,
        options: TierOptions,
        config: FetcherConfig,
    ) -> Self {
        let structured = Arc::new(
            StructuredScraper::new(transport.clone(), extractor.clone())
                .with_page_delay(config.page_delay)
                .with_max_pages(config.max_pages_per_source),
        );

        let mut feed = FeedReader::new(transport.clone(), structured.clone())
            .with_host_policies(options.host_policies)
            .with_page_dates(config.fetch_page_dates);
        if let Some(filters) = options.title_filters {
            feed = feed.with_title_filters(filters);
        }

        let mut tiers: Vec<Arc<dyn FetchTier>> = vec![Arc::new(feed)];
        if let Some(engine) = engine {
            tiers.push(Arc::new(
                RenderedScraper::new(engine, transport.clone(), extractor.clone())
                    .with_wait(options.render.wait, options.render.timeout_ms)
                    .with_page_delay(config.page_delay)
                    .with_max_pages(config.max_pages_per_source),
            ));
        }
        tiers.push(structured);
        tiers.push(Arc::new(LegacyScraper::new(transport, extractor)));

        Self::new(tiers, config)
    }

    /// Share a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<FetchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<FetchMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Methods of the configured tiers, in order
    pub fn tier_methods(&self) -> Vec<FetchMethod> {
        self.tiers.iter().map(|t| t.method()).collect()
    }

    /// Fetch one source within the source timeout
    pub async fn fetch_source(&self, source: &Source) -> FetchResult {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.source_timeout(), self.run_tiers(source)).await {
            Ok(result) => result,
            Err(_) => {
                let err = TierError::TimedOut(self.config.source_timeout_secs);
                tracing::warn!(source = %source.identifier, error = %err, "Source fetch timed out");
                FetchResult::failed(&source.identifier, FetchMethod::Error, err.to_string(), started.elapsed())
            }
        };

        self.metrics.record(&result);
        result
    }

    async fn run_tiers(&self, source: &Source) -> FetchResult {
        let started = Instant::now();
        let mut failures = Vec::new();
        let mut stats = BTreeMap::new();

        for tier in &self.tiers {
            if !tier.applies_to(source) {
                continue;
            }
            let method = tier.method();
            tracing::debug!(source = %source.identifier, tier = %method, "Trying tier");

            match tier.fetch_source(source).await {
                Ok(output) => {
                    for (key, value) in output.stats {
                        stats.insert(format!("{method}.{key}"), value);
                    }

                    let total = output.articles.len();
                    let articles: Vec<_> = output
                        .articles
                        .into_iter()
                        .filter(|a| a.is_complete())
                        .collect();
                    if articles.len() < total {
                        stats.insert(format!("{method}.incomplete"), (total - articles.len()) as u64);
                    }

                    if articles.is_empty() {
                        tracing::info!(source = %source.identifier, tier = %method, "Tier produced no articles");
                        failures.push(format!("{method}: {}", TierError::NoArticlesFound));
                        continue;
                    }

                    tracing::info!(
                        source = %source.identifier,
                        tier = %method,
                        articles = articles.len(),
                        "Tier succeeded"
                    );
                    let mut result =
                        FetchResult::succeeded(&source.identifier, method, articles, started.elapsed());
                    result.stats = stats;
                    return result;
                }
                Err(e) => {
                    tracing::warn!(source = %source.identifier, tier = %method, error = %e, "Tier failed");
                    failures.push(format!("{method}: {e}"));
                }
            }
        }

        let error = if failures.is_empty() {
            "no applicable tier".to_string()
        } else {
            failures.join("; ")
        };
        tracing::warn!(source = %source.identifier, error = %error, "All tiers failed");

        let mut result =
            FetchResult::failed(&source.identifier, FetchMethod::AllFailed, error, started.elapsed());
        result.stats = stats;
        result
    }

    /// Fetch `sources` concurrently, results in input order
    pub async fn fetch_sources(self: &Arc<Self>, sources: Vec<Source>) -> Vec<FetchResult> {
        let ids: Vec<String> = sources.iter().map(|s| s.identifier.clone()).collect();
        let handles: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let fetcher = Arc::clone(self);
                tokio::spawn(async move {
                    let _permit = match fetcher.semaphore.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return FetchResult::failed(
                                &source.identifier,
                                FetchMethod::Error,
                                "fetcher shut down".to_string(),
                                Duration::ZERO,
                            )
                        }
                    };
                    fetcher.fetch_source(&source).await
                })
            })
            .collect();

        let joined = futures::future::join_all(handles).await;
        let mut results = Vec::with_capacity(joined.len());
        for (id, joined) in ids.into_iter().zip(joined) {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(source = %id, error = %e, "Fetch task failed");
                    let result = FetchResult::failed(&id, FetchMethod::Error, e.to_string(), Duration::ZERO);
                    self.metrics.record(&result);
                    result
                }
            };
            results.push(result);
        }
        results
    }

    /// Fetch active sources that are due, or all active sources with `force`
    pub async fn fetch_due_sources(
        self: &Arc<Self>,
        store: &dyn SourceStore,
        force: bool,
    ) -> Result<Vec<FetchResult>, StorageError> {
        let now = chrono::Utc::now();
        let active = store.list_active().await?;
        let total = active.len();
        let due: Vec<Source> = active
            .into_iter()
            .filter(|s| force || s.is_due(now))
            .collect();

        tracing::info!(due = due.len(), active = total, force, "Fetching due sources");
        Ok(self.fetch_sources(due).await)
    }
}
