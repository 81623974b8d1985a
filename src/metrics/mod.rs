//! Fetch statistics and Prometheus metrics
//!
//! Two layers:
//! - [`FetchMetrics`]: an explicit collector owned by the orchestrator, with
//!   per-tier counts, articles collected and average source latency. Tests and
//!   the CLI read it through [`FetchMetrics::snapshot`].
//! - Process-wide Prometheus series, registered by [`init_metrics`]. Until
//!   then every `record_*` function is a no-op.

use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::models::{FetchMethod, FetchResult};

// ============================================================================
// Prometheus series
// ============================================================================

struct PrometheusMetrics {
    http_requests: CounterVec,
    http_latency: Histogram,
    source_fetches: CounterVec,
    source_duration: HistogramVec,
    articles_collected: CounterVec,
    dedup_outcomes: CounterVec,
    sources_disabled: Counter,
}

static PROMETHEUS: OnceLock<PrometheusMetrics> = OnceLock::new();

static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

/// Register all Prometheus series
///
/// Idempotent. On failure the error is returned and recording stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = PrometheusMetrics {
        http_requests: register_counter_vec!(
            "feedhound_http_requests_total",
            "HTTP request attempts by outcome",
            &["outcome"]
        )?,
        http_latency: register_histogram!(
            "feedhound_http_request_duration_seconds",
            "HTTP request attempt latency in seconds",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        )?,
        source_fetches: register_counter_vec!(
            "feedhound_source_fetches_total",
            "Source fetches by winning tier",
            &["method"]
        )?,
        source_duration: register_histogram_vec!(
            "feedhound_source_fetch_duration_seconds",
            "Time to fetch one source in seconds",
            &["method"],
            vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        articles_collected: register_counter_vec!(
            "feedhound_articles_collected_total",
            "Candidate articles produced by tier",
            &["method"]
        )?,
        dedup_outcomes: register_counter_vec!(
            "feedhound_dedup_outcomes_total",
            "Deduplication decisions",
            &["outcome"]
        )?,
        sources_disabled: register_counter!(
            "feedhound_sources_disabled_total",
            "Sources disabled after repeated failures"
        )?,
    };

    PROMETHEUS
        .set(metrics)
        .map_err(|_| "Prometheus metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

pub fn metrics_initialized() -> bool {
    PROMETHEUS.get().is_some()
}

/// Encode registered metrics in Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one HTTP attempt
pub fn record_http_request(success: bool, latency: Duration) {
    let Some(m) = PROMETHEUS.get() else {
        return;
    };
    let outcome = if success { "success" } else { "error" };
    m.http_requests.with_label_values(&[outcome]).inc();
    m.http_latency.observe(latency.as_secs_f64());
}

/// Record a finished source fetch
pub fn record_source_fetch(method: FetchMethod, articles: usize, elapsed: Duration) {
    let Some(m) = PROMETHEUS.get() else {
        return;
    };
    let label = method.as_str();
    m.source_fetches.with_label_values(&[label]).inc();
    m.source_duration
        .with_label_values(&[label])
        .observe(elapsed.as_secs_f64());
    if articles > 0 {
        m.articles_collected
            .with_label_values(&[label])
            .inc_by(articles as f64);
    }
}

/// Record a deduplication decision (`admitted`, `duplicate_url`, ...)
pub fn record_dedup_outcome(outcome: &str) {
    if let Some(m) = PROMETHEUS.get() {
        m.dedup_outcomes.with_label_values(&[outcome]).inc();
    }
}

pub fn record_source_disabled() {
    if let Some(m) = PROMETHEUS.get() {
        m.sources_disabled.inc();
    }
}

// ============================================================================
// Run statistics
// ============================================================================

/// Point-in-time copy of [`FetchMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchMetricsSnapshot {
    pub sources_fetched: u64,
    pub sources_succeeded: u64,
    pub sources_failed: u64,
    pub articles_collected: u64,
    /// Fetch count per method, including `all_failed` and `error`
    pub by_method: BTreeMap<String, u64>,
    pub average_latency_ms: f64,
}

/// Aggregate statistics of fetch runs
#[derive(Debug, Default)]
pub struct FetchMetrics {
    sources_fetched: AtomicU64,
    sources_succeeded: AtomicU64,
    articles_collected: AtomicU64,
    total_latency_ms: AtomicU64,
    by_method: Mutex<BTreeMap<FetchMethod, u64>>,
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one source fetch
    pub fn record(&self, result: &FetchResult) {
        self.sources_fetched.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.sources_succeeded.fetch_add(1, Ordering::Relaxed);
        }
        self.articles_collected
            .fetch_add(result.articles.len() as u64, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(result.elapsed.as_millis() as u64, Ordering::Relaxed);

        match self.by_method.lock() {
            Ok(mut counts) => *counts.entry(result.method).or_insert(0) += 1,
            Err(poisoned) => *poisoned.into_inner().entry(result.method).or_insert(0) += 1,
        }

        record_source_fetch(result.method, result.articles.len(), result.elapsed);
    }

    pub fn snapshot(&self) -> FetchMetricsSnapshot {
        let fetched = self.sources_fetched.load(Ordering::Relaxed);
        let succeeded = self.sources_succeeded.load(Ordering::Relaxed);
        let latency = self.total_latency_ms.load(Ordering::Relaxed);
        let by_method = match self.by_method.lock() {
            Ok(counts) => counts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        FetchMetricsSnapshot {
            sources_fetched: fetched,
            sources_succeeded: succeeded,
            sources_failed: fetched - succeeded,
            articles_collected: self.articles_collected.load(Ordering::Relaxed),
            by_method: by_method
                .into_iter()
                .map(|(method, count)| (method.as_str().to_string(), count))
                .collect(),
            average_latency_ms: if fetched == 0 {
                0.0
            } else {
                latency as f64 / fetched as f64
            },
        }
    }
}
