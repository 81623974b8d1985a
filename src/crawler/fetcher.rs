//! HTTP transport shared by every fetch tier
//!
//! Features:
//! - Browser-like headers with a referer derived from the target host
//! - Token-bucket admission before every attempt
//! - Fixed-delay retry on network errors, 5xx, 408 and 429
//! - Compression and charset recovery for textual bodies
//! - Running request/success/error/latency counters

use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use url::Url;

use super::decode;
use super::headers::{build_browser_headers, random_user_agent};
use super::rate_limit::RequestLimiter;
use crate::utils::error::FetchError;
use crate::utils::retry::{run_with_policy, AttemptOutcome, RetryPolicy};

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Retries after the first attempt
    pub max_retries: u32,

    /// Fixed delay between attempts in milliseconds
    pub retry_delay_ms: u64,

    pub follow_redirects: bool,

    pub verify_tls: bool,

    /// Fixed identity; a browser user agent is picked per request when unset
    pub user_agent: Option<String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 1000,
            follow_redirects: true,
            verify_tls: true,
            user_agent: None,
        }
    }
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Per-call additions to a request
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Headers that override the browser defaults
    pub headers: HeaderMap,

    /// Query parameters appended to the URL
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn with_header(mut self, name: reqwest::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }
}

/// A fully read HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Vec<u8>,
    /// Final URL after redirects
    pub url: String,
    text: OnceLock<String>,
}

impl HttpResponse {
    /// Build a response from parts
    pub fn new(status: StatusCode, headers: HeaderMap, bytes: Vec<u8>, url: &str) -> Self {
        Self {
            status,
            headers,
            bytes,
            url: url.to_string(),
            text: OnceLock::new(),
        }
    }

    fn header_str(&self, name: reqwest::header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_str(CONTENT_TYPE)
    }

    /// Body decoded to text, computed on first use
    pub fn text(&self) -> &str {
        self.text
            .get_or_init(|| decode::decode_text(&self.bytes, self.content_type()))
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED
    }

    /// Fail on 4xx and 5xx
    pub fn ensure_success(&self) -> Result<&Self, FetchError> {
        if self.is_client_error() || self.is_server_error() {
            return Err(FetchError::Status {
                status: self.status.as_u16(),
                url: self.url.clone(),
            });
        }
        Ok(self)
    }
}

/// Running transport counters
#[derive(Debug, Default)]
pub struct TransportStats {
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransportStatsSnapshot {
    pub request_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub average_latency_ms: f64,
}

impl TransportStats {
    fn record(&self, success: bool, latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
        crate::metrics::record_http_request(success, latency);
    }

    pub fn snapshot(&self) -> TransportStatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let latency = self.total_latency_ms.load(Ordering::Relaxed);
        TransportStatsSnapshot {
            request_count: requests,
            success_count: self.successes.load(Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
            average_latency_ms: if requests == 0 {
                0.0
            } else {
                latency as f64 / requests as f64
            },
        }
    }
}

/// Validate that `url` is an absolute http(s) URL
pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    if url.trim().is_empty() {
        return Err(FetchError::InvalidUrl("empty URL".to_string()));
    }
    let parsed = Url::parse(url.trim()).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(FetchError::InvalidUrl(format!("{url}: not an http(s) URL"))),
    }
}

/// Any 4xx/5xx is retried; 3xx (including 304) is handed back to the caller
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

/// Retrying, rate-limited HTTP client
pub struct HttpTransport {
    client: Client,
    limiter: Arc<RequestLimiter>,
    config: RequestConfig,
    stats: Arc<TransportStats>,
}

impl HttpTransport {
    /// Create a transport
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: RequestConfig, limiter: Arc<RequestLimiter>) -> Result<Self, FetchError> {
        let redirect = if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = Client::builder()
            .timeout(config.timeout())
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .redirect(redirect)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            client,
            limiter,
            config,
            stats: Arc::new(TransportStats::default()),
        })
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RequestLimiter> {
        &self.limiter
    }

    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }

    /// GET with default options
    pub async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        self.request(Method::GET, url, &RequestOptions::default())
            .await
    }

    /// GET and return the decoded body of a successful response
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.get(url).await?;
        response.ensure_success()?;
        Ok(response.text().to_string())
    }

    /// Perform `method` against `url` with retries
    ///
    /// 2xx and 3xx responses are returned as-is. Transport failures and 4xx/5xx
    /// statuses are retried; exhausted retries surface the last error.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, FetchError> {
        let parsed = validate_url(url)?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        let policy = self.config.retry_policy();

        run_with_policy(&policy, |attempt| {
            let method = method.clone();
            let parsed = parsed.clone();
            let host = host.clone();
            async move {
                self.limiter.acquire(&host).await;
                tracing::debug!(url = %parsed, attempt = attempt, "Sending request");
                self.attempt(method, parsed, options).await
            }
        })
        .await
    }

    async fn attempt(
        &self,
        method: Method,
        url: Url,
        options: &RequestOptions,
    ) -> AttemptOutcome<HttpResponse, FetchError> {
        let user_agent = self
            .config
            .user_agent
            .as_deref()
            .unwrap_or_else(|| random_user_agent());
        let headers = build_browser_headers(user_agent, url.as_str(), &options.headers);

        let started = Instant::now();
        let mut builder = self.client.request(method, url.clone()).headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record(false, started.elapsed());
                let err = if e.is_timeout() {
                    FetchError::Timeout(url.to_string())
                } else {
                    FetchError::Http(e)
                };
                return AttemptOutcome::Retryable(err);
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                self.stats.record(false, started.elapsed());
                return AttemptOutcome::Retryable(FetchError::Http(e));
            }
        };

        let ok = !(status.is_client_error() || status.is_server_error());
        self.stats.record(ok, started.elapsed());

        if is_retryable_status(status) {
            return AttemptOutcome::Retryable(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let content_encoding = headers.get(CONTENT_ENCODING).and_then(|v| v.to_str().ok());
        let bytes = if decode::is_textual(content_type, &final_url, content_encoding) {
            decode::recover_body(bytes, content_encoding)
        } else {
            bytes
        };

        AttemptOutcome::Done(HttpResponse::new(status, headers, bytes, &final_url))
    }
}
