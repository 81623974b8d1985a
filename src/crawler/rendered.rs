//! Rendered-page tier
//!
//! Same discovery and extraction as the structured tier, but HTML pages are
//! loaded through a headless browser service so client-side scripts can
//! populate the DOM first. Sitemaps are plain XML and still go over HTTP.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::discovery::{PageDelay, PageLoader, UrlDiscovery};
use super::fetcher::{validate_url, HttpTransport};
use super::rate_limit::RequestLimiter;
use super::structured::{page_candidate, DEFAULT_MAX_PAGES_PER_SOURCE};
use super::tier::{FetchTier, TierOutput};
use crate::models::{CandidateArticle, FetchMethod, Source};
use crate::parser::ArticleExtractor;
use crate::utils::error::{FetchError, TierError};

/// When the browser considers a page ready
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    Load,
    DomContentLoaded,
    /// No network activity for a short period
    #[default]
    NetworkIdle,
    /// A CSS selector matches
    Selector(String),
}

impl WaitPolicy {
    fn wait_until(&self) -> &'static str {
        match self {
            Self::Load | Self::Selector(_) => "load",
            Self::DomContentLoaded => "domcontentloaded",
            Self::NetworkIdle => "networkidle2",
        }
    }
}

/// Render service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Base URL of the render service; the tier is disabled when unset
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub wait: WaitPolicy,
    pub timeout_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            wait: WaitPolicy::default(),
            timeout_ms: 30_000,
        }
    }
}

/// Headless browser that returns rendered markup
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render(&self, url: &str, wait: &WaitPolicy, timeout_ms: u64) -> Result<String, FetchError>;
}

/// Client for a Browserless-style `/content` endpoint
pub struct BrowserlessEngine {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessEngine {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Engine for `config`, `None` when no endpoint is configured
    pub fn from_config(config: &RenderConfig) -> Result<Option<Self>, FetchError> {
        config
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(|endpoint| Self::new(endpoint, config.token.as_deref()))
            .transpose()
    }

    fn request_body(url: &str, wait: &WaitPolicy, timeout_ms: u64) -> serde_json::Value {
        let mut body = serde_json::json!({
            "url": url,
            "gotoOptions": { "waitUntil": wait.wait_until(), "timeout": timeout_ms },
        });
        if let WaitPolicy::Selector(selector) = wait {
            body["waitForSelector"] = serde_json::json!({ "selector": selector, "timeout": timeout_ms });
        }
        body
    }
}

#[async_trait]
impl RenderEngine for BrowserlessEngine {
    async fn render(&self, url: &str, wait: &WaitPolicy, timeout_ms: u64) -> Result<String, FetchError> {
        let endpoint = format!("{}/content", self.base_url);
        let mut request = self
            .client
            .post(&endpoint)
            .timeout(Duration::from_millis(timeout_ms.saturating_add(5_000)))
            .json(&Self::request_body(url, wait, timeout_ms));
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
        }

        // The endpoint URL carries the token; keep it out of errors.
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(url.to_string())
            } else {
                FetchError::Http(e.without_url())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Render(format!(
                "HTTP {} rendering {url}: {}",
                status.as_u16(),
                message.trim()
            )));
        }

        response.text().await.map_err(|e| FetchError::Http(e.without_url()))
    }
}

/// Rate-limited page loads through the render engine
struct RenderLoader<'a> {
    engine: &'a dyn RenderEngine,
    limiter: &'a RequestLimiter,
    wait: &'a WaitPolicy,
    timeout_ms: u64,
}

#[async_trait]
impl PageLoader for RenderLoader<'_> {
    async fn load(&self, url: &str) -> Result<String, FetchError> {
        let parsed = validate_url(url)?;
        self.limiter.acquire(parsed.host_str().unwrap_or_default()).await;
        tracing::debug!(url = %url, "Rendering page");
        self.engine.render(url, self.wait, self.timeout_ms).await
    }
}

/// Discovery and extraction over rendered pages
pub struct RenderedScraper {
    engine: Arc<dyn RenderEngine>,
    transport: Arc<HttpTransport>,
    extractor: ArticleExtractor,
    wait: WaitPolicy,
    timeout_ms: u64,
    delay: PageDelay,
    max_pages: usize,
}

impl RenderedScraper {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        transport: Arc<HttpTransport>,
        extractor: ArticleExtractor,
    ) -> Self {
        let defaults = RenderConfig::default();
        Self {
            engine,
            transport,
            extractor,
            wait: defaults.wait,
            timeout_ms: defaults.timeout_ms,
            delay: PageDelay::default(),
            max_pages: DEFAULT_MAX_PAGES_PER_SOURCE,
        }
    }

    pub fn with_wait(mut self, wait: WaitPolicy, timeout_ms: u64) -> Self {
        self.wait = wait;
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_page_delay(mut self, delay: PageDelay) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    fn loader(&self) -> RenderLoader<'_> {
        RenderLoader {
            engine: self.engine.as_ref(),
            limiter: self.transport.limiter().as_ref(),
            wait: &self.wait,
            timeout_ms: self.timeout_ms,
        }
    }

    /// Article URLs for `source`, listing pages rendered
    pub async fn discover(&self, source: &Source) -> Result<Vec<String>, TierError> {
        let loader = self.loader();
        UrlDiscovery::new(&loader, self.transport.as_ref(), self.delay)
            .discover(source)
            .await
    }

    /// Render and extract one article page
    pub async fn extract(&self, url: &str, source: &Source) -> Result<CandidateArticle, TierError> {
        let html = self.loader().load(url).await?;
        let extracted = self
            .extractor
            .extract(&html, url, &source.config.extraction)?;
        Ok(page_candidate(extracted, source, url, FetchMethod::Rendered))
    }
}

#[async_trait]
impl FetchTier for RenderedScraper {
    fn method(&self) -> FetchMethod {
        FetchMethod::Rendered
    }

    fn applies_to(&self, source: &Source) -> bool {
        source.config.use_rendering
    }

    async fn fetch_source(&self, source: &Source) -> Result<TierOutput, TierError> {
        let mut output = TierOutput::default();
        let urls = self.discover(source).await?;
        output.add("discovered", urls.len() as u64);

        for (i, url) in urls.iter().take(self.max_pages).enumerate() {
            if i > 0 {
                self.delay.wait().await;
            }
            match self.extract(url, source).await {
                Ok(candidate) => {
                    output.bump("extracted");
                    output.articles.push(candidate);
                }
                Err(e) => {
                    tracing::warn!(source = %source.identifier, url = %url, error = %e, "Rendered extraction failed");
                    output.bump("failed");
                }
            }
        }

        Ok(output)
    }
}
