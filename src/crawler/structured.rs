//! Structured-page tier: discover article URLs, then extract each page
//!
//! Pages of one source are fetched sequentially with a randomized pause in
//! between. Responses carry `ETag`/`Last-Modified` validators which are sent
//! back on the next visit so an unchanged page costs a `304`.

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::discovery::{PageDelay, UrlDiscovery};
use super::fetcher::{HttpResponse, HttpTransport, RequestOptions};
use super::tier::{FetchTier, TierOutput};
use super::url::{canonicalize, date_from_url};
use crate::models::{CandidateArticle, FetchMethod, Source};
use crate::parser::{ArticleExtractor, ExtractedArticle};
use crate::utils::error::TierError;

/// Default cap on pages extracted per source and run
pub const DEFAULT_MAX_PAGES_PER_SOURCE: usize = 50;

/// Result of extracting one page
#[derive(Debug)]
pub enum ExtractOutcome {
    Article(Box<CandidateArticle>),
    /// The server answered `304 Not Modified`
    Unchanged,
}

#[derive(Debug, Clone, Default)]
struct Validators {
    etag: Option<String>,
    last_modified: Option<String>,
}

impl Validators {
    fn from_response(response: &HttpResponse) -> Option<Self> {
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let validators = Self {
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        };
        (validators.etag.is_some() || validators.last_modified.is_some()).then_some(validators)
    }
}

/// Build a candidate from an extracted page
///
/// The canonical URL is the canonical form of `url`; a missing publication
/// date falls back to a `/YYYY/MM/DD/` segment in the URL.
pub(crate) fn page_candidate(
    extracted: ExtractedArticle,
    source: &Source,
    url: &str,
    method: FetchMethod,
) -> CandidateArticle {
    let canonical = canonicalize(url).unwrap_or_else(|| url.to_string());
    let mut candidate = extracted
        .into_candidate(&source.identifier, &canonical)
        .with_meta("tier", method.as_str());
    if candidate.published_at.is_none() {
        candidate.published_at = date_from_url(&canonical);
    }
    candidate
}

/// Listing/sitemap discovery plus per-page extraction over plain HTTP
pub struct StructuredScraper {
    transport: Arc<HttpTransport>,
    extractor: ArticleExtractor,
    delay: PageDelay,
    max_pages: usize,
    validators: RwLock<HashMap<String, Validators>>,
}

impl StructuredScraper {
    pub fn new(transport: Arc<HttpTransport>, extractor: ArticleExtractor) -> Self {
        Self {
            transport,
            extractor,
            delay: PageDelay::default(),
            max_pages: DEFAULT_MAX_PAGES_PER_SOURCE,
            validators: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_page_delay(mut self, delay: PageDelay) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn extractor(&self) -> &ArticleExtractor {
        &self.extractor
    }

    /// Article URLs for `source`
    pub async fn discover(&self, source: &Source) -> Result<Vec<String>, TierError> {
        let http = self.transport.as_ref();
        UrlDiscovery::new(http, http, self.delay).discover(source).await
    }

    /// Fetch and extract one article page
    ///
    /// # Errors
    ///
    /// Transport failures, non-success statuses and extraction rejections
    /// (missing title or body, garbage content).
    pub async fn extract(&self, url: &str, source: &Source) -> Result<ExtractOutcome, TierError> {
        let mut options = RequestOptions::default();
        if let Some(known) = self.validators.read().await.get(url) {
            if let Some(etag) = &known.etag {
                options = options.with_header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = &known.last_modified {
                options = options.with_header(IF_MODIFIED_SINCE, modified);
            }
        }

        let response = self.transport.request(Method::GET, url, &options).await?;
        if response.is_not_modified() {
            tracing::debug!(url = %url, "Page unchanged since last visit");
            return Ok(ExtractOutcome::Unchanged);
        }
        response.ensure_success()?;

        if let Some(validators) = Validators::from_response(&response) {
            self.validators
                .write()
                .await
                .insert(url.to_string(), validators);
        }

        let extracted = self
            .extractor
            .extract(response.text(), url, &source.config.extraction)?;

        Ok(ExtractOutcome::Article(Box::new(page_candidate(
            extracted,
            source,
            url,
            FetchMethod::Structured,
        ))))
    }
}

#[async_trait]
impl FetchTier for StructuredScraper {
    fn method(&self) -> FetchMethod {
        FetchMethod::Structured
    }

    fn applies_to(&self, source: &Source) -> bool {
        source.config.has_structured_config()
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
                Ok(ExtractOutcome::Article(candidate)) => {
                    output.bump("extracted");
                    output.articles.push(*candidate);
                }
                Ok(ExtractOutcome::Unchanged) => output.bump("unchanged"),
                Err(e) => {
                    tracing::warn!(source = %source.identifier, url = %url, error = %e, "Page extraction failed");
                    output.bump("failed");
                }
            }
        }

        tracing::info!(
            source = %source.identifier,
            discovered = urls.len(),
            extracted = output.articles.len(),
            "Structured scrape finished"
        );
        Ok(output)
    }
}
