//! Last-resort tier: treat the source's base URL as a single article page
//!
//! No discovery. The source may name one `legacy_content_selector`, tried
//! before the configured and default body chains.

use async_trait::async_trait;
use std::sync::Arc;

use super::fetcher::HttpTransport;
use super::structured::page_candidate;
use super::tier::{FetchTier, TierOutput};
use crate::models::{FetchMethod, Source};
use crate::parser::ArticleExtractor;
use crate::utils::error::TierError;

pub struct LegacyScraper {
    transport: Arc<HttpTransport>,
    extractor: ArticleExtractor,
}

impl LegacyScraper {
    pub fn new(transport: Arc<HttpTransport>, extractor: ArticleExtractor) -> Self {
        Self {
            transport,
            extractor,
        }
    }
}

#[async_trait]
impl FetchTier for LegacyScraper {
    fn method(&self) -> FetchMethod {
        FetchMethod::Legacy
    }

    fn applies_to(&self, _source: &Source) -> bool {
        true
    }

    async fn fetch_source(&self, source: &Source) -> Result<TierOutput, TierError> {
        let html = self.transport.get_text(&source.url).await?;

        let mut extraction = source.config.extraction.clone();
        if let Some(selector) = source
            .config
            .legacy_content_selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            extraction.body.insert(0, selector.to_string());
        }

        let extracted = self.extractor.extract(&html, &source.url, &extraction)?;
        let mut output = TierOutput::default();
        output.bump("extracted");
        output
            .articles
            .push(page_candidate(extracted, source, &source.url, FetchMethod::Legacy));
        Ok(output)
    }
}
