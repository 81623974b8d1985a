//! Article field extraction from HTML pages
//!
//! One extractor serves the structured, rendered and legacy tiers. Field
//! sources are tried in order:
//!
//! 1. JSON-LD article metadata (when `prefer_jsonld`)
//! 2. Selectors configured for the source
//! 3. Default selector chains
//! 4. For the body only: the container with the most paragraph text, then
//!    `<body>`, then the whole document
//!
//! A page is rejected when title or body is still empty, or when the quality
//! policy flags the body as garbage.

pub mod date;
pub mod jsonld;
pub mod quality;
pub mod sanitize;
pub mod selectors;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{CandidateArticle, ExtractionConfig};
use crate::utils::error::ParseError;
use quality::{DefaultQualityPolicy, QualityPolicy};
use sanitize::{has_content, html_to_text, sanitize_text};

/// Minimum text a default body selector must yield to be trusted
const MIN_DEFAULT_BODY_CHARS: usize = 200;

/// Where the body text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    JsonLd,
    ConfiguredSelector,
    DefaultSelector,
    LargestContainer,
    PageBody,
    Document,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JsonLd => "json_ld",
            Self::ConfiguredSelector => "configured_selector",
            Self::DefaultSelector => "default_selector",
            Self::LargestContainer => "largest_container",
            Self::PageBody => "page_body",
            Self::Document => "document",
        }
    }
}

/// Fields extracted from one page
#[derive(Debug, Clone)]
pub struct ExtractedArticle {
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub method: ExtractionMethod,
}

impl ExtractedArticle {
    /// Turn the extraction into a candidate for `source_id`
    pub fn into_candidate(self, source_id: &str, url: &str) -> CandidateArticle {
        let mut candidate = CandidateArticle::new(source_id, url, &self.title, &self.content)
            .with_meta("extraction_method", self.method.as_str());
        candidate.published_at = self.published_at;
        candidate.authors = self.authors;
        candidate.summary = self.summary;
        candidate.tags = self.tags;
        candidate
    }
}

struct CompiledSelectors {
    title: Vec<Selector>,
    date: Vec<Selector>,
    body: Vec<Selector>,
    author: Vec<Selector>,
}

impl CompiledSelectors {
    fn compile(config: &ExtractionConfig) -> Result<Self, ParseError> {
        Ok(Self {
            title: selectors::compile(&config.title)?,
            date: selectors::compile(&config.date)?,
            body: selectors::compile(&config.body)?,
            author: selectors::compile(&config.author)?,
        })
    }
}

/// HTML → article fields
#[derive(Clone)]
pub struct ArticleExtractor {
    quality: Arc<dyn QualityPolicy>,
}

impl Default for ArticleExtractor {
    fn default() -> Self {
        Self::new(Arc::new(DefaultQualityPolicy::default()))
    }
}

impl ArticleExtractor {
    pub fn new(quality: Arc<dyn QualityPolicy>) -> Self {
        Self { quality }
    }

    pub fn quality(&self) -> &Arc<dyn QualityPolicy> {
        &self.quality
    }

    /// Extract article fields from `html`
    ///
    /// # Errors
    ///
    /// - `InvalidSelector` when a configured selector does not parse
    /// - `TitleNotFound` / `ContentNotFound` when a field stays empty
    /// - `Rejected` when the body fails the garbage check
    pub fn extract(
        &self,
        html: &str,
        url: &str,
        config: &ExtractionConfig,
    ) -> Result<ExtractedArticle, ParseError> {
        let configured = CompiledSelectors::compile(config)?;
        let document = Html::parse_document(html);

        let ld = if config.prefer_jsonld {
            jsonld::extract(&document)
        } else {
            None
        };

        let title = ld
            .as_ref()
            .and_then(|a| a.headline.clone())
            .or_else(|| first_text(&document, &configured.title))
            .or_else(|| first_text(&document, &selectors::DEFAULT_TITLE))
            .map(|t| sanitize_text(&t))
            .filter(|t| has_content(t))
            .ok_or(ParseError::TitleNotFound)?;

        let (content, method) = match ld.as_ref().and_then(|a| a.article_body.clone()) {
            Some(body) => (body, ExtractionMethod::JsonLd),
            None => extract_body(&document, &configured.body),
        };
        if !has_content(&content) {
            return Err(ParseError::ContentNotFound);
        }

        if let Err(rejection) = self.quality.check_garbage(&content) {
            tracing::warn!(url = %url, reason = %rejection, "Extracted content rejected");
            return Err(ParseError::Rejected(rejection.to_string()));
        }

        let published_at = ld
            .as_ref()
            .and_then(|a| a.date_published)
            .or_else(|| first_date(&document, &configured.date))
            .or_else(|| first_date(&document, &selectors::DEFAULT_DATE))
            .or_else(|| date::date_from_document(&document));

        let authors = match ld.as_ref().map(|a| a.authors.clone()) {
            Some(authors) if !authors.is_empty() => authors,
            _ => first_text(&document, &configured.author)
                .or_else(|| first_text(&document, &selectors::DEFAULT_AUTHOR))
                .map(|a| vec![sanitize_text(&a)])
                .unwrap_or_default(),
        };

        let (summary, tags) = match ld {
            Some(a) => (a.description.filter(|d| has_content(d)), a.keywords),
            None => (None, Vec::new()),
        };

        tracing::debug!(url = %url, method = method.as_str(), chars = content.len(), "Extracted article");

        Ok(ExtractedArticle {
            title,
            content,
            published_at,
            authors,
            summary,
            tags,
            method,
        })
    }
}

fn first_text(document: &Html, chain: &[Selector]) -> Option<String> {
    chain.iter().find_map(|selector| {
        document
            .select(selector)
            .map(|el| selectors::element_value(&el))
            .find(|text| has_content(text))
    })
}

fn first_date(document: &Html, chain: &[Selector]) -> Option<DateTime<Utc>> {
    chain.iter().find_map(|selector| {
        document
            .select(selector)
            .find_map(|el| date::parse_date(&selectors::element_date_value(&el)))
    })
}

/// Drop noise elements from an element's markup
pub fn remove_noise_from_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut result = html.to_string();

    for selector in selectors::NOISE.iter() {
        for element in fragment.select(selector) {
            result = result.replace(&element.html(), "");
        }
    }

    result
}

fn element_text(element: &ElementRef<'_>) -> String {
    html_to_text(&remove_noise_from_html(&element.html()))
}

fn paragraph_score(element: &ElementRef<'_>) -> usize {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "p")
        .map(|p| p.text().map(str::len).sum::<usize>())
        .sum()
}

fn extract_body(document: &Html, configured: &[Selector]) -> (String, ExtractionMethod) {
    for selector in configured {
        if let Some(text) = document
            .select(selector)
            .map(|el| element_text(&el))
            .find(|t| has_content(t))
        {
            return (text, ExtractionMethod::ConfiguredSelector);
        }
    }

    for selector in selectors::DEFAULT_BODY.iter() {
        if let Some(text) = document
            .select(selector)
            .map(|el| element_text(&el))
            .find(|t| t.chars().count() >= MIN_DEFAULT_BODY_CHARS)
        {
            return (text, ExtractionMethod::DefaultSelector);
        }
    }

    let largest = document
        .select(&selectors::CONTAINERS)
        .map(|el| (paragraph_score(&el), el))
        .filter(|(score, _)| *score > 0)
        .max_by_key(|(score, _)| *score);
    if let Some((_, container)) = largest {
        let text = element_text(&container);
        if has_content(&text) {
            return (text, ExtractionMethod::LargestContainer);
        }
    }

    if let Some(body) = document.select(&selectors::BODY).next() {
        let text = element_text(&body);
        if has_content(&text) {
            return (text, ExtractionMethod::PageBody);
        }
    }

    (
        html_to_text(&document.root_element().html()),
        ExtractionMethod::Document,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn long_paragraph() -> String {
        "Researchers observed the group deploying a new backdoor against telecom targets. "
            .repeat(6)
    }

    #[test]
    fn test_jsonld_preferred() {
        let html = format!(
            r#"<html><head>
                <script type="application/ld+json">
                {{"@type": "NewsArticle", "headline": "LD title",
                  "datePublished": "2024-05-06T00:00:00Z", "articleBody": "LD body text.",
                  "author": {{"name": "Jane"}}, "keywords": ["apt", "telecom"]}}
                </script></head>
                <body><h1>Markup title</h1><article><p>{}</p></article></body></html>"#,
            long_paragraph()
        );

        let article = ArticleExtractor::default()
            .extract(&html, "https://a.example/p", &ExtractionConfig::default())
            .unwrap();

        assert_eq!(article.title, "LD title");
        assert_eq!(article.content, "LD body text.");
        assert_eq!(article.method, ExtractionMethod::JsonLd);
        assert_eq!(article.authors, vec!["Jane"]);
        assert_eq!(article.tags, vec!["apt", "telecom"]);
        assert_eq!(article.published_at.unwrap().day(), 6);
    }

    #[test]
    fn test_configured_selectors_when_jsonld_disabled() {
        let html = format!(
            r#"<html><body>
                <div class="headline">Configured title</div>
                <div class="story"><p>{}</p><div class="share">Share this</div></div>
                <span class="when">2023-09-10</span>
            </body></html>"#,
            long_paragraph()
        );
        let config = ExtractionConfig {
            prefer_jsonld: false,
            title: vec![".headline".into()],
            body: vec![".story".into()],
            date: vec![".when".into()],
            ..ExtractionConfig::default()
        };

        let article = ArticleExtractor::default()
            .extract(&html, "https://a.example/p", &config)
            .unwrap();

        assert_eq!(article.title, "Configured title");
        assert_eq!(article.method, ExtractionMethod::ConfiguredSelector);
        assert!(!article.content.contains("Share this"));
        assert_eq!(article.published_at.unwrap().year(), 2023);
    }

    #[test]
    fn test_largest_container_fallback() {
        let html = format!(
            r#"<html><body>
                <h1>Title</h1>
                <div class="sidebar"><p>short</p></div>
                <div class="content"><p>{0}</p><p>{0}</p></div>
            </body></html>"#,
            long_paragraph()
        );

        let article = ArticleExtractor::default()
            .extract(&html, "https://a.example/p", &ExtractionConfig::default())
            .unwrap();

        assert_eq!(article.method, ExtractionMethod::LargestContainer);
        assert!(!article.content.contains("short"));
    }

    #[test]
    fn test_body_fallback_always_yields_content() {
        let html = "<html><body><h1>Title</h1><span>Loose text only</span></body></html>";
        let article = ArticleExtractor::default()
            .extract(html, "https://a.example/p", &ExtractionConfig::default())
            .unwrap();
        assert_eq!(article.method, ExtractionMethod::PageBody);
        assert!(article.content.contains("Loose text only"));
    }

    #[test]
    fn test_missing_title_rejected() {
        let html = "<html><body><p>Body without any heading.</p></body></html>";
        assert!(matches!(
            ArticleExtractor::default().extract(html, "u", &ExtractionConfig::default()),
            Err(ParseError::TitleNotFound)
        ));
    }

    #[test]
    fn test_garbage_body_rejected() {
        let html = "<html><head><title>T</title></head><body>\
                    <p>{|}[\\]{|}[\\]{|}[\\] compression failed</p></body></html>";
        assert!(matches!(
            ArticleExtractor::default().extract(html, "u", &ExtractionConfig::default()),
            Err(ParseError::Rejected(_))
        ));
    }

    #[test]
    fn test_invalid_configured_selector() {
        let config = ExtractionConfig {
            body: vec!["div[".into()],
            ..ExtractionConfig::default()
        };
        assert!(matches!(
            ArticleExtractor::default().extract("<html></html>", "u", &config),
            Err(ParseError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_into_candidate() {
        let extracted = ExtractedArticle {
            title: "T".into(),
            content: "Body".into(),
            published_at: None,
            authors: vec!["A".into()],
            summary: None,
            tags: Vec::new(),
            method: ExtractionMethod::PageBody,
        };
        let candidate = extracted.into_candidate("src", "https://a.example/1");
        assert_eq!(candidate.authors, vec!["A"]);
        assert_eq!(
            candidate.metadata.get("extraction_method"),
            Some(&serde_json::json!("page_body"))
        );
    }
}
