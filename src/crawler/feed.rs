//! RSS/Atom tier
//!
//! Every entry becomes a candidate or is skipped with a counted reason.
//! Content selection per entry:
//!
//! 1. Feed content (the longer of `content` and `summary`, as plain text) is
//!    used when it reaches the source's `min_content_length`, or whenever the
//!    source is `rss_only`.
//! 2. Otherwise the entry page is scraped. The scraped body must be longer
//!    than the feed text, reach the minimum and pass the scrape quality gate,
//!    else the entry is dropped.
//! 3. Hosts can be skipped or scraped first through the [`HostPolicyTable`].
//! 4. Whichever text wins must pass the garbage check.
//!
//! Publication date: the feed's typed `published`/`updated` fields, then the
//! scraped page, then a fetch of the entry page's meta tags, then a date in the
//! URL path. Dates in 1970 or earlier are ignored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed};
use std::sync::Arc;

use super::fetcher::HttpTransport;
use super::host_policy::{HostPolicy, HostPolicyTable};
use super::structured::{ExtractOutcome, StructuredScraper};
use super::tier::{FetchTier, TierOutput};
use super::url::{canonicalize, date_from_url, is_absolute_http};
use crate::models::{CandidateArticle, FetchMethod, Source};
use crate::parser::date::{date_from_html, is_plausible};
use crate::parser::quality::QualityPolicy;
use crate::parser::sanitize::html_to_text;
use crate::utils::error::{ParseError, TierError};
use crate::utils::{normalize_whitespace, truncate_text};

/// Titles containing any of these (case-insensitive) are not articles
pub const DEFAULT_TITLE_FILTERS: &[&str] = &[
    "job posting",
    "we're hiring",
    "we are hiring",
    "now hiring",
    "webinar",
    "press release",
    "sponsored",
];

const SUMMARY_MAX_CHARS: usize = 500;

/// Parse an RSS, Atom or JSON feed document
pub fn parse_feed(bytes: &[u8]) -> Result<Feed, ParseError> {
    feed_rs::parser::parse(bytes).map_err(|e| ParseError::Feed(e.to_string()))
}

/// Fields of one feed entry after cleanup
#[derive(Debug, Clone)]
struct FeedEntry {
    title: String,
    url: String,
    published_at: Option<DateTime<Utc>>,
    /// Plain text of the feed's own content
    text: String,
    summary: Option<String>,
    authors: Vec<String>,
    tags: Vec<String>,
}

/// Why an entry produced no candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    MissingTitle,
    MissingUrl,
    HostSkipped,
    TitleFiltered,
    EmptyContent,
    TooShort,
    LowQuality,
    Unchanged,
    ScrapeFailed,
}

impl Skip {
    fn as_str(&self) -> &'static str {
        match self {
            Self::MissingTitle => "missing_title",
            Self::MissingUrl => "missing_url",
            Self::HostSkipped => "host_skipped",
            Self::TitleFiltered => "title_filtered",
            Self::EmptyContent => "empty_content",
            Self::TooShort => "rejected_short",
            Self::LowQuality => "rejected_quality",
            Self::Unchanged => "unchanged",
            Self::ScrapeFailed => "scrape_failed",
        }
    }
}

fn entry_url(entry: &Entry) -> Option<String> {
    let alternate = entry
        .links
        .iter()
        .filter(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"));
    alternate
        .chain(entry.links.iter())
        .map(|l| l.href.as_str())
        .chain(std::iter::once(entry.id.as_str()))
        .map(str::trim)
        .find(|u| is_absolute_http(u))
        .and_then(canonicalize)
}

fn clean_entry(entry: &Entry) -> Result<FeedEntry, Skip> {
    let title = entry
        .title
        .as_ref()
        .map(|t| normalize_whitespace(&html_to_text(&t.content)))
        .filter(|t| !t.is_empty())
        .ok_or(Skip::MissingTitle)?;
    let url = entry_url(entry).ok_or(Skip::MissingUrl)?;

    let content = entry
        .content
        .as_ref()
        .and_then(|c| c.body.as_deref())
        .map(html_to_text)
        .unwrap_or_default();
    let summary = entry
        .summary
        .as_ref()
        .map(|s| html_to_text(&s.content))
        .unwrap_or_default();

    let (text, summary) = if content.chars().count() >= summary.chars().count() {
        (content, summary)
    } else {
        (summary, content)
    };

    Ok(FeedEntry {
        title,
        url,
        published_at: entry.published.or(entry.updated).filter(is_plausible),
        text,
        summary: Some(summary)
            .filter(|s| !s.trim().is_empty())
            .map(|s| truncate_text(&normalize_whitespace(&s), SUMMARY_MAX_CHARS)),
        authors: entry
            .authors
            .iter()
            .map(|p| p.name.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect(),
        tags: entry
            .categories
            .iter()
            .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
    })
}

/// Feed tier with scrape escalation for short entries
pub struct FeedReader {
    transport: Arc<HttpTransport>,
    scraper: Arc<StructuredScraper>,
    quality: Arc<dyn QualityPolicy>,
    host_policies: HostPolicyTable,
    title_filters: Vec<String>,
    fetch_page_dates: bool,
}

impl FeedReader {
    /// Reader that escalates through `scraper` and shares its quality policy
    pub fn new(transport: Arc<HttpTransport>, scraper: Arc<StructuredScraper>) -> Self {
        let quality = scraper.extractor().quality().clone();
        Self {
            transport,
            scraper,
            quality,
            host_policies: HostPolicyTable::default(),
            title_filters: DEFAULT_TITLE_FILTERS.iter().map(|s| s.to_string()).collect(),
            fetch_page_dates: true,
        }
    }

    pub fn with_host_policies(mut self, policies: HostPolicyTable) -> Self {
        self.host_policies = policies;
        self
    }

    /// Replace the global title deny-list
    pub fn with_title_filters(mut self, keywords: Vec<String>) -> Self {
        self.title_filters = keywords;
        self
    }

    /// Whether undated entries cost an extra page fetch
    pub fn with_page_dates(mut self, enabled: bool) -> Self {
        self.fetch_page_dates = enabled;
        self
    }

    fn title_filtered(&self, source: &Source, title: &str) -> bool {
        let lower = title.to_lowercase();
        self.title_filters
            .iter()
            .chain(source.config.title_filter_keywords.iter())
            .map(|k| k.trim().to_lowercase())
            .any(|k| !k.is_empty() && lower.contains(&k))
    }

    /// Fetch and parse the feed of `source`
    ///
    /// # Errors
    ///
    /// `NotConfigured` without a feed URL; transport and feed-parse errors.
    /// Problems with single entries are counted, not returned.
    pub async fn parse(&self, source: &Source) -> Result<TierOutput, TierError> {
        let feed_url = source
            .feed_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TierError::NotConfigured(format!("{}: no feed URL", source.identifier)))?;

        let response = self.transport.get(feed_url).await?;
        response.ensure_success()?;
        let feed = parse_feed(&response.bytes)?;

        let mut output = TierOutput::default();
        output.add("entries", feed.entries.len() as u64);

        for entry in &feed.entries {
            match self.process_entry(source, entry, &mut output).await {
                Ok(candidate) => {
                    output.bump("accepted");
                    output.articles.push(candidate);
                }
                Err(skip) => {
                    tracing::debug!(
                        source = %source.identifier,
                        entry = %entry.id,
                        reason = skip.as_str(),
                        "Feed entry skipped"
                    );
                    output.bump(skip.as_str());
                }
            }
        }

        tracing::info!(
            source = %source.identifier,
            entries = feed.entries.len(),
            accepted = output.articles.len(),
            "Feed parsed"
        );
        Ok(output)
    }

    async fn process_entry(
        &self,
        source: &Source,
        entry: &Entry,
        output: &mut TierOutput,
    ) -> Result<CandidateArticle, Skip> {
        let fields = clean_entry(entry)?;

        let policy = self.host_policies.policy_for_url(&fields.url);
        if policy == HostPolicy::Skip {
            return Err(Skip::HostSkipped);
        }
        if self.title_filtered(source, &fields.title) {
            return Err(Skip::TitleFiltered);
        }

        let rss_only = source.config.rss_only;
        let min = source.config.min_content_length;
        let feed_len = fields.text.chars().count();
        let feed_usable = feed_len > 0 && (feed_len >= min || rss_only);

        let mut page = None;
        if !rss_only && (policy == HostPolicy::ScrapeFirst || !feed_usable) {
            output.bump("escalated");
            match self.escalate(source, &fields.url, feed_len, min).await {
                Ok(scraped) => page = Some(scraped),
                Err(skip) if !feed_usable => return Err(skip),
                Err(skip) => {
                    tracing::debug!(url = %fields.url, reason = skip.as_str(), "Scrape-first failed, keeping feed content");
                }
            }
        } else if !feed_usable {
            return Err(Skip::EmptyContent);
        }

        let content = page.as_ref().map_or(fields.text.as_str(), |p| p.content.as_str());
        if let Err(rejection) = self.quality.check_garbage(content) {
            tracing::warn!(source = %source.identifier, url = %fields.url, reason = %rejection, "Entry content rejected");
            return Err(Skip::LowQuality);
        }

        let mut published_at = fields
            .published_at
            .or_else(|| page.as_ref().and_then(|p| p.published_at));
        if published_at.is_none() && self.fetch_page_dates {
            published_at = self.page_date(&fields.url).await;
        }
        let published_at = published_at.or_else(|| date_from_url(&fields.url));

        let mut candidate = match page {
            Some(page) => {
                let mut candidate =
                    CandidateArticle::new(&source.identifier, &fields.url, &fields.title, &page.content)
                        .with_meta("content_source", "scrape");
                if let Some(method) = page.metadata.get("extraction_method") {
                    candidate = candidate.with_meta("extraction_method", method.clone());
                }
                candidate.authors = if fields.authors.is_empty() {
                    page.authors
                } else {
                    fields.authors
                };
                candidate.summary = fields.summary.or(page.summary);
                candidate.tags = if fields.tags.is_empty() { page.tags } else { fields.tags };
                candidate
            }
            None => {
                let mut candidate =
                    CandidateArticle::new(&source.identifier, &fields.url, &fields.title, &fields.text)
                        .with_meta("content_source", "feed");
                candidate.authors = fields.authors;
                candidate.summary = fields.summary;
                candidate.tags = fields.tags;
                candidate
            }
        };
        candidate.published_at = published_at;
        candidate = candidate
            .with_meta("tier", FetchMethod::Rss.as_str())
            .with_meta("feed_content_length", feed_len as u64);

        Ok(candidate)
    }

    async fn escalate(
        &self,
        source: &Source,
        url: &str,
        feed_len: usize,
        min: usize,
    ) -> Result<CandidateArticle, Skip> {
        let page = match self.scraper.extract(url, source).await {
            Ok(ExtractOutcome::Article(page)) => *page,
            Ok(ExtractOutcome::Unchanged) => return Err(Skip::Unchanged),
            Err(e) => {
                tracing::warn!(source = %source.identifier, url = %url, error = %e, "Entry scrape failed");
                return Err(Skip::ScrapeFailed);
            }
        };

        let scraped_len = page.content.chars().count();
        if scraped_len <= feed_len || scraped_len < min {
            tracing::debug!(url = %url, scraped_len, feed_len, min, "Scraped content too short");
            return Err(Skip::TooShort);
        }
        if let Err(rejection) = self.quality.check_scraped(&page.content) {
            tracing::warn!(source = %source.identifier, url = %url, reason = %rejection, "Scraped content rejected");
            return Err(Skip::LowQuality);
        }

        Ok(page)
    }

    async fn page_date(&self, url: &str) -> Option<DateTime<Utc>> {
        match self.transport.get_text(url).await {
            Ok(html) => date_from_html(&html),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Page date lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl FetchTier for FeedReader {
    fn method(&self) -> FetchMethod {
        FetchMethod::Rss
    }

    fn applies_to(&self, source: &Source) -> bool {
        source.has_feed()
    }

    async fn fetch_source(&self, source: &Source) -> Result<TierOutput, TierError> {
        self.parse(source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::discovery::PageDelay;
    use crate::crawler::fetcher::RequestConfig;
    use crate::crawler::rate_limit::{RateLimitConfig, RequestLimiter};
    use crate::models::SourceConfig;
    use crate::parser::ArticleExtractor;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reader() -> FeedReader {
        let limiter = Arc::new(
            RequestLimiter::new(RateLimitConfig {
                capacity: 100,
                refill_per_second: 100.0,
                ..RateLimitConfig::default()
            })
            .unwrap(),
        );
        let config = RequestConfig {
            max_retries: 0,
            ..RequestConfig::default()
        };
        let transport = Arc::new(HttpTransport::new(config, limiter).unwrap());
        let scraper = Arc::new(
            StructuredScraper::new(transport.clone(), ArticleExtractor::default())
                .with_page_delay(PageDelay::none()),
        );
        FeedReader::new(transport, scraper).with_page_dates(false)
    }

    fn rss(items: &[(&str, &str, &str)]) -> String {
        let items: String = items
            .iter()
            .map(|(title, link, description)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link>\
                     <pubDate>Tue, 02 Apr 2024 10:00:00 GMT</pubDate>\
                     <description><![CDATA[{description}]]></description></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title>
               <link>https://blog.example/</link>{items}</channel></rss>"#
        )
    }

    async fn serve_feed(server: &MockServer, body: String) {
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/rss+xml"))
            .mount(server)
            .await;
    }

    fn source(server: &MockServer, config: SourceConfig) -> Source {
        Source::new("blog", "Blog", &server.uri())
            .with_feed(&format!("{}/feed.xml", server.uri()))
            .with_config(config)
    }

    fn min_length(min: usize) -> SourceConfig {
        SourceConfig {
            min_content_length: min,
            ..SourceConfig::default()
        }
    }

    #[test]
    fn test_entry_url_prefers_absolute_links() {
        let feed = parse_feed(
            br#"<rss version="2.0"><channel><title>T</title>
                <item><title>A</title><guid>https://blog.example/a?utm_source=rss</guid></item>
                <item><title>B</title><link>/relative</link><guid isPermaLink="false">b-1</guid></item>
            </channel></rss>"#,
        )
        .unwrap();
        assert_eq!(entry_url(&feed.entries[0]).as_deref(), Some("https://blog.example/a"));
        assert_eq!(entry_url(&feed.entries[1]), None);
    }

    #[test]
    fn test_epoch_dates_ignored() {
        let feed = parse_feed(
            br#"<rss version="2.0"><channel><title>T</title>
                <item><title>A &amp;amp; B</title><link>https://blog.example/a</link>
                <pubDate>Thu, 01 Jan 1970 00:00:00 GMT</pubDate></item>
            </channel></rss>"#,
        )
        .unwrap();
        let fields = clean_entry(&feed.entries[0]).unwrap();
        assert!(fields.published_at.is_none());
        assert_eq!(fields.title, "A & B");
    }

    #[tokio::test]
    async fn test_missing_feed_url() {
        let err = reader()
            .parse(&Source::new("s", "S", "https://blog.example/"))
            .await
            .unwrap_err();
        assert!(matches!(err, TierError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_long_feed_content_used_without_scrape() {
        let server = MockServer::start().await;
        let body = "Adversaries exploited the VPN appliance before the patch. ".repeat(20);
        serve_feed(
            &server,
            rss(&[("Long post", "https://blog.example/2024/04/02/long", &format!("<p>{body}</p>"))]),
        )
        .await;

        let output = reader().parse(&source(&server, min_length(500))).await.unwrap();
        assert_eq!(output.articles.len(), 1);
        let article = &output.articles[0];
        assert_eq!(article.title, "Long post");
        assert_eq!(article.metadata["content_source"], "feed");
        assert!(article.published_at.is_some());
        assert_eq!(output.stats["accepted"], 1);
        assert!(!output.stats.contains_key("escalated"));
    }

    #[tokio::test]
    async fn test_short_entry_escalates_to_page() {
        let server = MockServer::start().await;
        let page_url = format!("{}/post", server.uri());
        serve_feed(&server, rss(&[("Teaser", &page_url, "Short teaser.")])).await;

        let paragraph = "The implant beacons every ten minutes over DNS. It rotates keys weekly. "
            .repeat(12);
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                format!("<html><body><article><h1>Teaser</h1><p>{paragraph}</p></article></body></html>"),
                "text/html",
            ))
            .mount(&server)
            .await;

        let output = reader().parse(&source(&server, min_length(300))).await.unwrap();
        assert_eq!(output.articles.len(), 1);
        assert_eq!(output.articles[0].metadata["content_source"], "scrape");
        assert!(output.articles[0].content.contains("beacons every ten minutes"));
        assert_eq!(output.stats["escalated"], 1);
    }

    #[tokio::test]
    async fn test_short_entry_rejected_when_scrape_fails() {
        let server = MockServer::start().await;
        let page_url = format!("{}/gone", server.uri());
        serve_feed(&server, rss(&[("Teaser", &page_url, "Short teaser.")])).await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let output = reader().parse(&source(&server, min_length(300))).await.unwrap();
        assert!(output.articles.is_empty());
        assert_eq!(output.stats["scrape_failed"], 1);
    }

    #[tokio::test]
    async fn test_garbage_feed_content_dropped() {
        let server = MockServer::start().await;
        let prose = "Operators reused the loader from last year's campaign. ".repeat(4);
        let garbage = format!("{prose} compression failed {}", r"[{|\}]".repeat(200));
        serve_feed(
            &server,
            rss(&[
                ("Broken entry", "https://blog.example/2024/04/02/broken", &garbage),
                ("Clean entry", "https://blog.example/2024/04/02/clean", &prose.repeat(2)),
            ]),
        )
        .await;

        let output = reader().parse(&source(&server, min_length(100))).await.unwrap();
        assert_eq!(output.articles.len(), 1);
        assert_eq!(output.articles[0].title, "Clean entry");
        assert_eq!(output.stats["rejected_quality"], 1);
    }

    #[tokio::test]
    async fn test_rss_only_keeps_short_content() {
        let server = MockServer::start().await;
        serve_feed(
            &server,
            rss(&[("Brief", "https://blog.example/brief", "<p>Two lines of news.</p>")]),
        )
        .await;

        let config = SourceConfig {
            rss_only: true,
            ..SourceConfig::default()
        };
        let output = reader().parse(&source(&server, config)).await.unwrap();
        assert_eq!(output.articles.len(), 1);
        assert_eq!(output.articles[0].content, "Two lines of news.");
        assert!(!output.stats.contains_key("escalated"));
    }

    #[tokio::test]
    async fn test_title_filter_and_host_skip() {
        let server = MockServer::start().await;
        let body = "<p>Body.</p>";
        serve_feed(
            &server,
            rss(&[
                ("Join our Webinar on ransomware", "https://blog.example/w", body),
                ("Quarterly roundup", "https://blog.example/r", body),
                ("Blocked host post", "https://blocked.example/p", body),
                ("Kept", "https://blog.example/k", body),
            ]),
        )
        .await;

        let config = SourceConfig {
            rss_only: true,
            title_filter_keywords: vec!["roundup".into()],
            ..SourceConfig::default()
        };
        let reader = reader()
            .with_host_policies(HostPolicyTable::new().with("blocked.example", HostPolicy::Skip));
        let output = reader.parse(&source(&server, config)).await.unwrap();

        assert_eq!(output.articles.len(), 1);
        assert_eq!(output.articles[0].title, "Kept");
        assert_eq!(output.stats["title_filtered"], 2);
        assert_eq!(output.stats["host_skipped"], 1);
        assert_eq!(output.stats["entries"], 4);
    }
}
