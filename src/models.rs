// Core data structures for feedhound

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::dedup::fingerprint::Fingerprint;

/// Default minimum plain-text length for feed content to be accepted as-is
pub const DEFAULT_MIN_CONTENT_LENGTH: usize = 2000;

/// Default interval between checks of one source
pub const DEFAULT_CHECK_FREQUENCY_SECS: u64 = 3600;

/// A configured article origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Stable identifier
    pub identifier: String,

    /// Display name
    pub name: String,

    /// Base URL
    pub url: String,

    /// Optional RSS/Atom feed URL
    #[serde(default)]
    pub feed_url: Option<String>,

    #[serde(default = "default_true")]
    pub active: bool,

    /// Per-tier settings
    #[serde(default)]
    pub config: SourceConfig,

    /// Seconds between checks
    #[serde(default = "default_check_frequency")]
    pub check_frequency_secs: u64,

    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,

    #[serde(default)]
    pub consecutive_failures: u32,
}

impl Source {
    /// Create an active source with default configuration
    pub fn new(identifier: &str, name: &str, url: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            feed_url: None,
            active: true,
            config: SourceConfig::default(),
            check_frequency_secs: DEFAULT_CHECK_FREQUENCY_SECS,
            last_checked: None,
            last_success: None,
            consecutive_failures: 0,
        }
    }

    /// Set the feed URL
    pub fn with_feed(mut self, feed_url: &str) -> Self {
        self.feed_url = Some(feed_url.to_string());
        self
    }

    /// Replace the tier configuration
    pub fn with_config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }

    /// Interval between checks
    pub fn check_frequency(&self) -> Duration {
        Duration::from_secs(self.check_frequency_secs)
    }

    /// Whether the source should be fetched at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.last_checked {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed.num_seconds() >= self.check_frequency_secs as i64
            }
        }
    }

    /// Whether a feed tier applies
    pub fn has_feed(&self) -> bool {
        self.feed_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}

fn default_true() -> bool {
    true
}

fn default_check_frequency() -> u64 {
    DEFAULT_CHECK_FREQUENCY_SECS
}

fn default_min_content_length() -> usize {
    DEFAULT_MIN_CONTENT_LENGTH
}

/// Typed per-source tier configuration
///
/// Keys the fetch tiers do not read are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL discovery strategies for the structured tier
    #[serde(default)]
    pub discovery: Vec<DiscoveryStrategy>,

    /// Field extraction selectors
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Minimum plain-text length for feed content
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,

    /// Never escalate feed entries to a page scrape
    #[serde(default)]
    pub rss_only: bool,

    /// Pages need a headless browser
    #[serde(default)]
    pub use_rendering: bool,

    /// Allow-list of article URL patterns
    #[serde(default, deserialize_with = "one_or_many")]
    pub post_url_regex: Vec<String>,

    /// Allowed article domains
    #[serde(default, deserialize_with = "one_or_many")]
    pub allow: Vec<String>,

    /// Extra title deny-list keywords for this source
    #[serde(default)]
    pub title_filter_keywords: Vec<String>,

    /// Content selector used by the legacy single-page tier
    #[serde(default)]
    pub legacy_content_selector: Option<String>,

    /// Forward-compatible keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            discovery: Vec::new(),
            extraction: ExtractionConfig::default(),
            min_content_length: DEFAULT_MIN_CONTENT_LENGTH,
            rss_only: false,
            use_rendering: false,
            post_url_regex: Vec::new(),
            allow: Vec::new(),
            title_filter_keywords: Vec::new(),
            legacy_content_selector: None,
            extra: BTreeMap::new(),
        }
    }
}

impl SourceConfig {
    /// Whether the structured tier has anything to work with
    pub fn has_structured_config(&self) -> bool {
        !self.discovery.is_empty() || !self.post_url_regex.is_empty()
    }
}

/// How the structured tier finds article URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryStrategy {
    /// Paginated index pages
    Listing {
        #[serde(deserialize_with = "one_or_many")]
        urls: Vec<String>,
        post_link_selector: String,
        #[serde(default)]
        next_selector: Option<String>,
        #[serde(default = "default_max_pages")]
        max_pages: u32,
    },
    /// Sitemaps, sitemap indexes are expanded
    Sitemap {
        #[serde(deserialize_with = "one_or_many")]
        urls: Vec<String>,
    },
}

fn default_max_pages() -> u32 {
    3
}

/// Ordered CSS selectors per article field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Use JSON-LD article metadata when present
    #[serde(default = "default_true")]
    pub prefer_jsonld: bool,

    #[serde(default)]
    pub title: Vec<String>,

    #[serde(default)]
    pub date: Vec<String>,

    #[serde(default)]
    pub body: Vec<String>,

    #[serde(default)]
    pub author: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            prefer_jsonld: true,
            title: Vec::new(),
            date: Vec::new(),
            body: Vec::new(),
            author: Vec::new(),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// A fetched, extracted article awaiting deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateArticle {
    pub source_id: String,
    pub canonical_url: String,
    pub title: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Cleaned plain text
    pub content: String,
    pub summary: Option<String>,
    pub authors: Vec<String>,
    pub tags: Vec<String>,
    pub content_hash: String,
    pub simhash: u64,
    pub simhash_bucket: u8,
    /// Extraction method, parsing stats
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CandidateArticle {
    /// Build a candidate and compute its fingerprints
    pub fn new(source_id: &str, canonical_url: &str, title: &str, content: &str) -> Self {
        let fingerprint = Fingerprint::compute(title, content);
        Self {
            source_id: source_id.to_string(),
            canonical_url: canonical_url.to_string(),
            title: title.to_string(),
            published_at: None,
            content: content.to_string(),
            summary: None,
            authors: Vec::new(),
            tags: Vec::new(),
            content_hash: fingerprint.content_hash,
            simhash: fingerprint.simhash,
            simhash_bucket: fingerprint.bucket,
            metadata: BTreeMap::new(),
        }
    }

    /// Recompute fingerprints after title or content changed
    pub fn refresh_fingerprint(&mut self) {
        let fingerprint = Fingerprint::compute(&self.title, &self.content);
        self.content_hash = fingerprint.content_hash;
        self.simhash = fingerprint.simhash;
        self.simhash_bucket = fingerprint.bucket;
    }

    /// Fingerprint view of this candidate
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            content_hash: self.content_hash.clone(),
            simhash: self.simhash,
            bucket: self.simhash_bucket,
        }
    }

    /// Attach a metadata entry
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Title and content are both present
    pub fn is_complete(&self) -> bool {
        !self.title.trim().is_empty() && !self.content.trim().is_empty()
    }
}

/// Which tier produced a fetch result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    Rss,
    Rendered,
    Structured,
    Legacy,
    AllFailed,
    Error,
}

impl FetchMethod {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rss => "rss",
            Self::Rendered => "rendered",
            Self::Structured => "structured",
            Self::Legacy => "legacy",
            Self::AllFailed => "all_failed",
            Self::Error => "error",
        }
    }

    /// Tiers in the order the orchestrator tries them
    pub fn tiers() -> [Self; 4] {
        [Self::Rss, Self::Rendered, Self::Structured, Self::Legacy]
    }
}

impl std::fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome of fetching one source once
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub source_id: String,
    pub method: FetchMethod,
    pub articles: Vec<CandidateArticle>,
    pub success: bool,
    pub error: Option<String>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// Tier-specific counters
    pub stats: BTreeMap<String, u64>,
}

impl FetchResult {
    /// Successful result from `method`
    pub fn succeeded(
        source_id: &str,
        method: FetchMethod,
        articles: Vec<CandidateArticle>,
        elapsed: Duration,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            method,
            articles,
            success: true,
            error: None,
            elapsed,
            stats: BTreeMap::new(),
        }
    }

    /// Failed result
    pub fn failed(source_id: &str, method: FetchMethod, error: String, elapsed: Duration) -> Self {
        Self {
            source_id: source_id.to_string(),
            method,
            articles: Vec::new(),
            success: false,
            error: Some(error),
            elapsed,
            stats: BTreeMap::new(),
        }
    }

    /// Number of candidates collected
    pub fn article_count(&self) -> usize {
        self.articles.len()
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_source_due_logic() {
        let now = Utc::now();
        let mut source = Source::new("a", "A", "https://a.example");
        assert!(source.is_due(now));

        source.last_checked = Some(now - ChronoDuration::seconds(10));
        assert!(!source.is_due(now));

        source.last_checked = Some(now - ChronoDuration::seconds(3601));
        assert!(source.is_due(now));

        source.active = false;
        assert!(!source.is_due(now));
    }

    #[test]
    fn test_source_config_from_toml() {
        let raw = r#"
            identifier = "vendor-blog"
            name = "Vendor Blog"
            url = "https://blog.example.com"
            feed_url = "https://blog.example.com/feed"

            [config]
            min_content_length = 500
            rss_only = true
            post_url_regex = "/\\d{4}/\\d{2}/"
            allow = ["blog.example.com"]
            legacy_flag = "kept"

            [[config.discovery]]
            type = "listing"
            urls = "https://blog.example.com/archive"
            post_link_selector = "h2 a"

            [[config.discovery]]
            type = "sitemap"
            urls = ["https://blog.example.com/sitemap.xml"]
        "#;

        let source: Source = toml::from_str(raw).unwrap();
        assert!(source.active);
        assert!(source.has_feed());
        assert_eq!(source.config.min_content_length, 500);
        assert!(source.config.rss_only);
        assert_eq!(source.config.post_url_regex.len(), 1);
        assert_eq!(source.config.discovery.len(), 2);
        assert!(matches!(
            &source.config.discovery[0],
            DiscoveryStrategy::Listing { max_pages: 3, .. }
        ));
        assert!(source.config.extra.contains_key("legacy_flag"));
        assert!(source.config.extraction.prefer_jsonld);
    }

    #[test]
    fn test_default_min_content_length() {
        let config = SourceConfig::default();
        assert_eq!(config.min_content_length, 2000);
        assert!(!config.has_structured_config());
    }

    #[test]
    fn test_candidate_fingerprint_populated() {
        let candidate = CandidateArticle::new("s", "https://a.example/1", "Title", "Body text");
        assert_eq!(candidate.content_hash.len(), 64);
        assert!(candidate.simhash_bucket < 16);
        assert!(candidate.is_complete());
    }

    #[test]
    fn test_fetch_method_names() {
        assert_eq!(FetchMethod::AllFailed.as_str(), "all_failed");
        assert_eq!(
            serde_json::to_string(&FetchMethod::AllFailed).unwrap(),
            "\"all_failed\""
        );
        assert_eq!(FetchMethod::tiers()[0], FetchMethod::Rss);
    }
}
