//! URL resolution, canonicalization and allow-list filtering
//!
//! Article URLs arrive from feeds, listing pages and sitemaps in many shapes
//! (relative links, tracking parameters, fragments). Everything is reduced to
//! an absolute http(s) canonical form before it is used as a dedup key.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use crate::models::SourceConfig;
use crate::utils::error::ParseError;

const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "mc_cid", "mc_eid", "ref", "ref_src", "_hsenc", "_hsmi",
];

static URL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/((?:19|20)\d{2})/(0?[1-9]|1[0-2])/(0?[1-9]|[12]\d|3[01])(?:/|$)")
        .expect("valid URL date regex")
});

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid link selector"));

/// Whether `url` parses as an absolute http(s) URL
pub fn is_absolute_http(url: &str) -> bool {
    Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Resolve `href` against `base`, keeping only http(s) results
pub fn resolve(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }

    let resolved = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => Url::parse(base).ok()?.join(href).ok()?,
    };

    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Canonical form of an article URL
///
/// Drops the fragment and tracking parameters and lowercases the host.
///
/// ```
/// use feedhound::crawler::url::canonicalize;
///
/// assert_eq!(
///     canonicalize("https://Blog.Example.com/p/1?utm_source=rss&id=7#top").as_deref(),
///     Some("https://blog.example.com/p/1?id=7")
/// );
/// ```
pub fn canonicalize(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| {
            let key = key.to_ascii_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }

    Some(parsed.to_string())
}

/// Host of `url`, lowercased
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_lowercase())
}

/// Publication date embedded as `/YYYY/MM/DD/` in the URL path
pub fn date_from_url(url: &str) -> Option<DateTime<Utc>> {
    let caps = URL_DATE_RE.captures(url)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Absolute links of an HTML document, in document order, deduplicated
pub fn extract_links(html: &str, base: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(&LINK_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve(base, href))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Domain and pattern allow-lists for discovered article URLs
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    allowed_domains: Vec<String>,
    patterns: Vec<Regex>,
}

impl UrlFilter {
    /// Build a filter from a source's `allow` and `post_url_regex`
    pub fn from_config(config: &SourceConfig) -> Result<Self, ParseError> {
        let patterns = config
            .post_url_regex
            .iter()
            .map(|p| Regex::new(p).map_err(|e| ParseError::InvalidPattern(format!("{p}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let allowed_domains = config
            .allow
            .iter()
            .map(|d| d.trim().trim_start_matches("www.").to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Ok(Self {
            allowed_domains,
            patterns,
        })
    }

    pub fn has_patterns(&self) -> bool {
        !self.patterns.is_empty()
    }

    /// Whether the host of `url` is allowed
    pub fn domain_allowed(&self, url: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        let Some(host) = host_of(url) else {
            return false;
        };
        self.allowed_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }

    /// Whether `url` matches a configured article pattern
    pub fn pattern_allowed(&self, url: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|re| re.is_match(url))
    }

    pub fn allows(&self, url: &str) -> bool {
        self.domain_allowed(url) && self.pattern_allowed(url)
    }

    /// Keep allowed URLs, canonicalized and deduplicated in order
    pub fn filter(&self, urls: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut seen = HashSet::new();
        urls.into_iter()
            .filter_map(|u| canonicalize(&u))
            .filter(|u| self.allows(u))
            .filter(|u| seen.insert(u.clone()))
            .collect()
    }
}
