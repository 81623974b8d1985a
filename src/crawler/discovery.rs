//! Article URL discovery
//!
//! Strategies, per source:
//! - `listing`: index pages with a post-link selector, following an optional
//!   "next page" selector up to `max_pages`
//! - `sitemap`: `<urlset>` documents; `<sitemapindex>` entries are expanded
//!   breadth-first up to [`MAX_SITEMAP_DEPTH`]
//! - fallback: every link on the source's base URL, kept only when it matches
//!   one of the source's `post_url_regex` patterns
//!
//! All results go through the source's [`UrlFilter`].

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::Rng;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use super::fetcher::HttpTransport;
use super::url::{extract_links, resolve, UrlFilter};
use crate::models::{DiscoveryStrategy, Source};
use crate::utils::error::{FetchError, ParseError, TierError};

/// Sitemap index nesting followed before giving up
pub const MAX_SITEMAP_DEPTH: usize = 3;

/// Something that turns a URL into page markup
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<String, FetchError>;
}

#[async_trait]
impl PageLoader for HttpTransport {
    async fn load(&self, url: &str) -> Result<String, FetchError> {
        self.get_text(url).await
    }
}

/// Randomized pause between page requests of one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageDelay {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for PageDelay {
    fn default() -> Self {
        Self {
            min_ms: 500,
            max_ms: 2000,
        }
    }
}

impl PageDelay {
    /// No pause at all
    pub fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    pub fn sample(&self) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        if hi == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    pub async fn wait(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Locations found in one sitemap document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SitemapDocument {
    /// `<url><loc>` entries
    pub pages: Vec<String>,
    /// `<sitemap><loc>` entries of a sitemap index
    pub sitemaps: Vec<String>,
}

/// Parse a sitemap or sitemap index
///
/// Only `<loc>` elements directly under `<url>` or `<sitemap>` count, so
/// image and video extension locations are ignored.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = SitemapDocument::default();
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        let loc = match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(e.local_name().as_ref().to_vec());
                None
            }
            Ok(Event::End(_)) => {
                path.pop();
                None
            }
            Ok(Event::Text(t)) => Some(
                t.unescape()
                    .map_err(|e| ParseError::Xml(e.to_string()))?
                    .trim()
                    .to_string(),
            ),
            Ok(Event::CData(c)) => Some(String::from_utf8_lossy(&c.into_inner()).trim().to_string()),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ParseError::Xml(format!(
                    "at position {}: {e}",
                    reader.buffer_position()
                )))
            }
            _ => None,
        };

        let Some(loc) = loc.filter(|l| !l.is_empty()) else {
            continue;
        };

        match path.as_slice() {
            [.., parent, last] if last.as_slice() == b"loc" => match parent.as_slice() {
                b"url" => doc.pages.push(loc),
                b"sitemap" => doc.sitemaps.push(loc),
                _ => {}
            },
            _ => {}
        }
    }

    Ok(doc)
}

fn compile_selector(raw: &str) -> Result<Selector, ParseError> {
    Selector::parse(raw).map_err(|e| ParseError::InvalidSelector(format!("{raw}: {e}")))
}

/// Post links and the next-page link of one listing page
fn parse_listing(
    html: &str,
    page_url: &str,
    links: &Selector,
    next: Option<&Selector>,
) -> (Vec<String>, Option<String>) {
    let document = Html::parse_document(html);
    let found = document
        .select(links)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve(page_url, href))
        .collect();
    let next_url = next.and_then(|selector| {
        document
            .select(selector)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| resolve(page_url, href))
    });
    (found, next_url)
}

/// URL discovery for one source
pub struct UrlDiscovery<'a> {
    pages: &'a dyn PageLoader,
    sitemaps: &'a dyn PageLoader,
    delay: PageDelay,
}

impl<'a> UrlDiscovery<'a> {
    /// `pages` loads HTML listing pages, `sitemaps` loads XML
    pub fn new(pages: &'a dyn PageLoader, sitemaps: &'a dyn PageLoader, delay: PageDelay) -> Self {
        Self {
            pages,
            sitemaps,
            delay,
        }
    }

    /// Discover candidate article URLs for `source`
    ///
    /// A failing strategy is logged and skipped. The last error is returned
    /// only when no strategy produced anything.
    pub async fn discover(&self, source: &Source) -> Result<Vec<String>, TierError> {
        let filter = UrlFilter::from_config(&source.config)?;

        if source.config.discovery.is_empty() {
            if !filter.has_patterns() {
                return Err(TierError::NotConfigured(format!(
                    "{}: no discovery strategy or post_url_regex",
                    source.identifier
                )));
            }
            let html = self.pages.load(&source.url).await?;
            let urls = filter.filter(extract_links(&html, &source.url));
            tracing::debug!(source = %source.identifier, count = urls.len(), "Discovered URLs from base page");
            return Ok(urls);
        }

        let mut found = Vec::new();
        let mut last_error = None;

        for strategy in &source.config.discovery {
            let result = match strategy {
                DiscoveryStrategy::Listing {
                    urls,
                    post_link_selector,
                    next_selector,
                    max_pages,
                } => {
                    self.listing(urls, post_link_selector, next_selector.as_deref(), *max_pages)
                        .await
                }
                DiscoveryStrategy::Sitemap { urls } => self.sitemap(urls).await,
            };

            match result {
                Ok(urls) => found.extend(urls),
                Err(e) => {
                    tracing::warn!(source = %source.identifier, error = %e, "Discovery strategy failed");
                    last_error = Some(e);
                }
            }
        }

        let urls = filter.filter(found);
        match last_error {
            Some(e) if urls.is_empty() => Err(e),
            _ => {
                tracing::debug!(source = %source.identifier, count = urls.len(), "Discovered URLs");
                Ok(urls)
            }
        }
    }

    async fn listing(
        &self,
        start_urls: &[String],
        post_link_selector: &str,
        next_selector: Option<&str>,
        max_pages: u32,
    ) -> Result<Vec<String>, TierError> {
        let links = compile_selector(post_link_selector)?;
        let next = next_selector.map(compile_selector).transpose()?;

        let mut found = Vec::new();
        let mut visited = HashSet::new();
        let mut loaded = 0u32;
        let mut last_error: Option<TierError> = None;

        for start in start_urls {
            let mut page_url = Some(start.clone());
            let mut pages = 0u32;

            while let Some(current) = page_url.take() {
                if pages >= max_pages || !visited.insert(current.clone()) {
                    break;
                }
                if loaded > 0 {
                    self.delay.wait().await;
                }

                pages += 1;
                loaded += 1;
                let html = match self.pages.load(&current).await {
                    Ok(html) => html,
                    Err(e) => {
                        tracing::warn!(page = %current, error = %e, "Listing page failed");
                        last_error = Some(e.into());
                        continue;
                    }
                };

                let (posts, next_url) = parse_listing(&html, &current, &links, next.as_ref());
                tracing::trace!(page = %current, posts = posts.len(), "Parsed listing page");
                found.extend(posts);
                page_url = next_url;
            }
        }

        match last_error {
            Some(e) if found.is_empty() => Err(e),
            _ => Ok(found),
        }
    }

    async fn sitemap(&self, roots: &[String]) -> Result<Vec<String>, TierError> {
        let mut queue: VecDeque<(String, usize)> = roots.iter().map(|u| (u.clone(), 0)).collect();
        let mut seen = HashSet::new();
        let mut pages = Vec::new();
        let mut last_error: Option<TierError> = None;

        while let Some((url, depth)) = queue.pop_front() {
            if !seen.insert(url.clone()) {
                continue;
            }

            let doc = match self.sitemaps.load(&url).await {
                Ok(xml) => parse_sitemap(&xml).map_err(TierError::from),
                Err(e) => Err(e.into()),
            };
            let doc = match doc {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(sitemap = %url, error = %e, "Sitemap failed");
                    last_error = Some(e);
                    continue;
                }
            };
            pages.extend(doc.pages);

            if depth + 1 > MAX_SITEMAP_DEPTH {
                if !doc.sitemaps.is_empty() {
                    tracing::debug!(sitemap = %url, "Sitemap index nesting too deep, not expanding");
                }
                continue;
            }
            queue.extend(doc.sitemaps.into_iter().map(|u| (u, depth + 1)));
        }

        match last_error {
            Some(e) if pages.is_empty() => Err(e),
            _ => Ok(pages),
        }
    }
}
