//! Configuration management for feedhound
//!
//! Settings come from a TOML file, then `FEEDHOUND_*` environment variables
//! override individual values. Every section has defaults, so an empty file
//! is a valid configuration.
//!
//! ```toml
//! [transport]
//! timeout_secs = 20
//!
//! [rate_limit]
//! capacity = 5
//! refill_per_second = 1.0
//! scope = "per_host"
//!
//! [host_policies]
//! "teaser-feed.example" = "scrape_first"
//! ```
//!
//! Sources live in a separate file of `[[sources]]` tables, see
//! [`SourcesFile`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::crawler::fetcher::{validate_url, RequestConfig};
use crate::crawler::host_policy::HostPolicyTable;
use crate::crawler::orchestrator::{FetcherConfig, TierOptions};
use crate::crawler::rate_limit::RateLimitConfig;
use crate::crawler::rendered::RenderConfig;
use crate::crawler::trigger::SchedulerConfig;
use crate::crawler::url::UrlFilter;
use crate::dedup::DedupConfig;
use crate::models::Source;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: RequestConfig,

    pub rate_limit: RateLimitConfig,

    pub fetcher: FetcherConfig,

    pub scheduler: SchedulerConfig,

    pub dedup: DedupConfig,

    pub render: RenderConfig,

    pub storage: StorageConfig,

    pub logging: LoggingConfig,

    /// Per-host feed-tier overrides
    pub host_policies: HostPolicyTable,

    /// Replaces the built-in title deny-list when set
    pub title_filter_keywords: Option<Vec<String>>,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/feedhound.db"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise, then apply the
    /// environment and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Apply `FEEDHOUND_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            value
                .map(|v| {
                    v.trim()
                        .parse::<T>()
                        .map_err(|e| anyhow::anyhow!("{key}={v}: {e}"))
                })
                .transpose()
        }

        if let Some(v) = parsed("FEEDHOUND_MAX_CONCURRENT", lookup("FEEDHOUND_MAX_CONCURRENT"))? {
            self.fetcher.max_concurrent = v;
        }
        if let Some(v) = parsed("FEEDHOUND_SOURCE_TIMEOUT", lookup("FEEDHOUND_SOURCE_TIMEOUT"))? {
            self.fetcher.source_timeout_secs = v;
        }
        if let Some(v) = parsed("FEEDHOUND_REQUEST_TIMEOUT", lookup("FEEDHOUND_REQUEST_TIMEOUT"))? {
            self.transport.timeout_secs = v;
        }
        if let Some(v) = parsed("FEEDHOUND_MAX_RETRIES", lookup("FEEDHOUND_MAX_RETRIES"))? {
            self.transport.max_retries = v;
        }
        if let Some(v) = lookup("FEEDHOUND_USER_AGENT") {
            self.transport.user_agent = Some(v);
        }
        if let Some(v) = parsed("FEEDHOUND_RATE_CAPACITY", lookup("FEEDHOUND_RATE_CAPACITY"))? {
            self.rate_limit.capacity = v;
        }
        if let Some(v) = parsed("FEEDHOUND_RATE_LIMIT", lookup("FEEDHOUND_RATE_LIMIT"))? {
            self.rate_limit.refill_per_second = v;
        }
        if let Some(v) = parsed("FEEDHOUND_INTERVAL_SECS", lookup("FEEDHOUND_INTERVAL_SECS"))? {
            self.scheduler.interval_secs = v;
        }
        if let Some(v) = parsed(
            "FEEDHOUND_FAILURE_THRESHOLD",
            lookup("FEEDHOUND_FAILURE_THRESHOLD"),
        )? {
            self.scheduler.failure_threshold = v;
        }
        if let Some(v) = lookup("FEEDHOUND_SQLITE_PATH") {
            self.storage.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FEEDHOUND_RENDER_ENDPOINT") {
            self.render.endpoint = Some(v);
        }
        if let Some(v) = lookup("FEEDHOUND_RENDER_TOKEN") {
            self.render.token = Some(v);
        }
        if let Some(v) = lookup("FEEDHOUND_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("FEEDHOUND_LOG_FORMAT") {
            self.logging.format = v;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.fetcher.max_concurrent == 0 {
            anyhow::bail!("fetcher.max_concurrent must be greater than 0");
        }

        if self.fetcher.page_delay.min_ms > self.fetcher.page_delay.max_ms {
            anyhow::bail!("fetcher.page_delay.min_ms must not exceed max_ms");
        }

        if self.transport.timeout_secs == 0 {
            anyhow::bail!("transport.timeout_secs must be greater than 0");
        }

        if self.rate_limit.capacity == 0 {
            anyhow::bail!("rate_limit.capacity must be greater than 0");
        }
        self.rate_limit
            .refill_period()
            .context("rate_limit.refill_per_second")?;

        if self.scheduler.interval_secs == 0 {
            anyhow::bail!("scheduler.interval_secs must be greater than 0");
        }

        if self.scheduler.failure_threshold == 0 {
            anyhow::bail!("scheduler.failure_threshold must be greater than 0");
        }

        if self.dedup.threshold > 64 {
            anyhow::bail!("dedup.threshold must be at most 64");
        }

        if let Some(endpoint) = &self.render.endpoint {
            validate_url(endpoint).context("render.endpoint")?;
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!("logging.format must be text or json, got {other}"),
        }

        Ok(())
    }

    /// Feed-tier and render-tier options for the standard fetcher
    pub fn tier_options(&self) -> TierOptions {
        TierOptions {
            host_policies: self.host_policies.clone(),
            title_filters: self.title_filter_keywords.clone(),
            render: self.render.clone(),
        }
    }
}

/// A file of `[[sources]]` tables
///
/// ```toml
/// [[sources]]
/// identifier = "vendor-blog"
/// name = "Vendor Blog"
/// url = "https://blog.vendor.example/"
/// feed_url = "https://blog.vendor.example/feed.xml"
///
/// [sources.config]
/// min_content_length = 1500
/// post_url_regex = "/blog/\\d{4}/"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl SourcesFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sources file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid sources file: {}", path.display()))
    }

    /// Parse and validate sources from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content).context("Failed to parse sources TOML")?;
        file.validate()?;
        Ok(file)
    }

    /// Unique identifiers, valid URLs and compilable URL patterns
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            let id = source.identifier.trim();
            if id.is_empty() {
                anyhow::bail!("source with url {} has an empty identifier", source.url);
            }
            if !seen.insert(id) {
                anyhow::bail!("duplicate source identifier: {id}");
            }
            validate_url(&source.url).with_context(|| format!("source {id}: url"))?;
            if let Some(feed) = source.feed_url.as_deref().filter(|f| !f.trim().is_empty()) {
                validate_url(feed).with_context(|| format!("source {id}: feed_url"))?;
            }
            UrlFilter::from_config(&source.config)
                .with_context(|| format!("source {id}: post_url_regex"))?;
        }
        Ok(())
    }

    pub fn find(&self, identifier: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.identifier == identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::host_policy::HostPolicy;
    use crate::crawler::rate_limit::RateLimitScope;
    use crate::models::DiscoveryStrategy;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.failure_threshold, 10);
        assert_eq!(config.fetcher.max_concurrent, 5);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = AppConfig::default();
        config.fetcher.max_concurrent = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rate_limit.refill_per_second = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[rate_limit]
capacity = 4
refill_per_second = 0.5
scope = "per_host"

[dedup]
threshold = 5

[host_policies]
"teaser.example" = "scrape_first"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rate_limit.capacity, 4);
        assert_eq!(config.rate_limit.scope, RateLimitScope::PerHost);
        assert_eq!(config.dedup.threshold, 5);
        assert_eq!(
            config.host_policies.policy_for("www.teaser.example"),
            HostPolicy::ScrapeFirst
        );
        assert_eq!(config.transport.timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FEEDHOUND_MAX_CONCURRENT", "12"),
            ("FEEDHOUND_RATE_LIMIT", "0.25"),
            ("FEEDHOUND_LOG_FORMAT", "json"),
            ("FEEDHOUND_RENDER_ENDPOINT", "http://render.internal:3000"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.fetcher.max_concurrent, 12);
        assert!((config.rate_limit.refill_per_second - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.logging.format, "json");
        assert_eq!(
            config.render.endpoint.as_deref(),
            Some("http://render.internal:3000")
        );
    }

    #[test]
    fn test_bad_env_override_is_an_error() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "FEEDHOUND_MAX_CONCURRENT").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_sources_file() {
        let file = SourcesFile::parse(
            r#"
[[sources]]
identifier = "vendor"
name = "Vendor Blog"
url = "https://blog.vendor.example/"
feed_url = "https://blog.vendor.example/feed.xml"

[sources.config]
rss_only = true
min_content_length = 500
post_url_regex = "/posts/"
owner = "research"

[[sources.config.discovery]]
type = "sitemap"
urls = "https://blog.vendor.example/sitemap.xml"
"#,
        )
        .unwrap();

        let source = file.find("vendor").unwrap();
        assert!(source.active);
        assert!(source.config.rss_only);
        assert_eq!(source.config.min_content_length, 500);
        assert_eq!(source.config.post_url_regex, vec!["/posts/".to_string()]);
        assert_eq!(source.config.extra["owner"], "research");
        assert_eq!(
            source.config.discovery,
            vec![DiscoveryStrategy::Sitemap {
                urls: vec!["https://blog.vendor.example/sitemap.xml".into()]
            }]
        );
    }

    #[test]
    fn test_sources_file_rejects_duplicates_and_bad_patterns() {
        let duplicate = r#"
[[sources]]
identifier = "a"
name = "A"
url = "https://a.example/"

[[sources]]
identifier = "a"
name = "A again"
url = "https://a.example/other"
"#;
        assert!(SourcesFile::parse(duplicate).is_err());

        let bad_pattern = r#"
[[sources]]
identifier = "a"
name = "A"
url = "https://a.example/"

[sources.config]
post_url_regex = "(unclosed"
"#;
        assert!(SourcesFile::parse(bad_pattern).is_err());
    }
}
