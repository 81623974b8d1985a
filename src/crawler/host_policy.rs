//! Per-host overrides for the feed tier
//!
//! Some hosts block scrapers outright, others publish feeds whose entries are
//! always teasers. Instead of special-casing them in code, hosts map to a
//! [`HostPolicy`] in configuration:
//!
//! ```toml
//! [host_policies]
//! "uncooperative.example" = "skip"
//! "teaser-feed.example" = "scrape_first"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the feed tier does for entries on a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPolicy {
    /// Feed content first, scrape only when too short
    #[default]
    Default,
    /// Drop entries pointing at this host
    Skip,
    /// Scrape the entry page before looking at feed content
    ScrapeFirst,
}

/// Host → policy lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostPolicyTable {
    policies: HashMap<String, HostPolicy>,
}

impl HostPolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: &str, policy: HostPolicy) {
        self.policies.insert(normalize_host(host), policy);
    }

    pub fn with(mut self, host: &str, policy: HostPolicy) -> Self {
        self.insert(host, policy);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policy for `host`, matching parent domains too
    pub fn policy_for(&self, host: &str) -> HostPolicy {
        let host = normalize_host(host);
        let mut candidate = host.as_str();
        loop {
            if let Some(policy) = self.policies.get(candidate) {
                return *policy;
            }
            match candidate.split_once('.') {
                Some((_, parent)) if parent.contains('.') => candidate = parent,
                _ => return HostPolicy::Default,
            }
        }
    }

    /// Policy for the host of `url`
    pub fn policy_for_url(&self, url: &str) -> HostPolicy {
        super::url::host_of(url)
            .map(|host| self.policy_for(&host))
            .unwrap_or_default()
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_start_matches("www.").to_lowercase()
}
