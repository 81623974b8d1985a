//! Token-bucket admission control for outbound requests
//!
//! Backed by `governor`'s GCRA limiter, which is equivalent to a token bucket
//! holding `capacity` tokens refilled at `refill_per_second`. By default one
//! bucket is shared by every request of the process; `per_host` scope keeps an
//! independent bucket for each destination host.

use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;

/// How buckets are keyed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// One bucket for all requests
    #[default]
    Shared,
    /// One bucket per destination host
    PerHost,
}

/// Token-bucket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size
    pub capacity: u32,

    /// Tokens added per second
    pub refill_per_second: f64,

    pub scope: RateLimitScope,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 2.0,
            scope: RateLimitScope::Shared,
        }
    }
}

/// Invalid limiter settings
#[derive(Error, Debug, PartialEq)]
pub enum RateLimitError {
    #[error("capacity must be at least 1")]
    ZeroCapacity,

    #[error("refill rate must be positive and finite, got {0}")]
    InvalidRefillRate(f64),
}

impl RateLimitConfig {
    /// Time for one token to be refilled
    pub fn refill_period(&self) -> Result<Duration, RateLimitError> {
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            return Err(RateLimitError::InvalidRefillRate(self.refill_per_second));
        }
        Ok(Duration::from_secs_f64(1.0 / self.refill_per_second))
    }

    fn quota(&self) -> Result<Quota, RateLimitError> {
        let capacity = NonZeroU32::new(self.capacity).ok_or(RateLimitError::ZeroCapacity)?;
        let period = self.refill_period()?;
        let quota = Quota::with_period(period)
            .ok_or(RateLimitError::InvalidRefillRate(self.refill_per_second))?;
        Ok(quota.allow_burst(capacity))
    }
}

enum Buckets {
    Shared(DefaultDirectRateLimiter),
    PerHost(DefaultKeyedRateLimiter<String>),
}

/// Request limiter shared by every tier
pub struct RequestLimiter {
    buckets: Buckets,
    config: RateLimitConfig,
}

impl RequestLimiter {
    /// Build a limiter from settings
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        let quota = config.quota()?;
        let buckets = match config.scope {
            RateLimitScope::Shared => Buckets::Shared(RateLimiter::direct(quota)),
            RateLimitScope::PerHost => Buckets::PerHost(RateLimiter::keyed(quota)),
        };
        Ok(Self { buckets, config })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take one token for `host` if available
    pub fn try_acquire(&self, host: &str) -> bool {
        match &self.buckets {
            Buckets::Shared(limiter) => limiter.check().is_ok(),
            Buckets::PerHost(limiter) => limiter.check_key(&host.to_lowercase()).is_ok(),
        }
    }

    /// Wait until a token for `host` is available and take it
    pub async fn acquire(&self, host: &str) {
        match &self.buckets {
            Buckets::Shared(limiter) => limiter.until_ready().await,
            Buckets::PerHost(limiter) => {
                let key = host.to_lowercase();
                limiter.until_key_ready(&key).await;
                // Drop buckets that have fully refilled.
                limiter.retain_recent();
            }
        }
    }
}
