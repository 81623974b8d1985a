//! Source fetching
//!
//! Everything between a [`Source`](crate::models::Source) record and a list
//! of candidate articles: the rate-limited HTTP transport, URL discovery, the
//! four fetch tiers, the orchestrator that chains them and the scheduler that
//! runs the orchestrator periodically.
//!
//! Tier order for a source is feed, rendered, structured, legacy. The first
//! tier that yields articles wins.

pub mod decode;
pub mod discovery;
pub mod feed;
pub mod fetcher;
pub mod headers;
pub mod host_policy;
pub mod legacy;
pub mod orchestrator;
pub mod rate_limit;
pub mod rendered;
pub mod structured;
pub mod tier;
pub mod trigger;
pub mod url;

pub use discovery::{PageDelay, PageLoader, UrlDiscovery};
pub use feed::FeedReader;
pub use fetcher::{HttpResponse, HttpTransport, RequestConfig, RequestOptions};
pub use host_policy::{HostPolicy, HostPolicyTable};
pub use legacy::LegacyScraper;
pub use orchestrator::{Fetcher, FetcherConfig, TierOptions};
pub use rate_limit::{RateLimitConfig, RateLimitScope, RequestLimiter};
pub use rendered::{BrowserlessEngine, RenderConfig, RenderEngine, RenderedScraper, WaitPolicy};
pub use structured::{ExtractOutcome, StructuredScraper};
pub use tier::{FetchTier, TierOutput};
pub use trigger::{AdmitHandler, CycleSummary, FetchScheduler, ResultHandler, SchedulerConfig};
