pub mod config;
pub mod crawler;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod fingerprint;
pub mod link_check;
pub mod links;
pub mod normalize;
pub mod rate_limit;
pub mod result;
pub mod robots;
pub mod sitemap;

pub use config::CrawlConfig;
pub use crawler::{Crawler, ProgressCallback};
pub use dedup::{DuplicateGroup, UrlDeduplicator};
pub use error::{CrawlError, ExtractError, FetchError, Result};
pub use extract::{ContentKind, ExtractionStrategy, ExtractorChain, PageMetadata};
pub use fetch::{FetchResponse, HttpFetcher, HttpFetcherConfig, PageFetcher};
pub use fingerprint::{ContentFingerprint, Fingerprinter};
pub use link_check::{BrokenLink, LinkChecker, LinkCheckerConfig, LinkStatus, LinkStatusCache, MemoryLinkCache};
pub use links::extract_links;
pub use normalize::{normalize, NormalizedUrl, UrlNormalizer};
pub use rate_limit::DomainRateLimiter;
pub use result::{CrawlResult, CrawlStatus, PageAnalysis, PageRecord};
pub use sitemap::{SitemapDocument, SitemapReader, parse_sitemap};
pub use tokio_util::sync::CancellationToken;
