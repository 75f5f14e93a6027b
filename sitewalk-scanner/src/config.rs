use crate::error::{CrawlError, Result};
use crate::fetch::DEFAULT_USER_AGENT;
use crate::fingerprint::{DEFAULT_BOILERPLATE_PATTERNS, Fingerprinter};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Every knob of a crawl session. Deserializes with defaults for missing
/// fields, so partial JSON configs work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Upper bound on URLs visited (fetched or attempted).
    pub max_pages: usize,
    /// URLs dispatched per batch.
    pub max_concurrent: usize,
    /// Seconds slept between batches.
    pub crawl_delay: f64,
    /// Minimum seconds between two fetches of the same domain.
    pub min_domain_interval: f64,
    /// Links deeper than this are not followed. `None` means no cap.
    pub max_depth: Option<usize>,
    pub stay_on_domain: bool,
    pub respect_robots_txt: bool,
    pub strip_tracking_params: bool,
    pub boilerplate_patterns: Vec<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Seed the frontier from the site's sitemaps before crawling.
    pub use_sitemaps: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 100,
            max_concurrent: 5,
            crawl_delay: 1.0,
            min_domain_interval: 1.0,
            max_depth: None,
            stay_on_domain: true,
            respect_robots_txt: true,
            strip_tracking_params: false,
            boilerplate_patterns: DEFAULT_BOILERPLATE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            use_sitemaps: false,
        }
    }
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(CrawlError::Configuration(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, value
        )));
    }
    Ok(Duration::from_secs_f64(value))
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(CrawlError::Configuration(
                "max_pages must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(CrawlError::Configuration(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CrawlError::Configuration(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(CrawlError::Configuration(
                "user_agent must not be empty".to_string(),
            ));
        }
        self.crawl_delay_duration()?;
        self.min_domain_interval_duration()?;
        self.fingerprinter()?;
        Ok(())
    }

    pub fn crawl_delay_duration(&self) -> Result<Duration> {
        seconds("crawl_delay", self.crawl_delay)
    }

    pub fn min_domain_interval_duration(&self) -> Result<Duration> {
        seconds("min_domain_interval", self.min_domain_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fingerprinter(&self) -> Result<Fingerprinter> {
        Fingerprinter::new(&self.boilerplate_patterns)
    }
}
