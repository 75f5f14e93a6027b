//! Broken-link detection over crawled pages.

use crate::fetch::DEFAULT_USER_AGENT;
use crate::normalize::{same_domain, UrlNormalizer};
use crate::result::PageRecord;
use dashmap::DashMap;
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    /// 0 when the request never got a response.
    pub status_code: u16,
    pub error: Option<String>,
}

impl LinkStatus {
    pub fn ok(status_code: u16) -> Self {
        Self {
            status_code,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_broken(&self) -> bool {
        self.status_code == 0 || self.status_code >= 400
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub source_page: String,
    pub broken_link: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cache of link-check outcomes keyed by normalized URL.
pub trait LinkStatusCache: Send + Sync {
    fn get(&self, key: &str) -> Option<LinkStatus>;

    fn set(&self, key: &str, value: &LinkStatus, ttl: Duration);
}

/// Process-local [`LinkStatusCache`].
#[derive(Debug, Default)]
pub struct MemoryLinkCache {
    entries: DashMap<String, (LinkStatus, Instant)>,
}

impl MemoryLinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LinkStatusCache for MemoryLinkCache {
    fn get(&self, key: &str) -> Option<LinkStatus> {
        let entry = self.entries.get(key)?;
        let (status, expires) = entry.value();
        if Instant::now() < *expires {
            Some(status.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    fn set(&self, key: &str, value: &LinkStatus, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (value.clone(), Instant::now() + ttl));
    }
}

#[derive(Debug, Clone)]
pub struct LinkCheckerConfig {
    pub concurrency: usize,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Also check links pointing away from the page's own site.
    pub check_external: bool,
    pub cache_ttl: Duration,
    pub user_agent: String,
}

impl Default for LinkCheckerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            check_external: false,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

pub struct LinkChecker {
    client: Client,
    config: LinkCheckerConfig,
    normalizer: UrlNormalizer,
    cache: Option<Arc<dyn LinkStatusCache>>,
}

impl LinkChecker {
    pub fn new(config: LinkCheckerConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            config,
            normalizer: UrlNormalizer::default(),
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: Arc<dyn LinkStatusCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_normalizer(mut self, normalizer: UrlNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    fn cache_key(&self, url: &str) -> String {
        self.normalizer
            .normalize(url)
            .map(|n| n.key().to_string())
            .unwrap_or_else(|_| url.to_string())
    }

    async fn request(&self, method: reqwest::Method, url: &str) -> reqwest::Result<StatusCode> {
        self.client
            .request(method, url)
            .send()
            .await
            .map(|r| r.status())
    }

    /// HEAD first; GET when HEAD fails in transport or the server refuses HEAD.
    async fn probe(&self, url: &str) -> LinkStatus {
        let head = self.request(reqwest::Method::HEAD, url).await;
        let retry_with_get = match &head {
            Ok(status) => matches!(
                *status,
                StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
            ),
            Err(_) => true,
        };

        let result = if retry_with_get {
            debug!("HEAD {} unusable, retrying with GET", url);
            self.request(reqwest::Method::GET, url).await
        } else {
            head
        };

        match result {
            Ok(status) => LinkStatus::ok(status.as_u16()),
            Err(e) if e.is_timeout() => LinkStatus::failed("Timeout"),
            Err(e) => LinkStatus::failed(e.to_string()),
        }
    }

    pub async fn check_link(&self, url: &str) -> LinkStatus {
        let key = self.cache_key(url);
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            debug!("Using cached status for {}", url);
            return cached;
        }

        let status = self.probe(url).await;
        if let Some(cache) = &self.cache {
            cache.set(&key, &status, self.config.cache_ttl);
        }
        status
    }

    /// Checks every unique outbound link of `pages` once and returns the
    /// broken ones, each attributed to the first page that linked to it.
    pub async fn check_pages(&self, pages: &[PageRecord]) -> Vec<BrokenLink> {
        let mut targets: HashMap<String, (String, String)> = HashMap::new();
        let mut order = Vec::new();

        for page in pages {
            let page_host = Url::parse(&page.url)
                .ok()
                .and_then(|u| u.host_str().map(String::from))
                .unwrap_or_default();

            for link in &page.links {
                let Ok(parsed) = Url::parse(link) else {
                    continue;
                };
                if !self.config.check_external
                    && !same_domain(parsed.host_str().unwrap_or_default(), &page_host)
                {
                    continue;
                }
                let key = self.cache_key(link);
                if !targets.contains_key(&key) {
                    order.push(key.clone());
                    targets.insert(key, (link.clone(), page.url.clone()));
                }
            }
        }

        info!("Checking {} unique links", order.len());

        let semaphore = Semaphore::new(self.config.concurrency.max(1));
        let checks = order.iter().filter_map(|key| targets.get(key)).map(|(link, source)| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok();
                let status = self.check_link(link).await;
                status.is_broken().then(|| BrokenLink {
                    source_page: source.clone(),
                    broken_link: link.clone(),
                    status_code: status.status_code,
                    error: status.error,
                })
            }
        });

        let broken: Vec<BrokenLink> = join_all(checks).await.into_iter().flatten().collect();
        info!("Found {} broken links", broken.len());
        broken
    }
}
