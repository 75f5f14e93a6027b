//! sitemap.xml discovery.
//!
//! Sitemaps announced in robots.txt are read first, then the usual locations
//! under the site root. Sitemap indexes and nested `.xml` entries are
//! followed up to a fixed number of documents. Every fetch goes through the
//! crawler's fetcher and rate limiter.

use crate::error::ExtractError;
use crate::fetch::PageFetcher;
use crate::rate_limit::DomainRateLimiter;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Paths tried under the site root, in order.
pub const DEFAULT_SITEMAP_PATHS: [&str; 3] = ["/sitemap_index.xml", "/sitemap.xml", "/sitemap"];

/// Sitemap documents read per site, nested ones included.
pub const MAX_SITEMAP_DOCUMENTS: usize = 25;

/// The `<loc>` entries of one sitemap document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SitemapDocument {
    /// Page URLs from `<url>` entries.
    pub pages: Vec<String>,
    /// Further sitemaps: `<sitemap>` entries of an index, plus `<url>`
    /// entries that point at another `.xml` file.
    pub sitemaps: Vec<String>,
}

/// Parses a `urlset` or `sitemapindex` document.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut document = SitemapDocument::default();
    let mut in_url = false;
    let mut in_sitemap = false;
    let mut in_loc = false;
    let mut loc = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"url" => {
                    in_url = true;
                    loc.clear();
                }
                b"sitemap" => {
                    in_sitemap = true;
                    loc.clear();
                }
                b"loc" => in_loc = in_url || in_sitemap,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => in_loc = false,
                b"url" if in_url => {
                    in_url = false;
                    let entry = loc.trim();
                    if entry.ends_with(".xml") {
                        document.sitemaps.push(entry.to_string());
                    } else if !entry.is_empty() {
                        document.pages.push(entry.to_string());
                    }
                }
                b"sitemap" if in_sitemap => {
                    in_sitemap = false;
                    if !loc.trim().is_empty() {
                        document.sitemaps.push(loc.trim().to_string());
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_loc => {
                let text = e
                    .unescape()
                    .map_err(|e| ExtractError::InvalidSitemap(e.to_string()))?;
                loc.push_str(&text);
            }
            Ok(Event::CData(e)) if in_loc => {
                loc.push_str(&String::from_utf8_lossy(&e));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::InvalidSitemap(e.to_string())),
            _ => {}
        }
    }

    Ok(document)
}

/// Sitemap URLs to try for `origin`: `announced` first, then the defaults.
pub fn sitemap_candidates(origin: &Url, announced: &[String]) -> Vec<Url> {
    let mut candidates = Vec::new();
    let announced = announced.iter().filter_map(|s| Url::parse(s).ok());
    let defaults = DEFAULT_SITEMAP_PATHS
        .iter()
        .filter_map(|path| origin.join(path).ok());
    for url in announced.chain(defaults) {
        if !candidates.contains(&url) {
            candidates.push(url);
        }
    }
    candidates
}

/// Reads a site's sitemaps through a [`PageFetcher`].
pub struct SitemapReader<'a> {
    fetcher: &'a dyn PageFetcher,
    limiter: &'a DomainRateLimiter,
    min_interval: Duration,
    max_documents: usize,
}

impl<'a> SitemapReader<'a> {
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        limiter: &'a DomainRateLimiter,
        min_interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            min_interval,
            max_documents: MAX_SITEMAP_DOCUMENTS,
        }
    }

    pub fn with_max_documents(mut self, max_documents: usize) -> Self {
        self.max_documents = max_documents;
        self
    }

    /// Page URLs listed by the sitemaps of `origin`, in document order and
    /// without repeats. Missing or malformed sitemaps are skipped.
    pub async fn page_urls(&self, origin: &Url, announced: &[String]) -> Vec<Url> {
        let mut queue: VecDeque<Url> = sitemap_candidates(origin, announced).into();
        let mut read: HashSet<Url> = HashSet::new();
        let mut pages: Vec<Url> = Vec::new();

        while let Some(sitemap_url) = queue.pop_front() {
            if read.len() >= self.max_documents {
                debug!("Sitemap limit reached, {} left unread", queue.len() + 1);
                break;
            }
            if !read.insert(sitemap_url.clone()) {
                continue;
            }

            let Some(document) = self.read(&sitemap_url).await else {
                continue;
            };

            for nested in document.sitemaps {
                if let Ok(nested) = sitemap_url.join(&nested)
                    && !read.contains(&nested)
                {
                    queue.push_back(nested);
                }
            }
            for page in document.pages {
                if let Ok(page) = sitemap_url.join(&page)
                    && !pages.contains(&page)
                {
                    pages.push(page);
                }
            }
        }

        info!("Found {} URLs in sitemaps of {}", pages.len(), origin);
        pages
    }

    async fn read(&self, sitemap_url: &Url) -> Option<SitemapDocument> {
        self.limiter
            .await_permit(sitemap_url.host_str().unwrap_or_default(), self.min_interval)
            .await;

        let response = match self.fetcher.fetch(sitemap_url).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!("{} answered {}", sitemap_url, response.status_code);
                return None;
            }
            Err(e) => {
                debug!("Could not fetch {}: {}", sitemap_url, e);
                return None;
            }
        };

        match parse_sitemap(&response.html) {
            Ok(document) => Some(document),
            Err(e) => {
                warn!("Ignoring {}: {}", sitemap_url, e);
                None
            }
        }
    }
}
