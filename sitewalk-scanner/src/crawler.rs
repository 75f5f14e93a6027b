use crate::config::CrawlConfig;
use crate::dedup::UrlDeduplicator;
use crate::error::{CrawlError, FetchError, Result};
use crate::extract::{ContentKind, ExtractorChain, PageMetadata};
use crate::fetch::{FetchResponse, HttpFetcher, HttpFetcherConfig, PageFetcher};
use crate::links::LinkExtractor;
use crate::normalize::{NormalizedUrl, UrlNormalizer};
use crate::rate_limit::{parse_retry_after, DomainRateLimiter};
use crate::result::{CrawlResult, CrawlStatus, PageAnalysis, PageRecord};
use crate::robots::{robots_target, RobotsPolicy};
use crate::sitemap::SitemapReader;
use chrono::Utc;
use scraper::Html;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

/// robots.txt may ask for slower crawling; we honour it up to this bound.
const MAX_ROBOTS_CRAWL_DELAY: Duration = Duration::from_secs(30);

/// Prepends `https://` to seeds given without a scheme.
fn with_scheme(seed: &str) -> String {
    let seed = seed.trim();
    if seed.contains("://") {
        seed.to_string()
    } else {
        format!("https://{}", seed)
    }
}

/// What a single URL's unit of work produced.
enum UrlOutcome {
    Page {
        record: Box<PageRecord>,
        new_links: Vec<(NormalizedUrl, usize)>,
    },
    Failed,
    Disallowed,
}

/// Everything a worker needs, shared by all workers of one session.
struct Session {
    config: CrawlConfig,
    min_interval: Duration,
    fetcher: Arc<dyn PageFetcher>,
    rate_limiter: Arc<DomainRateLimiter>,
    robots: Option<RobotsPolicy>,
    dedup: UrlDeduplicator,
    extractor: Arc<ExtractorChain>,
    links: LinkExtractor,
}

impl Session {
    async fn process(self: Arc<Self>, url: NormalizedUrl, depth: usize) -> UrlOutcome {
        let mut interval = self.min_interval;

        if let Some(robots) = &self.robots {
            let rules = robots
                .rules_for(url.url(), self.fetcher.as_ref(), &self.rate_limiter, interval)
                .await;
            if !rules.is_allowed(&robots_target(url.url())) {
                info!("Skipping {}: disallowed by robots.txt", url);
                return UrlOutcome::Disallowed;
            }
            if let Some(delay) = rules.crawl_delay() {
                interval = interval.max(delay.min(MAX_ROBOTS_CRAWL_DELAY));
            }
        }

        self.rate_limiter.await_permit(url.host(), interval).await;

        let response = match self.fetcher.fetch(url.url()).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Fetch failed for {}: {}", url, e);
                return UrlOutcome::Failed;
            }
        };

        if response.status_code == 429 {
            let retry_after = response.header("retry-after").and_then(parse_retry_after);
            self.rate_limiter
                .record_throttled(url.host(), retry_after)
                .await;
        }

        if let Err(e) = Self::check_response(url.as_str(), &response) {
            warn!("Fetch failed for {}: {}", url, e);
            return UrlOutcome::Failed;
        }

        let (record, new_links) = self.build_page(&url, depth, response);
        UrlOutcome::Page {
            record: Box::new(record),
            new_links,
        }
    }

    fn check_response(url: &str, response: &FetchResponse) -> std::result::Result<(), FetchError> {
        if !response.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status_code,
            });
        }
        if !response.is_html() {
            return Err(FetchError::NotHtml(
                response.content_type().unwrap_or_default().to_string(),
            ));
        }
        Ok(())
    }

    /// Parses, extracts, fingerprints and admits outbound links. Kept
    /// synchronous since the parsed document is not `Send`.
    fn build_page(
        &self,
        url: &NormalizedUrl,
        depth: usize,
        response: FetchResponse,
    ) -> (PageRecord, Vec<(NormalizedUrl, usize)>) {
        let final_url = response.final_url.clone();
        if final_url.as_str() != url.as_str()
            && let Ok(redirected) = self.dedup.normalizer().normalize_parsed(final_url.clone())
            && redirected != *url
        {
            // A redirect target counts as visited under both names.
            debug!("{} redirected to {}", url, redirected);
            self.dedup.admit_normalized(redirected);
        }

        let document = Html::parse_document(&response.html);

        let text = match self.extractor.extract(&document) {
            Ok(content) => content.text,
            Err(e) => {
                warn!("Extraction failed for {}: {}", url, e);
                String::new()
            }
        };

        let outbound = self.links.extract(&final_url, &document);

        let mut record = PageRecord::new(url.as_str().to_string(), final_url.to_string(), response.status_code)
            .with_metadata(PageMetadata::from_document(&document))
            .with_text(text);
        record.content_kind = ContentKind::classify(url.url(), &document);
        record.depth = depth;
        record.links = outbound.iter().map(|l| l.as_str().to_string()).collect();
        record.fetched_at = Utc::now();

        if !record.text.is_empty() {
            let check = self.dedup.record_page(url, &record.text);
            record.fingerprint = Some(check.fingerprint);
            record.duplicate_of = check.duplicate_of;
        }
        record.html = response.html;

        let next_depth = depth + 1;
        let mut new_links = Vec::new();
        if self.config.max_depth.is_none_or(|max| next_depth <= max) {
            for link in outbound {
                if let Some(admitted) = self.dedup.admit_normalized(link) {
                    new_links.push((admitted, next_depth));
                }
            }
        }

        debug!(
            "Processed {} ({} links, {} new)",
            url,
            record.links.len(),
            new_links.len()
        );
        (record, new_links)
    }
}

/// Polite, bounded-concurrency breadth-first crawler.
///
/// URLs are fetched in batches of at most `max_concurrent`. Links found in a
/// batch join the frontier once the whole batch is done, so they are first
/// fetched by the next batch.
pub struct Crawler {
    config: CrawlConfig,
    fetcher: Option<Arc<dyn PageFetcher>>,
    rate_limiter: Arc<DomainRateLimiter>,
    extractor: Arc<ExtractorChain>,
    progress_callback: Option<ProgressCallback>,
    /// Stops every run; owned by whoever built the crawler.
    cancel: CancellationToken,
    /// Stops the current run, or the next one while idle. Replaced once a
    /// run ends cancelled.
    run_cancel: Mutex<CancellationToken>,
    status: Mutex<CrawlStatus>,
}

impl Crawler {
    pub fn new(config: CrawlConfig) -> Self {
        let interval = config
            .min_domain_interval_duration()
            .unwrap_or(crate::rate_limit::DEFAULT_MIN_INTERVAL);
        let cancel = CancellationToken::new();
        Self {
            config,
            fetcher: None,
            rate_limiter: Arc::new(DomainRateLimiter::new(interval)),
            extractor: Arc::new(ExtractorChain::default()),
            progress_callback: None,
            run_cancel: Mutex::new(cancel.child_token()),
            cancel,
            status: Mutex::new(CrawlStatus::Idle),
        }
    }

    /// Installs a reqwest-backed fetcher built from the crawl config.
    pub fn with_http_fetcher(self) -> Result<Self> {
        let fetcher = HttpFetcher::new(HttpFetcherConfig {
            user_agent: self.config.user_agent.clone(),
            timeout: self.config.request_timeout(),
            ..Default::default()
        })
        .map_err(|e| CrawlError::Configuration(format!("could not build HTTP client: {}", e)))?;
        Ok(self.with_fetcher(Arc::new(fetcher)))
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Shares a rate limiter with other crawlers so politeness carries across
    /// sessions.
    pub fn with_rate_limiter(mut self, limiter: Arc<DomainRateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_extractor(mut self, extractor: ExtractorChain) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Installs a parent token. Cancelling it stops the running crawl and
    /// every later one.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.run_cancel = Mutex::new(token.child_token());
        self.cancel = token;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> Arc<DomainRateLimiter> {
        self.rate_limiter.clone()
    }

    /// Token for the running crawl, or for the next one while idle.
    /// Cancelling it aborts that run only.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.run_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> CrawlStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: CrawlStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub async fn crawl(&self, seed_url: &str) -> Result<CrawlResult> {
        self.run(&[seed_url.to_string()], &self.config, None).await
    }

    /// Like [`crawl`](Self::crawl), but `token` can also abort this run.
    pub async fn crawl_with_cancel(
        &self,
        seed_url: &str,
        token: CancellationToken,
    ) -> Result<CrawlResult> {
        self.run(&[seed_url.to_string()], &self.config, Some(token))
            .await
    }

    /// Crawls with per-call overrides of the page budget, batch size and
    /// inter-batch delay (seconds).
    pub async fn crawl_with(
        &self,
        seed_url: &str,
        max_pages: usize,
        max_concurrent: usize,
        crawl_delay: f64,
    ) -> Result<CrawlResult> {
        let config = CrawlConfig {
            max_pages,
            max_concurrent,
            crawl_delay,
            ..self.config.clone()
        };
        self.run(&[seed_url.to_string()], &config, None).await
    }

    /// Crawls from several seeds in one session. Invalid seeds are skipped;
    /// if none is valid the crawl fails with `InvalidUrl`.
    pub async fn crawl_seeds(&self, seeds: &[String]) -> Result<CrawlResult> {
        self.run(seeds, &self.config, None).await
    }

    async fn run(
        &self,
        seeds: &[String],
        config: &CrawlConfig,
        extra_cancel: Option<CancellationToken>,
    ) -> Result<CrawlResult> {
        let (session, frontier) = match self.prepare(seeds, config) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Crawl could not start: {}", e);
                self.set_status(CrawlStatus::Failed);
                return Err(e);
            }
        };

        self.set_status(CrawlStatus::Running);
        let cancel = self.cancellation_token();
        let forward = extra_cancel.map(|extra| {
            if extra.is_cancelled() {
                cancel.cancel();
            }
            let cancel = cancel.clone();
            tokio::spawn(async move {
                extra.cancelled().await;
                cancel.cancel();
            })
        });

        let frontier = self
            .seed_from_sitemaps(&session, frontier, config, &cancel)
            .await;
        let result = self.drive(session, frontier, seeds, config, &cancel).await;

        if let Some(forward) = forward {
            forward.abort();
        }
        self.reset_cancel_after(&cancel);
        self.set_status(result.status);
        Ok(result)
    }

    /// A cancelled run hands the next run a fresh token. A cancelled parent
    /// yields an already-cancelled child, so it keeps stopping every run.
    fn reset_cancel_after(&self, used: &CancellationToken) {
        if used.is_cancelled() {
            *self.run_cancel.lock().unwrap_or_else(PoisonError::into_inner) =
                self.cancel.child_token();
        }
    }

    fn prepare(
        &self,
        seeds: &[String],
        config: &CrawlConfig,
    ) -> Result<(Arc<Session>, VecDeque<(NormalizedUrl, usize)>)> {
        config.validate()?;
        let fetcher = self
            .fetcher
            .clone()
            .ok_or_else(|| CrawlError::Configuration("no page fetcher configured".to_string()))?;

        let normalizer = UrlNormalizer::new(config.strip_tracking_params);
        let normalized_seeds: Vec<NormalizedUrl> = seeds
            .iter()
            .filter_map(|seed| match normalizer.normalize(&with_scheme(seed)) {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!("Skipping seed {}: {}", seed, e);
                    None
                }
            })
            .collect();

        if normalized_seeds.is_empty() {
            return Err(CrawlError::InvalidUrl(format!(
                "no valid seed URL in [{}]",
                seeds.join(", ")
            )));
        }

        let mut dedup = UrlDeduplicator::new(normalizer, config.fingerprinter()?);
        if config.stay_on_domain {
            for seed in &normalized_seeds {
                dedup = dedup.with_allowed_domain(seed.host());
            }
        }

        let mut frontier = VecDeque::new();
        for seed in normalized_seeds {
            if let Some(admitted) = dedup.admit_normalized(seed) {
                frontier.push_back((admitted, 0));
            }
        }

        let session = Session {
            config: config.clone(),
            min_interval: config.min_domain_interval_duration()?,
            fetcher,
            rate_limiter: self.rate_limiter.clone(),
            robots: config
                .respect_robots_txt
                .then(|| RobotsPolicy::new(config.user_agent.clone())),
            dedup,
            extractor: self.extractor.clone(),
            links: LinkExtractor::new(normalizer, config.stay_on_domain),
        };

        Ok((Arc::new(session), frontier))
    }

    /// Queues the pages listed in each seed site's sitemaps behind the
    /// seeds, one hop deep. They pass through the same admission as links.
    async fn seed_from_sitemaps(
        &self,
        session: &Session,
        mut frontier: VecDeque<(NormalizedUrl, usize)>,
        config: &CrawlConfig,
        cancel: &CancellationToken,
    ) -> VecDeque<(NormalizedUrl, usize)> {
        if !config.use_sitemaps || config.max_depth == Some(0) {
            return frontier;
        }

        let mut origins: Vec<Url> = Vec::new();
        for (seed, _) in &frontier {
            if let Ok(origin) = seed.url().join("/")
                && !origins.contains(&origin)
            {
                origins.push(origin);
            }
        }

        let reader = SitemapReader::new(
            session.fetcher.as_ref(),
            &session.rate_limiter,
            session.min_interval,
        );
        for origin in origins {
            let announced = match &session.robots {
                Some(robots) => robots
                    .rules_for(
                        &origin,
                        session.fetcher.as_ref(),
                        &session.rate_limiter,
                        session.min_interval,
                    )
                    .await
                    .sitemaps()
                    .to_vec(),
                None => Vec::new(),
            };

            let pages = tokio::select! {
                _ = cancel.cancelled() => break,
                pages = reader.page_urls(&origin, &announced) => pages,
            };

            let before = frontier.len();
            for page in pages {
                let Ok(normalized) = session.dedup.normalizer().normalize_parsed(page) else {
                    continue;
                };
                if let Some(admitted) = session.dedup.admit_normalized(normalized) {
                    frontier.push_back((admitted, 1));
                }
            }
            info!(
                "Queued {} URLs from the sitemaps of {}",
                frontier.len() - before,
                origin
            );
        }
        frontier
    }

    async fn drive(
        &self,
        session: Arc<Session>,
        mut frontier: VecDeque<(NormalizedUrl, usize)>,
        seeds: &[String],
        config: &CrawlConfig,
        cancel: &CancellationToken,
    ) -> CrawlResult {
        let start_time = Utc::now();
        let started = Instant::now();
        let crawl_delay = config.crawl_delay_duration().unwrap_or_default();

        info!(
            "Starting crawl of {} (max {} pages, {} concurrent)",
            seeds.join(", "),
            config.max_pages,
            config.max_concurrent
        );

        let mut visited: Vec<String> = Vec::new();
        let mut pages: Vec<PageRecord> = Vec::new();
        let mut failed = 0usize;
        let mut aborted = false;

        'crawl: while visited.len() < config.max_pages && !frontier.is_empty() {
            if cancel.is_cancelled() {
                aborted = true;
                break;
            }

            let batch_size = config.max_concurrent.min(config.max_pages - visited.len());
            let mut batch = JoinSet::new();
            for index in 0..batch_size {
                let Some((url, depth)) = frontier.pop_front() else {
                    break;
                };
                visited.push(url.as_str().to_string());
                if let Some(ref callback) = self.progress_callback {
                    callback(visited.len(), url.as_str().to_string());
                }
                let session = session.clone();
                batch.spawn(async move { (index, session.process(url, depth).await) });
            }

            let mut outcomes = Vec::with_capacity(batch_size);
            loop {
                let joined = tokio::select! {
                    _ = cancel.cancelled() => {
                        aborted = true;
                        break;
                    }
                    joined = batch.join_next() => joined,
                };
                match joined {
                    Some(Ok(outcome)) => outcomes.push(outcome),
                    Some(Err(e)) => {
                        warn!("Crawl worker failed: {}", e);
                        failed += 1;
                    }
                    None => break,
                }
            }

            if aborted {
                info!("Crawl cancelled, dropping {} in-flight fetches", batch.len());
                batch.abort_all();
            }

            // Merge in dispatch order so the frontier stays breadth-first.
            outcomes.sort_by_key(|(index, _)| *index);
            for (_, outcome) in outcomes {
                match outcome {
                    UrlOutcome::Page { record, new_links } => {
                        pages.push(*record);
                        frontier.extend(new_links);
                    }
                    UrlOutcome::Failed => failed += 1,
                    UrlOutcome::Disallowed => {}
                }
            }

            if aborted {
                break 'crawl;
            }

            if !crawl_delay.is_zero() && !frontier.is_empty() && visited.len() < config.max_pages {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        aborted = true;
                        break 'crawl;
                    }
                    _ = tokio::time::sleep(crawl_delay) => {}
                }
            }
        }

        // Earlier members of a duplicate group learn about later ones only now.
        for page in &mut pages {
            if let Ok(normalized) = session.dedup.normalizer().normalize(&page.url) {
                page.duplicate_of = session.dedup.duplicates_of(&normalized);
            }
        }

        let status = if aborted {
            CrawlStatus::Aborted
        } else {
            CrawlStatus::Completed
        };

        info!(
            "Crawl {}: {} pages, {} visited, {} failed, {} queued",
            status.as_str(),
            pages.len(),
            visited.len(),
            failed,
            frontier.len()
        );

        CrawlResult {
            seed_url: seeds.first().cloned().unwrap_or_default(),
            status,
            page_analysis: pages.iter().map(PageAnalysis::from).collect(),
            duplicate_content: session.dedup.duplicate_groups(),
            broken_links: Vec::new(),
            total_pages: pages.len(),
            total_links: session.dedup.seen_count(),
            links_visited: visited,
            links_to_visit: frontier
                .into_iter()
                .map(|(url, _)| url.as_str().to_string())
                .collect(),
            failed_urls: failed,
            crawl_time_seconds: started.elapsed().as_secs_f64(),
            start_time,
            end_time: Utc::now(),
            pages,
        }
    }
}

impl Default for Crawler {
    fn default() -> Self {
        Self::new(CrawlConfig::default())
    }
}
