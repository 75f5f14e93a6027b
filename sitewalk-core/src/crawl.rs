use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sitewalk_scanner::link_check::{LinkChecker, LinkCheckerConfig, LinkStatusCache};
use sitewalk_scanner::result::{CrawlResult, CrawlStatus};
use sitewalk_scanner::{CancellationToken, CrawlConfig, CrawlError, Crawler, DomainRateLimiter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub urls: Vec<String>,
    pub config: CrawlConfig,
    /// Probe every outbound link after each host is crawled.
    pub check_links: bool,
    pub check_external: bool,
    pub link_cache: Option<Arc<dyn LinkStatusCache>>,
    pub show_progress_bars: bool,
}

impl CrawlOptions {
    pub fn new(urls: Vec<String>, config: CrawlConfig) -> Self {
        Self {
            urls,
            config,
            check_links: false,
            check_external: false,
            link_cache: None,
            show_progress_bars: false,
        }
    }
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Crawl each seed in turn, one session per seed. All sessions share one
/// [`DomainRateLimiter`], so seeds on the same host stay rate limited
/// against each other. Cancelling `cancel` aborts the running session and
/// skips the remaining seeds.
pub async fn execute_crawl(
    options: CrawlOptions,
    progress_callback: Option<CrawlProgressCallback>,
    cancel: CancellationToken,
) -> Result<Vec<CrawlResult>, String> {
    let CrawlOptions {
        urls,
        config,
        check_links,
        check_external,
        link_cache,
        show_progress_bars,
    } = options;

    config.validate().map_err(|e| e.to_string())?;

    let progress_bar = if show_progress_bars {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .map_err(|e| e.to_string())?,
        );
        pb.set_message("Starting crawl...");
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    } else {
        None
    };

    let processed_count = Arc::new(AtomicUsize::new(0));
    let internal_progress_callback: sitewalk_scanner::ProgressCallback = match &progress_bar {
        Some(pb) => {
            let pb = pb.clone();
            let count = processed_count.clone();
            Arc::new(move |_worker_id: usize, url: String| {
                let n = count.fetch_add(1, Ordering::Relaxed) + 1;
                pb.set_message(format!("Crawling... {} URLs processed ({})", n, url));
            })
        }
        None => {
            let count = processed_count.clone();
            Arc::new(move |_worker_id: usize, _url: String| {
                count.fetch_add(1, Ordering::Relaxed);
            })
        }
    };

    let checker = if check_links {
        let checker = LinkChecker::new(LinkCheckerConfig {
            check_external,
            user_agent: config.user_agent.clone(),
            ..Default::default()
        })
        .map_err(|e| e.to_string())?;
        Some(match link_cache {
            Some(cache) => checker.with_cache(cache),
            None => checker,
        })
    } else {
        None
    };

    let rate_limiter = Arc::new(DomainRateLimiter::new(
        config.min_domain_interval_duration().map_err(|e| e.to_string())?,
    ));

    let mut all_results = Vec::new();
    for (idx, url_str) in urls.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!("Crawl cancelled, skipping {} remaining seed(s)", urls.len() - idx);
            break;
        }

        if let Some(ref callback) = progress_callback
            && urls.len() > 1
        {
            callback(format!(
                "Crawling host {}/{}: {}",
                idx + 1,
                urls.len(),
                url_str
            ));
        }

        let crawler = Crawler::new(config.clone())
            .with_http_fetcher()
            .map_err(|e| e.to_string())?
            .with_rate_limiter(rate_limiter.clone())
            .with_progress_callback(internal_progress_callback.clone())
            .with_cancellation_token(cancel.child_token());

        match crawler.crawl(url_str).await {
            Ok(mut result) => {
                if let Some(checker) = &checker
                    && result.status != CrawlStatus::Aborted
                {
                    if let Some(pb) = &progress_bar {
                        pb.set_message(format!("Checking links on {}...", url_str));
                    }
                    result.broken_links = checker.check_pages(&result.pages).await;
                }
                info!(
                    "Crawled {}: {} pages, {} failed, status {}",
                    url_str,
                    result.total_pages,
                    result.failed_urls,
                    result.status.as_str()
                );
                all_results.push(result);
            }
            Err(e @ CrawlError::Configuration(_)) => {
                if let Some(pb) = &progress_bar {
                    pb.abandon();
                }
                return Err(e.to_string());
            }
            Err(e) => {
                if let Some(ref callback) = progress_callback {
                    callback(format!("[!]  Failed to crawl {}: {}", url_str, e));
                }
            }
        }
    }

    if let Some(pb) = &progress_bar {
        let total = processed_count.load(Ordering::Relaxed);
        pb.finish_with_message(format!("Crawl complete! {} URLs processed", total));
    }

    Ok(all_results)
}

fn colored_status(status_code: u16) -> String {
    let code = status_code.to_string();
    match status_code {
        200..=299 => code.green().to_string(),
        300..=399 => code.cyan().to_string(),
        400..=499 => code.yellow().to_string(),
        500..=599 => code.red().to_string(),
        _ => code,
    }
}

/// Generate a crawl report from results
pub fn generate_crawl_report(results: &[CrawlResult]) -> String {
    let rule = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n";
    let mut report = String::new();
    report.push_str(rule);
    report.push_str("# Summary:\n");

    let pages: usize = results.iter().map(|r| r.total_pages).sum();
    let links: usize = results.iter().map(|r| r.total_links).sum();
    let failed: usize = results.iter().map(|r| r.failed_urls).sum();
    let duplicates: usize = results.iter().map(|r| r.duplicate_page_count()).sum();
    let broken: usize = results.iter().map(|r| r.broken_links.len()).sum();
    let seconds: f64 = results.iter().map(|r| r.crawl_time_seconds).sum();

    report.push_str(&format!("  Pages crawled: {}\n", pages));
    report.push_str(&format!("  Total links found: {}\n", links));
    report.push_str(&format!("  Failed URLs: {}\n", failed));
    report.push_str(&format!("  Duplicate pages: {}\n", duplicates));
    report.push_str(&format!("  Broken links: {}\n", broken));
    report.push_str(&format!("  Crawl time: {:.1}s\n", seconds));
    report.push('\n');
    report.push_str(rule);

    for result in results {
        let host = Url::parse(&result.seed_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| result.seed_url.clone());

        report.push_str(&format!("## {}\n", host));
        report.push_str(&format!(
            "  {} pages found ({})\n\n",
            result.total_pages,
            result.status.as_str()
        ));

        for page in &result.pages {
            let mut line = format!(
                "  {} {} {}",
                colored_status(page.status_code),
                extract_url_path(&page.url),
                format!("[{}]", page.content_kind).dimmed()
            );
            if let Some(title) = &page.title {
                line.push_str(&format!(" {}", title));
            }
            if page.is_duplicate() {
                line.push_str(&format!(" {}", "duplicate".yellow()));
            }
            report.push_str(&line);
            report.push('\n');
        }

        if !result.duplicate_content.is_empty() {
            report.push_str("\n  Duplicate content:\n");
            for group in &result.duplicate_content {
                report.push_str(&format!("    {}\n", group.fingerprint.to_string().dimmed()));
                for url in &group.urls {
                    report.push_str(&format!("      {}\n", extract_url_path(url)));
                }
            }
        }

        if !result.broken_links.is_empty() {
            report.push_str("\n  Broken links:\n");
            for link in &result.broken_links {
                let status = match &link.error {
                    Some(error) => error.red().to_string(),
                    None => colored_status(link.status_code),
                };
                report.push_str(&format!(
                    "    {} {} (from {})\n",
                    status,
                    link.broken_link,
                    extract_url_path(&link.source_page)
                ));
            }
        }

        if !result.links_to_visit.is_empty() {
            report.push_str(&format!(
                "\n  {} links left unvisited\n",
                result.links_to_visit.len()
            ));
        }
        report.push('\n');
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colored_status_keeps_code() {
        colored::control::set_override(false);
        assert_eq!(colored_status(200), "200");
        assert_eq!(colored_status(404), "404");
        assert_eq!(colored_status(0), "0");
    }

    #[tokio::test]
    async fn test_execute_crawl_rejects_invalid_config() {
        let config = CrawlConfig {
            max_pages: 0,
            ..Default::default()
        };
        let options = CrawlOptions::new(vec!["https://example.com".to_string()], config);
        let result = execute_crawl(options, None, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_execute_crawl_skips_all_seeds_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = CrawlOptions::new(
            vec!["https://example.com".to_string()],
            CrawlConfig::default(),
        );
        let results = execute_crawl(options, None, cancel).await.unwrap();
        assert!(results.is_empty());
    }
}
