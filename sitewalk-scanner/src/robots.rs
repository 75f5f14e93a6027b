//! robots.txt support.
//!
//! Rules are fetched once per origin through the crawler's own fetcher and
//! cached for the life of the policy. Anything that goes wrong while fetching
//! (transport error, non-2xx) is treated as "no rules".

use crate::fetch::PageFetcher;
use crate::rate_limit::DomainRateLimiter;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

/// Parsed rules that apply to one user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotRules {
    rules: Vec<Rule>,
    crawl_delay: Option<Duration>,
    sitemaps: Vec<String>,
}

/// `Sitewalk/0.1 (+https://…)` → `sitewalk`.
fn product_token(agent: &str) -> String {
    agent
        .split(['/', ' '])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

impl RobotRules {
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses `content`, keeping the group whose user-agent equals our
    /// product token (case-insensitively) or the `*` group when no such
    /// group exists. `Sitemap:` lines are collected regardless of group.
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let token = product_token(user_agent);
        let mut sitemaps = Vec::new();

        let mut specific = RobotRules::default();
        let mut wildcard = RobotRules::default();
        let mut found_specific = false;

        let mut agents: Vec<String> = Vec::new();
        let mut group_has_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim().to_ascii_lowercase();
            let value = value.trim();

            if field == "sitemap" {
                if !value.is_empty() {
                    sitemaps.push(value.to_string());
                }
                continue;
            }

            if field == "user-agent" {
                if group_has_rules {
                    agents.clear();
                    group_has_rules = false;
                }
                agents.push(value.to_ascii_lowercase());
                continue;
            }

            group_has_rules = true;
            let for_us = !token.is_empty() && agents.iter().any(|a| product_token(a) == token);
            let for_all = agents.iter().any(|a| a == "*");
            if for_us {
                found_specific = true;
            }

            for (applies, target) in [(for_us, &mut specific), (for_all, &mut wildcard)] {
                if !applies {
                    continue;
                }
                match field.as_str() {
                    "allow" | "disallow" if !value.is_empty() => target.rules.push(Rule {
                        allow: field == "allow",
                        pattern: value.to_string(),
                    }),
                    "crawl-delay" => {
                        if let Ok(secs) = value.parse::<f64>()
                            && secs.is_finite()
                            && secs >= 0.0
                        {
                            target.crawl_delay = Some(Duration::from_secs_f64(secs));
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut rules = if found_specific { specific } else { wildcard };
        rules.sitemaps = sitemaps;
        rules
    }

    /// Longest matching rule wins; on a tie, allow wins.
    pub fn is_allowed(&self, path: &str) -> bool {
        let mut best: Option<(usize, bool)> = None;
        for rule in &self.rules {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            let len = rule.pattern.len();
            best = match best {
                Some((best_len, best_allow)) if best_len > len || (best_len == len && best_allow) => {
                    Some((best_len, best_allow))
                }
                _ => Some((len, rule.allow)),
            };
        }
        best.is_none_or(|(_, allow)| allow)
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }

    /// Sitemap URLs announced with `Sitemap:` lines.
    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }
}

/// Matches a robots path pattern supporting `*` and a trailing `$`.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return if anchored {
            path == pattern
        } else {
            path.starts_with(pattern)
        };
    }

    let Some(rest) = path.strip_prefix(parts[0]) else {
        return false;
    };
    let mut pos = path.len() - rest.len();

    let last = parts.len() - 1;
    for part in &parts[1..last] {
        match path[pos..].find(part) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }

    let tail = parts[last];
    if anchored {
        path.len() - pos >= tail.len() && path[pos..].ends_with(tail)
    } else {
        path[pos..].contains(tail)
    }
}

/// Path plus query, the part of a URL robots rules are matched against.
pub fn robots_target(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

fn origin_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Per-origin robots.txt cache.
pub struct RobotsPolicy {
    user_agent: String,
    origins: DashMap<String, Arc<OnceCell<Arc<RobotRules>>>>,
}

impl RobotsPolicy {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            origins: DashMap::new(),
        }
    }

    /// Rules for `url`'s origin, fetching `/robots.txt` the first time. The
    /// fetch goes through the rate limiter like any page fetch.
    pub async fn rules_for(
        &self,
        url: &Url,
        fetcher: &dyn PageFetcher,
        limiter: &DomainRateLimiter,
        min_interval: Duration,
    ) -> Arc<RobotRules> {
        let cell = self.origins.entry(origin_key(url)).or_default().clone();
        cell.get_or_init(|| async {
            let Ok(robots_url) = url.join("/robots.txt") else {
                return Arc::new(RobotRules::allow_all());
            };
            limiter
                .await_permit(url.host_str().unwrap_or_default(), min_interval)
                .await;
            let rules = match fetcher.fetch(&robots_url).await {
                Ok(response) if response.is_success() => {
                    debug!("Loaded {}", robots_url);
                    RobotRules::parse(&response.html, &self.user_agent)
                }
                Ok(response) => {
                    debug!("{} answered {}, allowing all", robots_url, response.status_code);
                    RobotRules::allow_all()
                }
                Err(e) => {
                    info!("Could not fetch {}: {}, allowing all", robots_url, e);
                    RobotRules::allow_all()
                }
            };
            Arc::new(rules)
        })
        .await
        .clone()
    }

    pub async fn is_allowed(
        &self,
        url: &Url,
        fetcher: &dyn PageFetcher,
        limiter: &DomainRateLimiter,
        min_interval: Duration,
    ) -> bool {
        let rules = self.rules_for(url, fetcher, limiter, min_interval).await;
        rules.is_allowed(&robots_target(url))
    }
}
