//! Per-domain politeness gate.
//!
//! Each domain gets its own async mutex holding the instant of the last
//! permitted fetch. A caller holds that mutex while it waits out the interval,
//! so callers for one domain queue up behind each other while other domains
//! proceed untouched.

use crate::normalize::comparison_host;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Minimum spacing between two fetches of the same domain.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Back-off used when a 429 carries no usable Retry-After.
pub const DEFAULT_THROTTLE_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound on any server-requested back-off.
pub const MAX_THROTTLE_BACKOFF: Duration = Duration::from_secs(600);

#[derive(Debug, Default)]
struct DomainRateState {
    last_permit: Option<Instant>,
    throttled_until: Option<Instant>,
}

impl DomainRateState {
    fn ready_at(&self, now: Instant, min_interval: Duration) -> Instant {
        let mut ready = now;
        if let Some(last) = self.last_permit {
            ready = ready.max(last + min_interval);
        }
        if let Some(until) = self.throttled_until {
            ready = ready.max(until);
        }
        ready
    }
}

/// Shareable across crawl sessions via `Arc`.
#[derive(Debug)]
pub struct DomainRateLimiter {
    domains: DashMap<String, Arc<Mutex<DomainRateState>>>,
    default_interval: Duration,
}

impl DomainRateLimiter {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            domains: DashMap::new(),
            default_interval,
        }
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    fn state_for(&self, domain: &str) -> Arc<Mutex<DomainRateState>> {
        let key = comparison_host(&domain.to_ascii_lowercase()).to_string();
        // Clone the Arc out so the shard lock is released before awaiting.
        self.domains.entry(key).or_default().clone()
    }

    /// Waits until `min_interval` has passed since the last permit for
    /// `domain` (and any 429 back-off has expired), then records a new permit.
    pub async fn await_permit(&self, domain: &str, min_interval: Duration) {
        let state = self.state_for(domain);
        let mut state = state.lock().await;

        let now = Instant::now();
        let ready_at = state.ready_at(now, min_interval);
        if ready_at > now {
            debug!(
                "Rate limiting {}: waiting {:?}",
                domain,
                ready_at.duration_since(now)
            );
            tokio::time::sleep_until(ready_at).await;
        }

        let granted = Instant::now();
        state.last_permit = Some(granted);
        if state.throttled_until.is_some_and(|until| until <= granted) {
            state.throttled_until = None;
        }
    }

    /// [`await_permit`](Self::await_permit) with the limiter's default interval.
    pub async fn permit(&self, domain: &str) {
        self.await_permit(domain, self.default_interval).await;
    }

    /// Pushes the next permit for `domain` out after the server answered 429.
    pub async fn record_throttled(&self, domain: &str, retry_after: Option<Duration>) {
        let backoff = retry_after
            .unwrap_or(DEFAULT_THROTTLE_BACKOFF)
            .min(MAX_THROTTLE_BACKOFF);
        info!("{} is throttling us, backing off for {:?}", domain, backoff);

        let state = self.state_for(domain);
        let mut state = state.lock().await;
        let until = Instant::now() + backoff;
        state.throttled_until = Some(state.throttled_until.map_or(until, |prev| prev.max(until)));
    }

    pub fn tracked_domains(&self) -> usize {
        self.domains.len()
    }
}

impl Default for DomainRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

/// Parses a `Retry-After` header value given in delta-seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
