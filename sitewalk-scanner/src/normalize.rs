//! URL canonicalization.
//!
//! A [`NormalizedUrl`] has two views:
//! - the *fetch form* (`url()` / `as_str()`): fragment removed, original
//!   host kept, used when requesting the page and when reporting it;
//! - the *comparison key* (`key()`): additionally drops a leading `www.`
//!   and one trailing slash, used for every seen/dedup decision.
//!
//! Scheme and host are lower-cased and default ports removed by the `url`
//! parser itself.

use crate::error::{CrawlError, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::debug;
use url::Url;

/// Query keys dropped when tracking-parameter stripping is enabled.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "dclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "sid",
    "sessionid",
    "phpsessid",
    "jsessionid",
    "_ga",
    "ref",
];

#[derive(Debug, Clone)]
pub struct NormalizedUrl {
    url: Url,
    key: String,
}

impl NormalizedUrl {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Host exactly as it will be requested.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Host with any `www.` prefix removed; used for scoping and politeness.
    pub fn domain(&self) -> &str {
        comparison_host(self.host())
    }

    pub fn into_url(self) -> Url {
        self.url
    }
}

impl PartialEq for NormalizedUrl {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for NormalizedUrl {}

impl Hash for NormalizedUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl Serialize for NormalizedUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.url.as_str())
    }
}

/// Strips a leading `www.` for domain comparison.
pub fn comparison_host(host: &str) -> &str {
    match host.strip_prefix("www.") {
        Some(rest) if !rest.is_empty() => rest,
        _ => host,
    }
}

/// True when both hosts name the same site, ignoring case and `www.`.
pub fn same_domain(a: &str, b: &str) -> bool {
    comparison_host(&a.to_ascii_lowercase()) == comparison_host(&b.to_ascii_lowercase())
}

/// Normalizer with an explicit query policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlNormalizer {
    strip_tracking_params: bool,
}

impl UrlNormalizer {
    pub fn new(strip_tracking_params: bool) -> Self {
        Self {
            strip_tracking_params,
        }
    }

    pub fn normalize(&self, input: &str) -> Result<NormalizedUrl> {
        let parsed = Url::parse(input.trim())
            .map_err(|e| CrawlError::InvalidUrl(format!("{}: {}", input, e)))?;
        self.normalize_parsed(parsed)
    }

    /// Resolves `href` (absolute, protocol-relative, root-relative or
    /// relative) against `base`, then normalizes.
    pub fn normalize_with_base(&self, href: &str, base: &Url) -> Result<NormalizedUrl> {
        let resolved = base
            .join(href.trim())
            .map_err(|e| CrawlError::InvalidUrl(format!("{}: {}", href, e)))?;
        self.normalize_parsed(resolved)
    }

    pub fn normalize_parsed(&self, mut url: Url) -> Result<NormalizedUrl> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CrawlError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                url.scheme(),
                url
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(CrawlError::InvalidUrl(format!("missing host in {}", url)));
        }

        url.set_fragment(None);
        if self.strip_tracking_params {
            strip_tracking(&mut url);
        }

        let key = comparison_key(&url);
        Ok(NormalizedUrl { url, key })
    }
}

/// Normalizes with the default policy (query left intact).
pub fn normalize(input: &str) -> Result<NormalizedUrl> {
    UrlNormalizer::default().normalize(input)
}

/// Resolves then normalizes with the default policy.
pub fn normalize_with_base(href: &str, base: &Url) -> Result<NormalizedUrl> {
    UrlNormalizer::default().normalize_with_base(href, base)
}

fn comparison_key(url: &Url) -> String {
    let mut key = url.clone();

    if let Some(host) = url.host_str() {
        let stripped = comparison_host(host);
        if stripped.len() != host.len()
            && let Err(e) = key.set_host(Some(stripped))
        {
            debug!("Could not strip www. from {}: {}", host, e);
        }
    }

    let path = key.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        key.set_path(&path[..path.len() - 1]);
    }

    key.into()
}

fn is_tracking_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

fn strip_tracking(url: &mut Url) {
    if url.query().is_none() {
        return;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_key(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}
