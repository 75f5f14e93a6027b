//! URL and content deduplication
//!
//! Two levels, both scoped to one crawl session:
//! - URL level: normalized comparison keys in a seen-set. Admission is an
//!   atomic check-and-insert, so a URL is claimed before it is fetched and
//!   concurrent workers can never both pick it up.
//! - Content level: main-content fingerprints mapped to the URLs that
//!   produced them. Duplicates are recorded, never dropped.

use crate::fingerprint::{ContentFingerprint, Fingerprinter};
use crate::normalize::{NormalizedUrl, UrlNormalizer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};
use url::Url;

/// Path extensions that never lead to an HTML page.
const SKIPPED_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "tif", "tiff", "avif",
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "rar", "7z",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "odp", "rtf", "csv",
    // web assets
    "css", "js", "mjs", "map", "woff", "woff2", "ttf", "otf", "eot",
    // audio / video
    "mp3", "wav", "ogg", "flac", "aac", "m4a", "mp4", "m4v", "webm", "avi", "mov", "mkv", "wmv", "flv",
    // binaries
    "exe", "msi", "dmg", "iso", "apk", "bin",
];

/// True when the URL path ends in an extension we never crawl.
pub fn has_skipped_extension(url: &Url) -> bool {
    let last_segment = url.path().rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            SKIPPED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// URLs whose main content hashed to the same fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub fingerprint: ContentFingerprint,
    pub urls: Vec<String>,
}

/// Outcome of recording a page's content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentCheck {
    pub fingerprint: ContentFingerprint,
    /// URLs recorded earlier with the same fingerprint. Empty for new content.
    pub duplicate_of: Vec<String>,
}

impl ContentCheck {
    pub fn is_new(&self) -> bool {
        self.duplicate_of.is_empty()
    }
}

#[derive(Default)]
struct DedupState {
    seen: HashSet<String>,
    index: HashMap<ContentFingerprint, Vec<NormalizedUrl>>,
}

pub struct UrlDeduplicator {
    normalizer: UrlNormalizer,
    fingerprinter: Fingerprinter,
    /// Comparison hosts URLs must belong to. Empty means unscoped.
    allowed_domains: HashSet<String>,
    state: Mutex<DedupState>,
}

impl UrlDeduplicator {
    pub fn new(normalizer: UrlNormalizer, fingerprinter: Fingerprinter) -> Self {
        Self {
            normalizer,
            fingerprinter,
            allowed_domains: HashSet::new(),
            state: Mutex::new(DedupState::default()),
        }
    }

    /// Restricts admission to the given site (compared without `www.`).
    pub fn with_allowed_domain(mut self, domain: &str) -> Self {
        self.allowed_domains
            .insert(crate::normalize::comparison_host(&domain.to_ascii_lowercase()).to_string());
        self
    }

    pub fn normalizer(&self) -> &UrlNormalizer {
        &self.normalizer
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    fn state(&self) -> MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_in_scope(&self, url: &NormalizedUrl) -> bool {
        self.allowed_domains.is_empty() || self.allowed_domains.contains(url.domain())
    }

    /// Decides whether `url` should be crawled and, if so, claims it.
    pub fn should_process(&self, url: &str) -> bool {
        self.admit(url).is_some()
    }

    /// Like [`should_process`](Self::should_process) but hands back the
    /// normalized URL that was claimed.
    pub fn admit(&self, url: &str) -> Option<NormalizedUrl> {
        match self.normalizer.normalize(url) {
            Ok(normalized) => self.admit_normalized(normalized),
            Err(e) => {
                debug!("Rejecting {}: {}", url, e);
                None
            }
        }
    }

    pub fn admit_normalized(&self, url: NormalizedUrl) -> Option<NormalizedUrl> {
        if has_skipped_extension(url.url()) {
            trace!("Rejecting {}: non-HTML extension", url);
            return None;
        }
        if !self.is_in_scope(&url) {
            trace!("Rejecting {}: off domain", url);
            return None;
        }

        let mut state = self.state();
        if state.seen.insert(url.key().to_string()) {
            Some(url)
        } else {
            None
        }
    }

    pub fn is_seen(&self, url: &str) -> bool {
        match self.normalizer.normalize(url) {
            Ok(normalized) => self.state().seen.contains(normalized.key()),
            Err(_) => false,
        }
    }

    pub fn seen_count(&self) -> usize {
        self.state().seen.len()
    }

    /// Records page text; returns `true` when the content was not seen under
    /// another URL before.
    pub fn record_content(&self, url: &str, content: &str) -> bool {
        match self.normalizer.normalize(url) {
            Ok(normalized) => self.record_page(&normalized, content).is_new(),
            Err(e) => {
                debug!("Not recording content for {}: {}", url, e);
                true
            }
        }
    }

    /// Fingerprints `content` and files it under `url`.
    ///
    /// Text that is empty after boilerplate stripping is fingerprinted but not
    /// indexed, so pages without extractable text never pair up.
    pub fn record_page(&self, url: &NormalizedUrl, content: &str) -> ContentCheck {
        let main = self.fingerprinter.main_content(content);
        let fingerprint = ContentFingerprint::of_main_content(&main);

        if main.is_empty() {
            return ContentCheck {
                fingerprint,
                duplicate_of: Vec::new(),
            };
        }

        let mut state = self.state();
        let urls = state.index.entry(fingerprint).or_default();
        let duplicate_of: Vec<String> = urls
            .iter()
            .filter(|existing| *existing != url)
            .map(|existing| existing.as_str().to_string())
            .collect();

        if !urls.contains(url) {
            urls.push(url.clone());
        }

        if !duplicate_of.is_empty() {
            debug!(
                "Content of {} duplicates {} (fingerprint {})",
                url,
                duplicate_of.join(", "),
                fingerprint
            );
        }

        ContentCheck {
            fingerprint,
            duplicate_of,
        }
    }

    /// Other URLs that share `url`'s fingerprint.
    pub fn duplicates_of(&self, url: &NormalizedUrl) -> Vec<String> {
        self.state()
            .index
            .values()
            .find(|urls| urls.contains(url))
            .map(|urls| {
                urls.iter()
                    .filter(|u| *u != url)
                    .map(|u| u.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every fingerprint that more than one URL produced, ordered by first URL.
    pub fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        let mut groups: Vec<DuplicateGroup> = self
            .state()
            .index
            .iter()
            .filter(|(_, urls)| urls.len() > 1)
            .map(|(fingerprint, urls)| DuplicateGroup {
                fingerprint: *fingerprint,
                urls: urls.iter().map(|u| u.as_str().to_string()).collect(),
            })
            .collect();
        groups.sort_by(|a, b| a.urls.cmp(&b.urls));
        groups
    }
}

impl Default for UrlDeduplicator {
    fn default() -> Self {
        Self::new(UrlNormalizer::default(), Fingerprinter::default())
    }
}
