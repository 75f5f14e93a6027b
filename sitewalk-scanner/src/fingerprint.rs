//! Main-content fingerprinting.
//!
//! Boilerplate phrases are cut out of the extracted text, whitespace is
//! collapsed, and the remainder is hashed with xxh3. Pages that only differ
//! in shared template chrome (cookie banners, copyright lines, newsletter
//! prompts) therefore hash the same, while pages sharing only the template
//! do not collide on the template text.

use crate::error::{CrawlError, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Phrases excised before hashing. Matched case-insensitively.
pub const DEFAULT_BOILERPLATE_PATTERNS: &[&str] = &[
    r"skip to (main )?content",
    r"(this|our) (web)?site uses cookies[^.\n]*\.?",
    r"we use cookies[^.\n]*\.?",
    r"accept (all )?cookies",
    r"cookie (policy|settings|preferences)",
    r"(©|\(c\)|copyright)\s*(\d{4}\s*[-–]\s*)?\d{4}[^.\n]*\.?",
    r"all rights reserved\.?",
    r"(subscribe to|sign up for) our newsletter",
    r"share (this|on) (facebook|twitter|linkedin|x)",
    r"follow us on \w+",
    r"privacy policy",
    r"terms (of service|of use|and conditions)",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentFingerprint(pub u64);

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for ContentFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        u64::from_str_radix(&hex, 16)
            .map(ContentFingerprint)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone)]
pub struct Fingerprinter {
    patterns: Vec<Regex>,
}

impl Fingerprinter {
    /// Compiles the given boilerplate patterns. A pattern that fails to
    /// compile is a configuration error.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        CrawlError::Configuration(format!(
                            "invalid boilerplate pattern '{}': {}",
                            p.as_ref(),
                            e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// Removes boilerplate phrases and collapses whitespace.
    pub fn main_content(&self, text: &str) -> String {
        let mut stripped = text.to_string();
        for pattern in &self.patterns {
            if pattern.is_match(&stripped) {
                stripped = pattern.replace_all(&stripped, " ").into_owned();
            }
        }
        collapse_whitespace(&stripped)
    }

    pub fn fingerprint(&self, text: &str) -> ContentFingerprint {
        ContentFingerprint::of_main_content(&self.main_content(text))
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        let patterns = DEFAULT_BOILERPLATE_PATTERNS
            .iter()
            .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
            .collect();
        Self { patterns }
    }
}

impl ContentFingerprint {
    /// Hashes text that has already been reduced to main content. Case is
    /// folded first.
    pub fn of_main_content(text: &str) -> Self {
        ContentFingerprint(xxhash_rust::xxh3::xxh3_64(text.to_lowercase().as_bytes()))
    }
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_does_not_change_fingerprint() {
        let fp = Fingerprinter::default();
        assert_eq!(
            fp.fingerprint("Fresh bread   every\nmorning."),
            fp.fingerprint("  Fresh bread every morning.  ")
        );
    }

    #[test]
    fn test_boilerplate_is_ignored() {
        let fp = Fingerprinter::default();
        let a = "Skip to content Our opening hours are 9 to 5. © 2024 Bakery Ltd. All rights reserved.";
        let b = "Our opening hours are 9 to 5. We use cookies to improve your experience. Accept cookies";
        assert_eq!(fp.main_content(a), "Our opening hours are 9 to 5.");
        assert_eq!(fp.fingerprint(a), fp.fingerprint(b));
    }

    #[test]
    fn test_template_only_overlap_does_not_collide() {
        let fp = Fingerprinter::default();
        let a = "Privacy policy Terms of service Sourdough recipe";
        let b = "Privacy policy Terms of service Rye recipe";
        assert_ne!(fp.fingerprint(a), fp.fingerprint(b));
    }

    #[test]
    fn test_custom_patterns() {
        let fp = Fingerprinter::new(["home \\| shop \\| blog"]).unwrap();
        assert_eq!(fp.main_content("HOME | SHOP | BLOG Welcome"), "Welcome");
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let err = Fingerprinter::new(["(unclosed"]).unwrap_err();
        assert!(matches!(err, CrawlError::Configuration(_)));
    }

    #[test]
    fn test_case_is_folded() {
        let fp = Fingerprinter::default();
        assert_eq!(fp.fingerprint("Fresh Bread"), fp.fingerprint("fresh bread"));
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(ContentFingerprint(0xab).to_string(), "00000000000000ab");
        let parsed: ContentFingerprint = serde_json::from_str("\"00000000000000ab\"").unwrap();
        assert_eq!(parsed, ContentFingerprint(0xab));
    }
}
