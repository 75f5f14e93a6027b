use crate::normalize::{NormalizedUrl, UrlNormalizer};
use scraper::{Html, Selector};
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;
use tracing::{debug, trace};
use url::Url;

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static BASE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("base[href]").expect("static selector"));

/// hrefs starting with these never lead to a crawlable page.
const SKIPPED_PREFIXES: &[&str] = &[
    "#",
    "javascript:",
    "mailto:",
    "tel:",
    "data:",
    "file:",
    "about:",
];

fn is_skipped_href(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    SKIPPED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Pulls anchors out of a page and turns them into normalized absolute URLs.
#[derive(Debug, Clone, Copy)]
pub struct LinkExtractor {
    normalizer: UrlNormalizer,
    stay_on_domain: bool,
}

impl LinkExtractor {
    pub fn new(normalizer: UrlNormalizer, stay_on_domain: bool) -> Self {
        Self {
            normalizer,
            stay_on_domain,
        }
    }

    /// Resolution base for relative links: `<base href>` when present and
    /// valid, otherwise the page URL.
    fn resolution_base(page_url: &Url, document: &Html) -> Url {
        document
            .select(&BASE_SELECTOR)
            .next()
            .and_then(|base| base.value().attr("href"))
            .and_then(|href| page_url.join(href.trim()).ok())
            .unwrap_or_else(|| page_url.clone())
    }

    /// Returns the page's links, one entry per comparison key, in fetch form.
    pub fn extract(&self, page_url: &Url, document: &Html) -> Vec<NormalizedUrl> {
        let base = Self::resolution_base(page_url, document);
        let page_host = page_url.host_str().unwrap_or_default();

        let mut keys = HashSet::new();
        let mut links = Vec::new();

        for element in document.select(&ANCHOR_SELECTOR) {
            let Some(href) = element.value().attr("href").map(str::trim) else {
                continue;
            };
            if href.is_empty() || is_skipped_href(href) {
                continue;
            }

            let normalized = match self.normalizer.normalize_with_base(href, &base) {
                Ok(n) => n,
                Err(e) => {
                    trace!("Skipping link {}: {}", href, e);
                    continue;
                }
            };

            if self.stay_on_domain && !crate::normalize::same_domain(normalized.host(), page_host) {
                trace!("Skipping off-domain link {}", normalized);
                continue;
            }

            if keys.insert(normalized.key().to_string()) {
                links.push(normalized);
            }
        }

        debug!("Found {} links on {}", links.len(), page_url);
        links
    }
}

impl Default for LinkExtractor {
    fn default() -> Self {
        Self::new(UrlNormalizer::default(), true)
    }
}

/// Same-domain links of `html`, resolved against `base_url`, sorted.
pub fn extract_links(base_url: &Url, html: &str) -> BTreeSet<String> {
    let document = Html::parse_document(html);
    LinkExtractor::default()
        .extract(base_url, &document)
        .into_iter()
        .map(|link| link.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://example.com/blog/post").unwrap()
    }

    #[test]
    fn test_resolves_and_filters() {
        let html = r##"<html><body>
            <a href="/about">About</a>
            <a href="contact">Contact</a>
            <a href="https://www.example.com/shop/">Shop</a>
            <a href="https://other.org/x">Elsewhere</a>
            <a href="#top">Top</a>
            <a href="javascript:void(0)">JS</a>
            <a href="mailto:hi@example.com">Mail</a>
            <a href="tel:+100">Call</a>
            <a href="data:text/plain,hi">Data</a>
            <a href="ftp://example.com/file">FTP</a>
            <a href="">Empty</a>
        </body></html>"##;

        let links = extract_links(&page(), html);
        let expected: BTreeSet<String> = [
            "https://example.com/about",
            "https://example.com/blog/contact",
            "https://www.example.com/shop/",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(links, expected);
    }

    #[test]
    fn test_duplicates_collapse_through_normalizer() {
        let html = r#"<a href="/a">1</a><a href="/a/">2</a><a href="/a#x">3</a><a href="https://www.example.com/a">4</a>"#;
        let links = extract_links(&page(), html);
        assert_eq!(links.len(), 1);
        assert!(links.contains("https://example.com/a"));
    }

    #[test]
    fn test_base_href_is_honoured() {
        let html = r#"<html><head><base href="https://example.com/docs/"></head>
            <body><a href="intro">Intro</a></body></html>"#;
        let links = extract_links(&page(), html);
        assert!(links.contains("https://example.com/docs/intro"));
    }

    #[test]
    fn test_unscoped_extractor_keeps_other_domains() {
        let document = Html::parse_document(r#"<a href="https://other.org/x">x</a>"#);
        let links = LinkExtractor::new(UrlNormalizer::default(), false).extract(&page(), &document);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://other.org/x");
    }
}
