//! Text and metadata extraction from fetched pages.
//!
//! Text comes from an ordered chain of [`ExtractionStrategy`] objects; the
//! first one that yields non-empty text wins. Metadata (title, description,
//! keywords, H1s) is read directly from the document, once.

use crate::error::ExtractError;
use crate::fingerprint::collapse_whitespace;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use tracing::trace;
use url::Url;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static META_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| selector("meta[name='description'], meta[name='Description']"));
static META_KEYWORDS: LazyLock<Selector> =
    LazyLock::new(|| selector("meta[name='keywords'], meta[name='Keywords']"));
static OG_TYPE: LazyLock<Selector> = LazyLock::new(|| selector("meta[property='og:type']"));
static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));
static ARTICLE: LazyLock<Selector> = LazyLock::new(|| selector("article"));
static JSON_LD: LazyLock<Selector> =
    LazyLock::new(|| selector("script[type='application/ld+json']"));
static PRODUCT_MICRODATA: LazyLock<Selector> =
    LazyLock::new(|| selector("[itemtype*='schema.org/Product']"));
static TEXT_BLOCKS: LazyLock<Selector> =
    LazyLock::new(|| selector("p, li, h1, h2, h3, h4, h5, h6, blockquote"));

static LD_PRODUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""@type"\s*:\s*"Product""#).expect("static regex"));

/// Content containers, most specific first.
const SEMANTIC_CONTAINERS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    "#content",
    "#main-content",
    ".post-content",
    ".article-content",
    ".entry-content",
    ".main-content",
    ".content",
];

/// Elements whose text never counts as page content.
const NON_CONTENT_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form",
];

/// Text of `root`, skipping anything inside a non-content element.
fn visible_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().take_while(|a| a.id() != root.id()).any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| NON_CONTENT_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedContent {
    pub text: String,
}

impl ExtractedContent {
    pub fn new(text: String) -> Self {
        Self { text }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, document: &Html) -> ExtractedContent;
}

/// First semantic content container with any visible text.
pub struct SemanticContainerStrategy {
    selectors: Vec<Selector>,
}

impl Default for SemanticContainerStrategy {
    fn default() -> Self {
        Self {
            selectors: SEMANTIC_CONTAINERS
                .iter()
                .filter_map(|s| Selector::parse(s).ok())
                .collect(),
        }
    }
}

impl ExtractionStrategy for SemanticContainerStrategy {
    fn name(&self) -> &'static str {
        "semantic-container"
    }

    fn extract(&self, document: &Html) -> ExtractedContent {
        for sel in &self.selectors {
            for element in document.select(sel) {
                let text = visible_text(element);
                if !text.is_empty() {
                    return ExtractedContent::new(text);
                }
            }
        }
        ExtractedContent::default()
    }
}

/// Paragraph, list item, and heading text joined one block per line.
#[derive(Default)]
pub struct ParagraphStrategy;

impl ExtractionStrategy for ParagraphStrategy {
    fn name(&self) -> &'static str {
        "paragraphs"
    }

    fn extract(&self, document: &Html) -> ExtractedContent {
        let blocks: Vec<String> = document
            .select(&TEXT_BLOCKS)
            .map(|e| collapse_whitespace(&e.text().collect::<String>()))
            .filter(|t| !t.is_empty())
            .collect();
        ExtractedContent::new(blocks.join("\n"))
    }
}

/// Everything visible in `<body>`.
#[derive(Default)]
pub struct BodyTextStrategy;

impl ExtractionStrategy for BodyTextStrategy {
    fn name(&self) -> &'static str {
        "body-text"
    }

    fn extract(&self, document: &Html) -> ExtractedContent {
        match document.select(&BODY).next() {
            Some(body) => ExtractedContent::new(visible_text(body)),
            None => ExtractedContent::new(visible_text(document.root_element())),
        }
    }
}

/// Strategies tried in order until one produces text.
pub struct ExtractorChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl ExtractorChain {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn extract(&self, document: &Html) -> Result<ExtractedContent, ExtractError> {
        for strategy in &self.strategies {
            let content = strategy.extract(document);
            if !content.is_empty() {
                trace!("Extracted text with {}", strategy.name());
                return Ok(content);
            }
        }
        Err(ExtractError::NoContent)
    }
}

impl Default for ExtractorChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(SemanticContainerStrategy::default()),
            Box::new(ParagraphStrategy),
            Box::new(BodyTextStrategy),
        ])
    }
}

/// Head and heading metadata of a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Vec<String>,
    pub h1: Vec<String>,
}

fn meta_content(document: &Html, sel: &Selector) -> Option<String> {
    document
        .select(sel)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(String::from)
}

impl PageMetadata {
    pub fn from_document(document: &Html) -> Self {
        let title = document
            .select(&TITLE)
            .next()
            .map(|t| collapse_whitespace(&t.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let meta_keywords = meta_content(document, &META_KEYWORDS)
            .map(|k| {
                k.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let h1 = document
            .select(&H1)
            .map(|h| collapse_whitespace(&h.text().collect::<String>()))
            .filter(|h| !h.is_empty())
            .collect();

        Self {
            title,
            meta_description: meta_content(document, &META_DESCRIPTION),
            meta_keywords,
            h1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Homepage,
    Article,
    Product,
    Category,
    Contact,
    About,
    #[default]
    General,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Homepage => "homepage",
            ContentKind::Article => "article",
            ContentKind::Product => "product",
            ContentKind::Category => "category",
            ContentKind::Contact => "contact",
            ContentKind::About => "about",
            ContentKind::General => "general",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "homepage" => ContentKind::Homepage,
            "article" => ContentKind::Article,
            "product" => ContentKind::Product,
            "category" => ContentKind::Category,
            "contact" => ContentKind::Contact,
            "about" => ContentKind::About,
            _ => ContentKind::General,
        }
    }

    /// Classifies a page from its URL path and a few document signals.
    pub fn classify(url: &Url, document: &Html) -> Self {
        let segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|s| !s.is_empty()).map(str::to_ascii_lowercase).collect())
            .unwrap_or_default();

        if segments.is_empty() {
            return ContentKind::Homepage;
        }

        let has_segment = |keywords: &[&str]| {
            segments
                .iter()
                .any(|s| keywords.iter().any(|k| segment_is(s, k)))
        };

        if has_segment(&["contact"]) {
            return ContentKind::Contact;
        }
        if has_segment(&["about"]) {
            return ContentKind::About;
        }

        let og_type = meta_content(document, &OG_TYPE).map(|t| t.to_ascii_lowercase());

        let is_product = og_type.as_deref().is_some_and(|t| t.starts_with("product"))
            || document.select(&PRODUCT_MICRODATA).next().is_some()
            || document
                .select(&JSON_LD)
                .any(|s| LD_PRODUCT.is_match(&s.text().collect::<String>()))
            || has_segment(&["product"]);
        if is_product {
            return ContentKind::Product;
        }

        if has_segment(&["category", "categories", "tag", "collections"]) {
            return ContentKind::Category;
        }

        if og_type.as_deref() == Some("article")
            || has_segment(&["blog", "news", "article", "post"])
            || document.select(&ARTICLE).next().is_some()
        {
            return ContentKind::Article;
        }

        ContentKind::General
    }
}

/// `segment` names `keyword`: exactly, as a plural, with an extension
/// (`about.html`) or as the first word of a slug (`contact-us`).
fn segment_is(segment: &str, keyword: &str) -> bool {
    let stem = segment.split('.').next().unwrap_or_default();
    match stem.strip_prefix(keyword) {
        Some(rest) => rest.is_empty() || rest == "s" || rest.starts_with('-'),
        None => false,
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
