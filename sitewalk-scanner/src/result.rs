use crate::dedup::DuplicateGroup;
use crate::extract::{ContentKind, PageMetadata};
use crate::fingerprint::ContentFingerprint;
use crate::link_check::BrokenLink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    Idle,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Idle => "idle",
            CrawlStatus::Running => "running",
            CrawlStatus::Completed => "completed",
            CrawlStatus::Aborted => "aborted",
            CrawlStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CrawlStatus::Completed | CrawlStatus::Aborted | CrawlStatus::Failed
        )
    }
}

/// One successfully fetched page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub final_url: String,
    pub html: String,
    pub text: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub meta_keywords: Vec<String>,
    pub h1: Vec<String>,
    pub links: Vec<String>,
    pub status_code: u16,
    pub content_kind: ContentKind,
    pub fetched_at: DateTime<Utc>,
    pub depth: usize,
    pub word_count: usize,
    pub fingerprint: Option<ContentFingerprint>,
    /// Other URLs whose main content hashed the same.
    pub duplicate_of: Vec<String>,
}

impl PageRecord {
    pub fn new(url: String, final_url: String, status_code: u16) -> Self {
        Self {
            url,
            final_url,
            html: String::new(),
            text: String::new(),
            title: None,
            meta_description: None,
            meta_keywords: Vec::new(),
            h1: Vec::new(),
            links: Vec::new(),
            status_code,
            content_kind: ContentKind::General,
            fetched_at: Utc::now(),
            depth: 0,
            word_count: 0,
            fingerprint: None,
            duplicate_of: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: PageMetadata) -> Self {
        self.title = metadata.title;
        self.meta_description = metadata.meta_description;
        self.meta_keywords = metadata.meta_keywords;
        self.h1 = metadata.h1;
        self
    }

    pub fn with_text(mut self, text: String) -> Self {
        self.word_count = text.split_whitespace().count();
        self.text = text;
        self
    }

    pub fn is_duplicate(&self) -> bool {
        !self.duplicate_of.is_empty()
    }
}

/// Per-page SEO summary derived from a [`PageRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub url: String,
    pub title: Option<String>,
    pub title_length: usize,
    pub meta_description_length: usize,
    pub h1_count: usize,
    pub word_count: usize,
    pub outbound_links: usize,
    pub content_kind: ContentKind,
    pub is_duplicate: bool,
}

impl From<&PageRecord> for PageAnalysis {
    fn from(page: &PageRecord) -> Self {
        Self {
            url: page.url.clone(),
            title: page.title.clone(),
            title_length: page.title.as_deref().map_or(0, |t| t.chars().count()),
            meta_description_length: page
                .meta_description
                .as_deref()
                .map_or(0, |d| d.chars().count()),
            h1_count: page.h1.len(),
            word_count: page.word_count,
            outbound_links: page.links.len(),
            content_kind: page.content_kind,
            is_duplicate: page.is_duplicate(),
        }
    }
}

/// Session-level outcome of a crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub seed_url: String,
    pub status: CrawlStatus,
    pub pages: Vec<PageRecord>,
    pub page_analysis: Vec<PageAnalysis>,
    pub duplicate_content: Vec<DuplicateGroup>,
    #[serde(default)]
    pub broken_links: Vec<BrokenLink>,
    pub total_pages: usize,
    /// URLs ever admitted to the frontier, visited or not.
    pub total_links: usize,
    pub links_visited: Vec<String>,
    pub links_to_visit: Vec<String>,
    pub failed_urls: usize,
    pub crawl_time_seconds: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl CrawlResult {
    /// Plain JSON mapping for persistence or transmission.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn page(&self, url: &str) -> Option<&PageRecord> {
        self.pages.iter().find(|p| p.url == url)
    }

    pub fn duplicate_page_count(&self) -> usize {
        self.pages.iter().filter(|p| p.is_duplicate()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_record_builders() {
        let page = PageRecord::new(
            "https://example.com/".to_string(),
            "https://example.com/".to_string(),
            200,
        )
        .with_text("three little words".to_string())
        .with_metadata(PageMetadata {
            title: Some("Home".to_string()),
            h1: vec!["Welcome".to_string()],
            ..Default::default()
        });

        assert_eq!(page.word_count, 3);
        assert_eq!(page.title.as_deref(), Some("Home"));

        let analysis = PageAnalysis::from(&page);
        assert_eq!(analysis.title_length, 4);
        assert_eq!(analysis.h1_count, 1);
        assert!(!analysis.is_duplicate);
    }

    #[test]
    fn test_to_value_shape() {
        let now = Utc::now();
        let result = CrawlResult {
            seed_url: "https://example.com/".to_string(),
            status: CrawlStatus::Completed,
            pages: Vec::new(),
            page_analysis: Vec::new(),
            duplicate_content: vec![DuplicateGroup {
                fingerprint: ContentFingerprint(1),
                urls: vec!["a".to_string(), "b".to_string()],
            }],
            broken_links: Vec::new(),
            total_pages: 0,
            total_links: 1,
            links_visited: vec!["https://example.com/".to_string()],
            links_to_visit: Vec::new(),
            failed_urls: 1,
            crawl_time_seconds: 0.5,
            start_time: now,
            end_time: now,
        };

        let value = result.to_value().unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["total_pages"], 0);
        assert_eq!(value["duplicate_content"][0]["fingerprint"], "0000000000000001");
        assert!(value["page_analysis"].as_array().unwrap().is_empty());
        assert!(value["start_time"].is_string());
    }
}
