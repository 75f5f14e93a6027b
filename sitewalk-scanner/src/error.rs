use std::time::Duration;
use thiserror::Error;

/// Errors raised while fetching a single page.
///
/// All of these are per-URL: the scheduler logs them and drops the URL.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Not an HTML document: {0}")]
    NotHtml(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// No extraction strategy produced any text.
    #[error("No extractable content")]
    NoContent,

    #[error("Malformed sitemap: {0}")]
    InvalidSitemap(String),
}

/// Errors that stop a crawl before it starts. Everything that goes wrong
/// with a single URL is a [`FetchError`] or [`ExtractError`] and is logged,
/// and cancellation ends a run with an `Aborted` result instead of an error.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CrawlError>;
