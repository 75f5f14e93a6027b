use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Sitewalk/0.1 (+https://github.com/trapdoorsec/sitewalk)";

/// A fetched document. Any HTTP status is a successful fetch at this level;
/// callers decide what a 404 or 429 means.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status_code: u16,
    pub html: String,
    /// URL after redirects.
    pub final_url: Url,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
}

impl FetchResponse {
    pub fn new(status_code: u16, html: impl Into<String>, final_url: Url) -> Self {
        Self {
            status_code,
            html: html.into(),
            final_url,
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// A response without a content type is assumed to be HTML.
    pub fn is_html(&self) -> bool {
        self.content_type().is_none_or(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml")
        })
    }
}

/// Page-fetching capability the crawler is driven by.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_redirects: usize,
    /// Extra attempts after a transport-level failure.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 5,
            max_retries: 1,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// reqwest-backed [`PageFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .gzip(true)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpFetcherConfig {
        &self.config
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn fetch_once(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.config.timeout)
            } else {
                FetchError::Http(e)
            }
        })?;

        let status_code = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let html = response.text().await?;

        Ok(FetchResponse {
            status_code,
            html,
            final_url,
            headers,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let mut attempt = 0;
        loop {
            debug!("Fetching {} (attempt {})", url, attempt + 1);
            match self.fetch_once(url).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!("Fetch of {} failed, retrying: {}", url, e);
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpFetcherConfig {
            max_retries: 0,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("user-agent", DEFAULT_USER_AGENT))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_bytes(b"<html><body>Hi</body></html>"),
            )
            .mount(&mock_server)
            .await;

        let url = Url::parse(&mock_server.uri()).unwrap();
        let response = fetcher().fetch(&url).await.unwrap();

        assert_eq!(response.status_code, 200);
        assert!(response.is_success());
        assert!(response.is_html());
        assert!(response.html.contains("Hi"));
        assert_eq!(response.header("Content-Type"), Some("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_returned() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/missing", mock_server.uri())).unwrap();
        let response = fetcher().fetch(&url).await.unwrap();
        assert_eq!(response.status_code, 404);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_redirect_sets_final_url() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301)
                    .insert_header("location", format!("{}/new", mock_server.uri()).as_str()),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_bytes(b"moved"),
            )
            .mount(&mock_server)
            .await;

        let url = Url::parse(&format!("{}/old", mock_server.uri())).unwrap();
        let response = fetcher().fetch(&url).await.unwrap();
        assert_eq!(response.final_url.path(), "/new");
        assert_eq!(response.html, "moved");
    }

    #[tokio::test]
    async fn test_transport_error() {
        // Nothing listens on port 9 in the test environment.
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        assert!(fetcher().fetch(&url).await.is_err());
    }

    #[test]
    fn test_is_html() {
        let url = Url::parse("https://example.com/").unwrap();
        assert!(FetchResponse::new(200, "", url.clone()).is_html());
        assert!(
            !FetchResponse::new(200, "", url.clone())
                .with_header("Content-Type", "application/pdf")
                .is_html()
        );
        assert!(
            FetchResponse::new(200, "", url)
                .with_header("content-type", "application/xhtml+xml")
                .is_html()
        );
    }
}
