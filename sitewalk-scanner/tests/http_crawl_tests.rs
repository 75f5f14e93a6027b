// Crawls against a live mock HTTP server through the reqwest fetcher

use sitewalk_scanner::{CrawlConfig, CrawlStatus, ContentKind, Crawler, LinkChecker, LinkCheckerConfig};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_bytes(body.into_bytes()),
        )
        .mount(server)
        .await;
}

fn fast_config() -> CrawlConfig {
    CrawlConfig {
        crawl_delay: 0.0,
        min_domain_interval: 0.0,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_crawl_site_over_http() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200)
                .insert_header("content-type", "text/plain")
                .set_body_bytes(b"User-agent: *\nDisallow: /private\n".as_slice()))
        .mount(&mock_server)
        .await;

    mount_html(
        &mock_server,
        "/",
        format!(
            r#"<html><head><title>Bakery</title>
                <meta name="description" content="Fresh bread daily">
                <meta name="keywords" content="bread, cakes">
            </head><body>
                <h1>Welcome</h1>
                <a href="{}/blog/sourdough">Sourdough</a>
                <a href="/contact">Contact</a>
                <a href="/private/stock">Stock</a>
                <a href="/menu.pdf">Menu</a>
            </body></html>"#,
            base
        ),
    )
    .await;
    mount_html(
        &mock_server,
        "/blog/sourdough",
        "<html><body><article><h1>Sourdough</h1><p>Start with a starter.</p></article></body></html>".to_string(),
    )
    .await;
    mount_html(
        &mock_server,
        "/contact",
        r#"<html><body><main><p>Call us.</p><a href="/missing">Old page</a></main></body></html>"#.to_string(),
    )
    .await;

    let crawler = Crawler::new(fast_config()).with_http_fetcher().unwrap();
    let result = crawler.crawl(&base).await.unwrap();

    assert_eq!(result.status, CrawlStatus::Completed);
    assert_eq!(result.total_pages, 3);

    let home = result.page(&format!("{}/", base)).unwrap();
    assert_eq!(home.title.as_deref(), Some("Bakery"));
    assert_eq!(home.meta_description.as_deref(), Some("Fresh bread daily"));
    assert_eq!(home.meta_keywords, vec!["bread", "cakes"]);
    assert_eq!(home.h1, vec!["Welcome"]);
    assert_eq!(home.content_kind, ContentKind::Homepage);
    assert_eq!(home.status_code, 200);

    let post = result.page(&format!("{}/blog/sourdough", base)).unwrap();
    assert_eq!(post.content_kind, ContentKind::Article);
    assert_eq!(post.depth, 1);
    assert_eq!(post.text, "Sourdough Start with a starter.");

    let contact = result.page(&format!("{}/contact", base)).unwrap();
    assert_eq!(contact.content_kind, ContentKind::Contact);

    assert!(result.page(&format!("{}/private/stock", base)).is_none());
    // /missing is a 404
    assert_eq!(result.failed_urls, 1);
    assert_eq!(result.page_analysis.len(), 3);
}

#[tokio::test]
async fn test_broken_links_found_after_crawl() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    mount_html(
        &mock_server,
        "/",
        r#"<html><body><a href="/gone">Gone</a><a href="/here">Here</a></body></html>"#.to_string(),
    )
    .await;
    mount_html(&mock_server, "/here", "<p>Here</p>".to_string()).await;
    Mock::given(method("HEAD"))
        .and(path("/here"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(CrawlConfig {
        respect_robots_txt: false,
        ..fast_config()
    })
    .with_http_fetcher()
    .unwrap();
    let result = crawler.crawl(&base).await.unwrap();

    let checker = LinkChecker::new(LinkCheckerConfig::default()).unwrap();
    let broken = checker.check_pages(&result.pages).await;

    assert_eq!(broken.len(), 1);
    assert_eq!(broken[0].broken_link, format!("{}/gone", base));
    assert_eq!(broken[0].source_page, format!("{}/", base));
    assert_eq!(broken[0].status_code, 404);
}
