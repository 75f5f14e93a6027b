// Tests for database functionality

use sitewalk_core::data::{Database, SqliteLinkCache};
use sitewalk_scanner::link_check::{BrokenLink, LinkStatus, LinkStatusCache};
use sitewalk_scanner::result::{CrawlResult, CrawlStatus, PageRecord};
use sitewalk_scanner::{ContentFingerprint, ContentKind, CrawlConfig, DuplicateGroup};
use std::time::Duration;
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn seeds(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
}

fn page(url: &str, fingerprint: Option<u64>) -> PageRecord {
    let mut page = PageRecord::new(url.to_string(), url.to_string(), 200)
        .with_text("some words on a page".to_string());
    page.title = Some(format!("Title of {}", url));
    page.content_kind = ContentKind::Article;
    page.fingerprint = fingerprint.map(ContentFingerprint);
    page.links = vec!["https://example.com/".to_string()];
    page
}

fn sample_result() -> CrawlResult {
    let mut red = page("https://example.com/red", Some(42));
    let mut blue = page("https://example.com/blue", Some(42));
    red.duplicate_of = vec![blue.url.clone()];
    blue.duplicate_of = vec![red.url.clone()];
    let pages = vec![page("https://example.com/", Some(7)), red, blue];

    let mut result: CrawlResult = serde_json::from_value(serde_json::json!({
        "seed_url": "https://example.com/",
        "status": "completed",
        "pages": [],
        "page_analysis": [],
        "duplicate_content": [],
        "total_pages": 3,
        "total_links": 3,
        "links_visited": [],
        "links_to_visit": [],
        "failed_urls": 0,
        "crawl_time_seconds": 1.5,
        "start_time": "2024-01-01T00:00:00Z",
        "end_time": "2024-01-01T00:00:01Z"
    }))
    .unwrap();
    result.pages = pages;
    result.links_visited = vec![
        "https://example.com/".to_string(),
        "https://example.com/red".to_string(),
        "https://example.com/blue".to_string(),
        "https://example.com/gone".to_string(),
    ];
    result.links_to_visit = vec!["https://example.com/later".to_string()];
    result.failed_urls = 1;
    result.duplicate_content = vec![DuplicateGroup {
        fingerprint: ContentFingerprint(42),
        urls: vec![
            "https://example.com/red".to_string(),
            "https://example.com/blue".to_string(),
        ],
    }];
    result.broken_links = vec![BrokenLink {
        source_page: "https://example.com/".to_string(),
        broken_link: "https://example.com/gone".to_string(),
        status_code: 404,
        error: None,
    }];
    result
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(db_path.exists());
}

#[test]
fn test_database_exists_and_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    assert!(!Database::exists(&db_path));

    let db = Database::new(&db_path).unwrap();
    assert!(Database::exists(&db_path));
    drop(db);

    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let id = {
        let db = Database::new(&db_path).unwrap();
        db.create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
            .unwrap()
    };

    let db = Database::new(&db_path).unwrap();
    assert!(db.get_session(&id).unwrap().is_some());
}

// ============================================================================
// Session Tests
// ============================================================================

#[test]
fn test_create_session() {
    let (_temp_dir, db) = create_test_db();

    let session_id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();
    assert!(!session_id.is_empty());

    let session = db.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, "running");
    assert_eq!(session.seed_urls, vec!["https://example.com"]);
    assert!(session.end_time.is_none());
}

#[test]
fn test_session_stores_configuration() {
    let (_temp_dir, db) = create_test_db();
    let config = CrawlConfig {
        max_pages: 7,
        ..Default::default()
    };

    let id = db.create_session(&seeds(&["https://example.com"]), &config).unwrap();

    let raw: String = db
        .get_connection()
        .query_row(
            "SELECT configuration FROM crawl_sessions WHERE id = ?1",
            [&id],
            |row| row.get(0),
        )
        .unwrap();
    let stored: CrawlConfig = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored, config);
}

#[test]
fn test_create_multiple_sessions() {
    let (_temp_dir, db) = create_test_db();

    let session1 = db
        .create_session(&seeds(&["https://example1.com"]), &CrawlConfig::default())
        .unwrap();
    let session2 = db
        .create_session(&seeds(&["https://example2.com"]), &CrawlConfig::default())
        .unwrap();

    assert_ne!(session1, session2);
    assert_eq!(db.list_sessions().unwrap().len(), 2);
}

#[test]
fn test_finish_session() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();

    db.finish_session(&id, CrawlStatus::Aborted, 4, 1).unwrap();

    let session = db.get_session(&id).unwrap().unwrap();
    assert_eq!(session.status, "aborted");
    assert_eq!(session.total_pages, 4);
    assert_eq!(session.failed_urls, 1);
    assert!(session.end_time.is_some());
}

#[test]
fn test_fail_session() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();

    db.fail_session(&id).unwrap();
    assert_eq!(db.get_session(&id).unwrap().unwrap().status, "failed");
}

#[test]
fn test_get_unknown_session() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.get_session("no-such-session").unwrap().is_none());
}

#[test]
fn test_delete_session_cascades() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();
    db.save_result(&id, &sample_result()).unwrap();

    assert!(db.delete_session(&id).unwrap());
    assert!(db.get_pages_by_session(&id).unwrap().is_empty());
    assert!(db.get_broken_links_by_session(&id).unwrap().is_empty());
    assert!(db.get_results_by_session(&id).unwrap().is_empty());
    assert!(!db.delete_session(&id).unwrap());
}

// ============================================================================
// Page Storage Tests
// ============================================================================

#[test]
fn test_save_result() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();

    let saved = db.save_result(&id, &sample_result()).unwrap();
    assert_eq!(saved, 3);

    let pages = db.get_pages_by_session(&id).unwrap();
    assert_eq!(pages.len(), 3);
    assert_eq!(pages[0].url, "https://example.com/");
    assert_eq!(pages[0].content_kind, "article");
    assert_eq!(pages[0].word_count, 5);
    assert_eq!(pages[0].fingerprint.as_deref(), Some("0000000000000007"));

    let red = pages.iter().find(|p| p.url.ends_with("/red")).unwrap();
    assert_eq!(red.duplicate_of, vec!["https://example.com/blue"]);
}

#[test]
fn test_result_summary_round_trip() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();
    let result = sample_result();
    db.save_result(&id, &result).unwrap();

    let stored = db.get_results_by_session(&id).unwrap();
    assert_eq!(stored.len(), 1);
    let stored = &stored[0];
    assert_eq!(stored.seed_url, "https://example.com/");
    assert_eq!(stored.status, "completed");
    assert_eq!(stored.total_pages, 3);
    assert_eq!(stored.total_links, 3);
    assert_eq!(stored.failed_urls, 1);
    assert_eq!(stored.links_visited, result.links_visited);
    assert_eq!(stored.links_to_visit, vec!["https://example.com/later"]);
    assert_eq!(stored.crawl_time_seconds, 1.5);
    assert_eq!(stored.duplicate_content, result.duplicate_content);
    assert_eq!(stored.start_time, result.start_time.timestamp());
    assert_eq!(stored.end_time - stored.start_time, 1);
}

#[test]
fn test_results_are_kept_per_seed() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(
            &seeds(&["https://example.com", "https://example.org"]),
            &CrawlConfig::default(),
        )
        .unwrap();

    let first = sample_result();
    let mut second = sample_result();
    second.seed_url = "https://example.org/".to_string();
    second.status = CrawlStatus::Aborted;
    db.save_result(&id, &first).unwrap();
    db.save_result(&id, &second).unwrap();
    db.save_result(&id, &first).unwrap();

    let stored = db.get_results_by_session(&id).unwrap();
    let summary: Vec<(&str, &str)> = stored
        .iter()
        .map(|r| (r.seed_url.as_str(), r.status.as_str()))
        .collect();
    assert_eq!(summary.len(), 2);
    assert!(summary.contains(&("https://example.com/", "completed")));
    assert!(summary.contains(&("https://example.org/", "aborted")));
}

#[test]
fn test_save_result_is_idempotent_per_url() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();

    db.save_result(&id, &sample_result()).unwrap();
    db.save_result(&id, &sample_result()).unwrap();

    assert_eq!(db.get_pages_by_session(&id).unwrap().len(), 3);
    assert_eq!(db.get_broken_links_by_session(&id).unwrap().len(), 1);
}

#[test]
fn test_pages_are_scoped_to_session() {
    let (_temp_dir, db) = create_test_db();
    let first = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();
    let second = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();

    db.save_result(&first, &sample_result()).unwrap();

    assert_eq!(db.get_pages_by_session(&first).unwrap().len(), 3);
    assert!(db.get_pages_by_session(&second).unwrap().is_empty());
}

#[test]
fn test_broken_links_round_trip() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();
    db.save_result(&id, &sample_result()).unwrap();

    let links = db.get_broken_links_by_session(&id).unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].broken_link, "https://example.com/gone");
    assert_eq!(links[0].status_code, 404);
    assert!(links[0].error.is_none());
}

#[test]
fn test_duplicate_fingerprints() {
    let (_temp_dir, db) = create_test_db();
    let id = db
        .create_session(&seeds(&["https://example.com"]), &CrawlConfig::default())
        .unwrap();
    db.save_result(&id, &sample_result()).unwrap();

    let groups = db.get_duplicate_fingerprints(&id).unwrap();
    assert_eq!(groups, vec![(ContentFingerprint(42).to_string(), 2)]);
}

// ============================================================================
// Link Cache Tests
// ============================================================================

#[test]
fn test_link_cache_hit() {
    let temp_dir = TempDir::new().unwrap();
    let cache = SqliteLinkCache::open(&temp_dir.path().join("test.db")).unwrap();

    assert!(cache.get("https://example.com/a").is_none());

    cache.set(
        "https://example.com/a",
        &LinkStatus::ok(200),
        Duration::from_secs(3600),
    );
    assert_eq!(cache.get("https://example.com/a"), Some(LinkStatus::ok(200)));
}

#[test]
fn test_link_cache_stores_failures() {
    let temp_dir = TempDir::new().unwrap();
    let cache = SqliteLinkCache::open(&temp_dir.path().join("test.db")).unwrap();

    let failure = LinkStatus::failed("connection refused");
    cache.set("https://example.com/b", &failure, Duration::from_secs(3600));

    let cached = cache.get("https://example.com/b").unwrap();
    assert!(cached.is_broken());
    assert_eq!(cached.error.as_deref(), Some("connection refused"));
}

#[test]
fn test_link_cache_expiry() {
    let temp_dir = TempDir::new().unwrap();
    let cache = SqliteLinkCache::open(&temp_dir.path().join("test.db")).unwrap();

    cache.set("https://example.com/c", &LinkStatus::ok(200), Duration::ZERO);
    assert!(cache.get("https://example.com/c").is_none());
    assert_eq!(cache.purge_expired().unwrap(), 1);
}

#[test]
fn test_link_cache_persists_across_opens() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");

    {
        let cache = SqliteLinkCache::open(&path).unwrap();
        cache.set("https://example.com/d", &LinkStatus::ok(301), Duration::from_secs(3600));
    }

    let cache = SqliteLinkCache::open(&path).unwrap();
    assert_eq!(cache.get("https://example.com/d"), Some(LinkStatus::ok(301)));
}
