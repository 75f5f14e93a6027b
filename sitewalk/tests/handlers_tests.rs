use sitewalk::handlers::*;
use sitewalk_core::data::Database;
use sitewalk_scanner::result::CrawlStatus;
use sitewalk_scanner::CrawlConfig;
use std::io::Write;
use std::path::PathBuf;
use tempfile::{NamedTempFile, TempDir};
use url::Url;

// ============================================================================
// URL Loading Tests
// ============================================================================

#[test]
fn test_parse_url_line_with_scheme() {
    let result = parse_url_line("https://example.com");
    assert_eq!(result, Some("https://example.com".to_string()));
}

#[test]
fn test_parse_url_line_without_scheme() {
    let result = parse_url_line("example.com");
    assert_eq!(result, Some("https://example.com".to_string()));
}

#[test]
fn test_parse_url_line_host_and_port() {
    let result = parse_url_line("localhost:8080/docs");
    assert_eq!(result, Some("https://localhost:8080/docs".to_string()));
}

#[test]
fn test_parse_url_line_invalid() {
    let result = parse_url_line("not a valid url!!!");
    assert_eq!(result, None);
}

#[test]
fn test_extract_url_path() {
    assert_eq!(extract_url_path("https://example.com/blog/post"), "/blog/post");
    assert_eq!(extract_url_path("https://example.com/"), "/");
    assert_eq!(extract_url_path("https://example.com"), "/");
}

#[test]
fn test_load_urls_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "https://example.com")?;
    writeln!(temp_file, "shop.example.org")?;
    writeln!(temp_file)?; // Empty line
    writeln!(temp_file, "# staging hosts")?;
    writeln!(temp_file, "  https://blog.example.com  ")?;

    let path = PathBuf::from(temp_file.path());
    let urls = load_urls_from_file(&path)?;

    assert_eq!(
        urls,
        vec![
            "https://example.com",
            "https://shop.example.org",
            "https://blog.example.com"
        ]
    );

    Ok(())
}

#[test]
fn test_load_urls_from_file_empty() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file).unwrap();
    writeln!(temp_file, "   ").unwrap();

    let path = PathBuf::from(temp_file.path());
    let result = load_urls_from_file(&path);

    assert!(result.is_err());
    assert!(result.unwrap_err().contains("No valid URLs"));
}

#[test]
fn test_load_urls_from_missing_file() {
    let result = load_urls_from_file(&PathBuf::from("/definitely/not/here.txt"));
    assert!(result.unwrap_err().contains("Failed to read hosts file"));
}

#[test]
fn test_load_urls_from_source_single_url() {
    let url = Url::parse("https://example.com").unwrap();
    let result = load_urls_from_source(Some(&url), None).unwrap();

    assert_eq!(result, vec!["https://example.com/"]);
}

#[test]
fn test_load_urls_from_source_no_input() {
    let result = load_urls_from_source(None, None);
    assert!(
        result
            .unwrap_err()
            .contains("Either --url or --hosts-file must be provided")
    );
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_database_path_expands_home() {
    let path = database_path("~/.config/sitewalk/");
    assert!(path.ends_with(".config/sitewalk/sitewalk.db"));
    assert!(!path.to_string_lossy().starts_with('~'));
}

#[test]
fn test_load_config_file_partial() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    write!(temp_file, r#"{{"max_pages": 25, "respect_robots_txt": false}}"#)?;

    let config = load_config_file(temp_file.path())?;
    assert_eq!(config.max_pages, 25);
    assert!(!config.respect_robots_txt);
    assert_eq!(config.max_concurrent, CrawlConfig::default().max_concurrent);
    Ok(())
}

#[test]
fn test_load_config_file_invalid_json() {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "max_pages = 25").unwrap();

    let err = load_config_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid crawl configuration"));
}

// ============================================================================
// Session Formatting Tests
// ============================================================================

#[test]
fn test_format_empty_session_list() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

    assert_eq!(format_session_list(&db).unwrap(), "No sessions recorded.\n");
}

#[test]
fn test_format_session_list_and_detail() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    let seeds = vec!["https://example.com/".to_string()];
    let id = db.create_session(&seeds, &CrawlConfig::default()).unwrap();
    db.finish_session(&id, CrawlStatus::Completed, 0, 1).unwrap();

    let list = format_session_list(&db).unwrap();
    assert!(list.contains(&id));
    assert!(list.contains("completed"));
    assert!(list.contains("https://example.com/"));

    let detail = format_session_detail(&db, &id).unwrap();
    assert!(detail.contains(&format!("# Session {}", id)));
    assert!(detail.contains("Pages: 0 (1 failed)"));
}

#[test]
fn test_format_session_detail_shows_result_summary() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    let seeds = vec!["https://example.com/".to_string()];
    let id = db.create_session(&seeds, &CrawlConfig::default()).unwrap();

    let result: sitewalk_scanner::CrawlResult = serde_json::from_value(serde_json::json!({
        "seed_url": "https://example.com/",
        "status": "aborted",
        "pages": [],
        "page_analysis": [],
        "duplicate_content": [],
        "total_pages": 0,
        "total_links": 3,
        "links_visited": ["https://example.com/"],
        "links_to_visit": ["https://example.com/a", "https://example.com/b"],
        "failed_urls": 1,
        "crawl_time_seconds": 2.3,
        "start_time": "2024-01-01T00:00:00Z",
        "end_time": "2024-01-01T00:00:02Z"
    }))
    .unwrap();
    db.save_result(&id, &result).unwrap();

    let detail = format_session_detail(&db, &id).unwrap();
    assert!(detail.contains(
        "aborted https://example.com/: 1 visited, 2 queued, 0 duplicate groups, 2.3s"
    ));
}

#[test]
fn test_format_unknown_session() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

    assert!(format_session_detail(&db, "missing").is_err());
}
