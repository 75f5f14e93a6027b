use rusqlite::{Connection, OptionalExtension, Result, params};
use serde::{Deserialize, Serialize};
use sitewalk_scanner::link_check::{BrokenLink, LinkStatus, LinkStatusCache};
use sitewalk_scanner::result::{CrawlResult, CrawlStatus, PageRecord};
use sitewalk_scanner::{CrawlConfig, DuplicateGroup};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

pub struct Database {
    conn: Connection,
}

/// One row of `crawl_sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub seed_urls: Vec<String>,
    pub total_pages: i64,
    pub failed_urls: i64,
}

/// A crawled page as read back from `crawl_pages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPage {
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub title: Option<String>,
    pub content_kind: String,
    pub depth: i64,
    pub word_count: i64,
    pub fingerprint: Option<String>,
    pub duplicate_of: Vec<String>,
}

/// The per-seed summary of a crawl, as read back from `crawl_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub seed_url: String,
    pub status: String,
    pub total_pages: i64,
    pub total_links: i64,
    pub failed_urls: i64,
    pub links_visited: Vec<String>,
    pub links_to_visit: Vec<String>,
    pub crawl_time_seconds: f64,
    pub duplicate_content: Vec<DuplicateGroup>,
    pub start_time: i64,
    pub end_time: i64,
}

pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl Database {
    pub fn drop(path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'aborted', 'failed')),
    seed_urls TEXT NOT NULL,      -- JSON array
    configuration TEXT,           -- JSON CrawlConfig
    total_pages INTEGER NOT NULL DEFAULT 0,
    failed_urls INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS crawl_pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    url TEXT NOT NULL,
    final_url TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    title TEXT,
    meta_description TEXT,
    h1 TEXT,                      -- JSON array
    content_kind TEXT NOT NULL,
    depth INTEGER NOT NULL DEFAULT 0,
    word_count INTEGER NOT NULL DEFAULT 0,
    fingerprint TEXT,
    duplicate_of TEXT NOT NULL DEFAULT '[]',   -- JSON array
    links TEXT NOT NULL DEFAULT '[]',          -- JSON array
    fetched_at INTEGER NOT NULL,

    FOREIGN KEY(session_id) REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_pages_session ON crawl_pages(session_id);

-- One row per seed crawled in a session
CREATE TABLE IF NOT EXISTS crawl_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    seed_url TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('completed', 'aborted', 'failed')),
    total_pages INTEGER NOT NULL DEFAULT 0,
    total_links INTEGER NOT NULL DEFAULT 0,
    failed_urls INTEGER NOT NULL DEFAULT 0,
    links_visited TEXT NOT NULL DEFAULT '[]',      -- JSON array
    links_to_visit TEXT NOT NULL DEFAULT '[]',     -- JSON array
    crawl_time_seconds REAL NOT NULL DEFAULT 0,
    duplicate_content TEXT NOT NULL DEFAULT '[]',  -- JSON array of groups
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,

    FOREIGN KEY(session_id) REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, seed_url)
);

CREATE INDEX IF NOT EXISTS idx_results_session ON crawl_results(session_id);
CREATE INDEX IF NOT EXISTS idx_pages_fingerprint ON crawl_pages(fingerprint);

CREATE TABLE IF NOT EXISTS broken_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    source_page TEXT NOT NULL,
    broken_link TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    error TEXT,

    FOREIGN KEY(session_id) REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, broken_link)
);

CREATE INDEX IF NOT EXISTS idx_broken_links_session ON broken_links(session_id);

-- Link-check cache shared across sessions
CREATE TABLE IF NOT EXISTS link_status (
    url TEXT PRIMARY KEY,
    status_code INTEGER NOT NULL,
    error TEXT,
    checked_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
            ",
        )?;
        Ok(())
    }

    // Session management
    pub fn create_session(&self, seed_urls: &[String], config: &CrawlConfig) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO crawl_sessions (id, start_time, status, seed_urls, configuration) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &session_id,
                timestamp,
                CrawlStatus::Running.as_str(),
                to_json(seed_urls)?,
                to_json(config)?
            ],
        )?;

        Ok(session_id)
    }

    /// Closes a session with its terminal status and page counts.
    pub fn finish_session(
        &self,
        session_id: &str,
        status: CrawlStatus,
        total_pages: usize,
        failed_urls: usize,
    ) -> Result<()> {
        let timestamp = current_timestamp();
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2, total_pages = ?3, failed_urls = ?4 WHERE id = ?5",
            params![
                status.as_str(),
                timestamp,
                total_pages as i64,
                failed_urls as i64,
                session_id
            ],
        )?;
        Ok(())
    }

    pub fn fail_session(&self, session_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2 WHERE id = ?3",
            params![CrawlStatus::Failed.as_str(), current_timestamp(), session_id],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, start_time, end_time, status, seed_urls, total_pages, failed_urls
             FROM crawl_sessions WHERE id = ?1",
        )?;
        stmt.query_row(params![session_id], Self::session_from_row)
            .optional()
    }

    /// Most recent first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, start_time, end_time, status, seed_urls, total_pages, failed_urls
             FROM crawl_sessions ORDER BY start_time DESC, rowid DESC",
        )?;

        let sessions = stmt
            .query_map([], Self::session_from_row)?
            .collect::<Result<Vec<_>>>()?;

        Ok(sessions)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM crawl_sessions WHERE id = ?1", params![session_id])?;
        Ok(removed > 0)
    }

    fn session_from_row(row: &rusqlite::Row<'_>) -> Result<SessionSummary> {
        let seeds: String = row.get(4)?;
        Ok(SessionSummary {
            id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            status: row.get(3)?,
            seed_urls: from_json_list(&seeds),
            total_pages: row.get(5)?,
            failed_urls: row.get(6)?,
        })
    }

    // Page storage
    pub fn insert_page(&self, session_id: &str, page: &PageRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT OR REPLACE INTO crawl_pages (
                session_id, url, final_url, status_code, title, meta_description, h1,
                content_kind, depth, word_count, fingerprint, duplicate_of, links, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                session_id,
                &page.url,
                &page.final_url,
                page.status_code,
                &page.title,
                &page.meta_description,
                to_json(&page.h1)?,
                page.content_kind.as_str(),
                page.depth as i64,
                page.word_count as i64,
                page.fingerprint.map(|f| f.to_string()),
                to_json(&page.duplicate_of)?,
                to_json(&page.links)?,
                page.fetched_at.timestamp(),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_broken_link(&self, session_id: &str, link: &BrokenLink) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO broken_links (session_id, source_page, broken_link, status_code, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                &link.source_page,
                &link.broken_link,
                link.status_code,
                &link.error
            ],
        )?;
        Ok(())
    }

    /// Writes the result's summary row: counts, frontier, timing and
    /// duplicate groups.
    pub fn insert_result_summary(&self, session_id: &str, result: &CrawlResult) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO crawl_results (
                session_id, seed_url, status, total_pages, total_links, failed_urls,
                links_visited, links_to_visit, crawl_time_seconds, duplicate_content,
                start_time, end_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                session_id,
                &result.seed_url,
                result.status.as_str(),
                result.total_pages as i64,
                result.total_links as i64,
                result.failed_urls as i64,
                to_json(&result.links_visited)?,
                to_json(&result.links_to_visit)?,
                result.crawl_time_seconds,
                to_json(&result.duplicate_content)?,
                result.start_time.timestamp(),
                result.end_time.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Stores a result's summary, pages and broken links in one
    /// transaction. Returns the number of pages written.
    pub fn save_result(&self, session_id: &str, result: &CrawlResult) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        self.insert_result_summary(session_id, result)?;
        for page in &result.pages {
            self.insert_page(session_id, page)?;
        }
        for link in &result.broken_links {
            self.insert_broken_link(session_id, link)?;
        }
        tx.commit()?;

        debug!(
            "Saved {} pages and {} broken links for session {}",
            result.pages.len(),
            result.broken_links.len(),
            session_id
        );
        Ok(result.pages.len())
    }

    /// Result summaries of a session in the order they were saved.
    pub fn get_results_by_session(&self, session_id: &str) -> Result<Vec<StoredResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT seed_url, status, total_pages, total_links, failed_urls, links_visited,
                    links_to_visit, crawl_time_seconds, duplicate_content, start_time, end_time
             FROM crawl_results WHERE session_id = ?1 ORDER BY id",
        )?;

        let results = stmt
            .query_map(params![session_id], |row| {
                let visited: String = row.get(5)?;
                let to_visit: String = row.get(6)?;
                let duplicates: String = row.get(8)?;
                Ok(StoredResult {
                    seed_url: row.get(0)?,
                    status: row.get(1)?,
                    total_pages: row.get(2)?,
                    total_links: row.get(3)?,
                    failed_urls: row.get(4)?,
                    links_visited: from_json_list(&visited),
                    links_to_visit: from_json_list(&to_visit),
                    crawl_time_seconds: row.get(7)?,
                    duplicate_content: serde_json::from_str(&duplicates).unwrap_or_default(),
                    start_time: row.get(9)?,
                    end_time: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(results)
    }

    pub fn get_pages_by_session(&self, session_id: &str) -> Result<Vec<StoredPage>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, final_url, status_code, title, content_kind, depth, word_count, fingerprint, duplicate_of
             FROM crawl_pages WHERE session_id = ?1 ORDER BY id",
        )?;

        let pages = stmt
            .query_map(params![session_id], |row| {
                let duplicates: String = row.get(8)?;
                Ok(StoredPage {
                    url: row.get(0)?,
                    final_url: row.get(1)?,
                    status_code: row.get(2)?,
                    title: row.get(3)?,
                    content_kind: row.get(4)?,
                    depth: row.get(5)?,
                    word_count: row.get(6)?,
                    fingerprint: row.get(7)?,
                    duplicate_of: from_json_list(&duplicates),
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(pages)
    }

    pub fn get_broken_links_by_session(&self, session_id: &str) -> Result<Vec<BrokenLink>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_page, broken_link, status_code, error
             FROM broken_links WHERE session_id = ?1 ORDER BY broken_link",
        )?;

        let links = stmt
            .query_map(params![session_id], |row| {
                Ok(BrokenLink {
                    source_page: row.get(0)?,
                    broken_link: row.get(1)?,
                    status_code: row.get(2)?,
                    error: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(links)
    }

    /// Fingerprints shared by more than one page of the session, with the
    /// URLs carrying them.
    pub fn get_duplicate_fingerprints(&self, session_id: &str) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT fingerprint, COUNT(*) FROM crawl_pages
             WHERE session_id = ?1 AND fingerprint IS NOT NULL
             GROUP BY fingerprint HAVING COUNT(*) > 1
             ORDER BY fingerprint",
        )?;

        let groups = stmt
            .query_map(params![session_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>>>()?;

        Ok(groups)
    }

    pub fn get_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

/// [`LinkStatusCache`] stored in the `link_status` table, so link checks
/// survive between runs.
pub struct SqliteLinkCache {
    conn: Mutex<Connection>,
}

impl SqliteLinkCache {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::new(path)?;
        Ok(Self {
            conn: Mutex::new(db.into_connection()),
        })
    }

    fn lookup(&self, key: &str) -> Result<Option<LinkStatus>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.query_row(
            "SELECT status_code, error FROM link_status WHERE url = ?1 AND expires_at > ?2",
            params![key, current_timestamp()],
            |row| {
                Ok(LinkStatus {
                    status_code: row.get(0)?,
                    error: row.get(1)?,
                })
            },
        )
        .optional()
    }

    fn store(&self, key: &str, value: &LinkStatus, ttl: Duration) -> Result<()> {
        let now = current_timestamp();
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR REPLACE INTO link_status (url, status_code, error, checked_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                value.status_code,
                &value.error,
                now,
                now.saturating_add(ttl.as_secs() as i64)
            ],
        )?;
        Ok(())
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "DELETE FROM link_status WHERE expires_at <= ?1",
            params![current_timestamp()],
        )
    }
}

impl LinkStatusCache for SqliteLinkCache {
    fn get(&self, key: &str) -> Option<LinkStatus> {
        match self.lookup(key) {
            Ok(status) => status,
            Err(e) => {
                warn!("Link cache lookup for {} failed: {}", key, e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &LinkStatus, ttl: Duration) {
        if let Err(e) = self.store(key, value, ttl) {
            warn!("Link cache write for {} failed: {}", key, e);
        }
    }
}
