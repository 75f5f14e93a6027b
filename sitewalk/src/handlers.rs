use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use sitewalk_core::data::{Database, SqliteLinkCache};
use sitewalk_scanner::{CancellationToken, CrawlConfig};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

pub const DATABASE_FILE: &str = "sitewalk.db";

// Re-export crawl types and functions from sitewalk-core
pub use sitewalk_core::crawl::{
    CrawlOptions, CrawlProgressCallback, execute_crawl, extract_url_path, generate_crawl_report,
};

/// Install the global `tracing` subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

// Helper functions for crawl handler

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&Url>,
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file. Blank lines and `#` comments are skipped.
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, adding https:// if it has no scheme
pub fn parse_url_line(line: &str) -> Option<String> {
    if let Ok(url) = Url::parse(line)
        && url.has_host()
        && matches!(url.scheme(), "http" | "https")
    {
        return Some(line.to_string());
    }

    let with_scheme = format!("https://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some_and(|h| !h.is_empty())
    {
        return Some(with_scheme);
    }

    warn!("Skipping invalid URL '{}'", line);
    None
}

/// Expand `~` in a configured directory and return the database path in it.
pub fn database_path(dir: &str) -> PathBuf {
    let expanded = shellexpand::tilde(dir);
    Path::new(expanded.as_ref()).join(DATABASE_FILE)
}

/// Read a JSON [`CrawlConfig`]; missing fields take their defaults.
pub fn load_config_file(path: &Path) -> Result<CrawlConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: CrawlConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid crawl configuration in {}", path.display()))?;
    Ok(config)
}

/// Build the crawl configuration from `--config` and the crawl flags.
pub fn crawl_config_from_args(args: &ArgMatches) -> Result<CrawlConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => load_config_file(path)?,
        None => CrawlConfig::default(),
    };

    if let Some(max_pages) = args.get_one::<usize>("max-pages") {
        config.max_pages = *max_pages;
    }
    if let Some(workers) = args.get_one::<usize>("workers") {
        config.max_concurrent = *workers;
    }
    if let Some(delay) = args.get_one::<f64>("delay") {
        config.crawl_delay = *delay;
    }
    if let Some(interval) = args.get_one::<f64>("domain-interval") {
        config.min_domain_interval = *interval;
    }
    if let Some(depth) = args.get_one::<usize>("max-depth") {
        config.max_depth = Some(*depth);
    }
    if let Some(agent) = args.get_one::<String>("user-agent") {
        config.user_agent = agent.clone();
    }
    if args.get_flag("no-robots") {
        config.respect_robots_txt = false;
    }
    if args.get_flag("strip-tracking") {
        config.strip_tracking_params = true;
    }
    if args.get_flag("sitemaps") {
        config.use_sitemaps = true;
    }

    config
        .validate()
        .map_err(|e| anyhow!("Invalid crawl configuration: {}", e))?;
    Ok(config)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  SITEWALK INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let dir = args
        .get_one::<String>("PATH")
        .context("missing database directory")?;
    let force = args.get_flag("force");
    let db_path = database_path(dir);
    let config_dir = db_path
        .parent()
        .context("Invalid database path")?
        .to_path_buf();

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );
    println!();

    if Database::exists(&db_path) {
        if !force {
            println!("{}", "⚠ WARNING".yellow().bold());
            println!(
                "A database already exists at {}",
                db_path.display().to_string().bright_white()
            );
            println!("{}", "This operation will delete all recorded sessions.".yellow());

            let response = print_prompt("Do you want to continue? [y/N]:")?;
            println!();
            if response != "y" && response != "yes" {
                println!("{} Initialization cancelled.", "✗".red().bold());
                return Ok(());
            }
        }
        Database::drop(&db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Removed existing database", "✓".green().bold());
    }

    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    Database::new(&db_path)
        .with_context(|| format!("Failed to create database at {}", db_path.display()))?;

    println!("{} Sitewalk initialization complete!", "✓".green().bold());
    println!("{} Database: {}", "✓".green().bold(), db_path.display());
    Ok(())
}

/// Open the session database, creating its directory on first use.
fn open_database(dir: &str) -> Result<(PathBuf, Database)> {
    let db_path = database_path(dir);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = Database::new(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    Ok((db_path, db))
}

pub async fn handle_crawl(sub_matches: &ArgMatches, quiet: bool) -> Result<()> {
    let url = sub_matches.get_one::<Url>("url");
    let hosts_file = sub_matches.get_one::<PathBuf>("hosts-file");
    let json = sub_matches.get_flag("json");
    let save = !sub_matches.get_flag("no-save");

    let urls = load_urls_from_source(url, hosts_file).map_err(|e| anyhow!(e))?;
    let config = crawl_config_from_args(sub_matches)?;

    let db_dir = sub_matches
        .get_one::<String>("db")
        .context("missing database directory")?;
    let storage = if save {
        Some(open_database(db_dir)?)
    } else {
        None
    };

    if !quiet {
        println!("\n🕷️  Crawling {} host(s)", urls.len());
        println!("Max pages: {}", config.max_pages);
        println!("Workers: {}", config.max_concurrent);
        println!(
            "Max depth: {}",
            config
                .max_depth
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unlimited".to_string())
        );
        println!("Robots.txt: {}\n", if config.respect_robots_txt { "respected" } else { "ignored" });
    }

    let session_id = match &storage {
        Some((_, db)) => Some(db.create_session(&urls, &config)?),
        None => None,
    };

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Interrupted, finishing up...", "!".yellow().bold());
            ctrl_c_token.cancel();
        }
    });

    let mut options = CrawlOptions::new(urls, config);
    options.check_links = sub_matches.get_flag("check-links");
    options.check_external = sub_matches.get_flag("check-external");
    options.show_progress_bars = !quiet && !json;
    if options.check_links
        && let Some((db_path, _)) = &storage
    {
        options.link_cache = Some(Arc::new(SqliteLinkCache::open(db_path)?));
    }

    let progress_callback: Option<CrawlProgressCallback> = if quiet {
        None
    } else {
        Some(Arc::new(|msg: String| eprintln!("{}", msg)))
    };

    let all_results = match execute_crawl(options, progress_callback, cancel).await {
        Ok(results) => results,
        Err(e) => {
            if let (Some((_, db)), Some(id)) = (&storage, &session_id) {
                db.fail_session(id)?;
            }
            bail!("Crawl failed: {}", e);
        }
    };

    if let (Some((_, db)), Some(id)) = (&storage, &session_id) {
        for result in &all_results {
            db.save_result(id, result)?;
        }
        let status = all_results
            .iter()
            .map(|r| r.status)
            .find(|s| *s != sitewalk_scanner::CrawlStatus::Completed)
            .unwrap_or(sitewalk_scanner::CrawlStatus::Completed);
        db.finish_session(
            id,
            status,
            all_results.iter().map(|r| r.total_pages).sum(),
            all_results.iter().map(|r| r.failed_urls).sum(),
        )?;
        info!("Recorded session {}", id);
    }

    let output = if json {
        let values = all_results
            .iter()
            .map(|r| r.to_value())
            .collect::<serde_json::Result<Vec<_>>>()?;
        serde_json::to_string_pretty(&values)?
    } else {
        generate_crawl_report(&all_results)
    };

    match sub_matches.get_one::<PathBuf>("output") {
        Some(path) => {
            fs::write(path, &output)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !quiet {
                println!("✓ Report saved to {}", path.display());
            }
        }
        None => print!("{}", output),
    }

    if !quiet && let Some(id) = session_id {
        eprintln!("Session: {}", id);
    }
    Ok(())
}

pub fn handle_sessions(args: &ArgMatches) -> Result<()> {
    let db_dir = args
        .get_one::<String>("db")
        .context("missing database directory")?;
    let db_path = database_path(db_dir);
    if !Database::exists(&db_path) {
        bail!(
            "No database at {} (run `sitewalk init` or a crawl first)",
            db_path.display()
        );
    }
    let db = Database::new(&db_path)?;

    match args.subcommand() {
        Some(("list", _)) => {
            print!("{}", format_session_list(&db)?);
        }
        Some(("show", sub)) => {
            let id = sub.get_one::<String>("ID").context("missing session id")?;
            print!("{}", format_session_detail(&db, id)?);
        }
        Some(("remove", sub)) => {
            let id = sub.get_one::<String>("ID").context("missing session id")?;
            if db.delete_session(id)? {
                println!("{} Removed session {}", "✓".green().bold(), id);
            } else {
                bail!("No session with id {}", id);
            }
        }
        _ => bail!("Unknown sessions command"),
    }
    Ok(())
}

pub fn format_session_list(db: &Database) -> Result<String> {
    let sessions = db.list_sessions()?;
    if sessions.is_empty() {
        return Ok("No sessions recorded.\n".to_string());
    }

    let mut out = String::new();
    for session in sessions {
        let started = chrono::DateTime::from_timestamp(session.start_time, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "{}  {}  {:<9}  {:>4} pages  {}\n",
            session.id,
            started,
            session.status,
            session.total_pages,
            session.seed_urls.join(", ")
        ));
    }
    Ok(out)
}

pub fn format_session_detail(db: &Database, id: &str) -> Result<String> {
    let session = db
        .get_session(id)?
        .ok_or_else(|| anyhow!("No session with id {}", id))?;

    let mut out = String::new();
    out.push_str(&format!("# Session {}\n", session.id));
    out.push_str(&format!("  Status: {}\n", session.status));
    out.push_str(&format!("  Seeds: {}\n", session.seed_urls.join(", ")));
    out.push_str(&format!(
        "  Pages: {} ({} failed)\n",
        session.total_pages, session.failed_urls
    ));

    for result in db.get_results_by_session(id)? {
        out.push_str(&format!(
            "  {} {}: {} visited, {} queued, {} duplicate groups, {:.1}s\n",
            result.status,
            result.seed_url,
            result.links_visited.len(),
            result.links_to_visit.len(),
            result.duplicate_content.len(),
            result.crawl_time_seconds
        ));
    }
    out.push('\n');

    for page in db.get_pages_by_session(id)? {
        out.push_str(&format!(
            "  {} {} [{}] {}{}\n",
            page.status_code,
            page.url,
            page.content_kind,
            page.title.unwrap_or_default(),
            if page.duplicate_of.is_empty() { "" } else { " (duplicate)" }
        ));
    }

    let broken = db.get_broken_links_by_session(id)?;
    if !broken.is_empty() {
        out.push_str("\n  Broken links:\n");
        for link in broken {
            out.push_str(&format!(
                "    {} {} (from {})\n",
                link.status_code,
                link.broken_link,
                extract_url_path(&link.source_page)
            ));
        }
    }
    Ok(out)
}
