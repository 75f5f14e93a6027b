#[path = "handlers.rs"]
pub mod handlers;

pub use handlers::{
    crawl_config_from_args, database_path, load_config_file, load_urls_from_file,
    load_urls_from_source, parse_url_line,
};

pub use sitewalk_core::crawl::{
    CrawlOptions, CrawlProgressCallback, execute_crawl, extract_url_path, generate_crawl_report,
};
