pub mod crawl;
pub mod data;
