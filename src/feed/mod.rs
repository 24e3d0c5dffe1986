mod fetcher;
mod import;

pub use fetcher::{FeedFetcher, FeedSource};
pub use import::parse_opml_file;
