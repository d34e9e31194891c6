pub mod error;
pub mod fetch;
pub mod links;
pub mod orchestrator;
mod task;

pub use error::CrawlError;
pub use fetch::{FetchError, FetchedPage, Fetcher, HttpFetcher};
pub use orchestrator::Orchestrator;
