use search_core::StoreError;

use crate::fetch::FetchError;

pub const STOPPED_BY_OPERATOR: &str = "stopped by operator";

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// The request itself is unusable; nothing was written.
    #[error("{0}")]
    Validation(String),
    #[error("indexing is already running")]
    AlreadyRunning,
    #[error("indexing is not running")]
    NotRunning,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unsupported content type {0}")]
    UnsupportedContent(String),
    #[error("crawl cancelled")]
    Cancelled,
}

impl CrawlError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CrawlError::Validation(msg.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, CrawlError::Validation(_))
    }

    pub fn category(&self) -> &'static str {
        match self {
            CrawlError::Validation(_) => "validation",
            CrawlError::AlreadyRunning | CrawlError::NotRunning => "state",
            CrawlError::Fetch(_) => "network",
            CrawlError::Store(_) => "storage",
            CrawlError::UnsupportedContent(_) => "content",
            CrawlError::Cancelled => "cancelled",
        }
    }

    /// Human-readable text stored as a site's last error.
    pub fn site_message(&self) -> String {
        match self {
            CrawlError::Fetch(FetchError::Timeout) => "connection timed out".into(),
            CrawlError::Fetch(FetchError::Dns(_)) => "host not found".into(),
            CrawlError::Fetch(FetchError::Tls(_)) => "TLS handshake failed".into(),
            CrawlError::Fetch(FetchError::Connect(msg)) => format!("connection failed: {msg}"),
            CrawlError::Fetch(err) => format!("network error: {err}"),
            CrawlError::Store(StoreError::Conflict(msg)) => format!("storage constraint violated: {msg}"),
            CrawlError::UnsupportedContent(ct) => format!("unsupported content type {ct}"),
            CrawlError::Cancelled => STOPPED_BY_OPERATOR.into(),
            other => format!("indexing failed: {}", other.category()),
        }
    }
}
