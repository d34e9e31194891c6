//! HTTP retrieval behind a trait so crawls can run against a fake web.
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, redirect, Client};
use search_core::config::CrawlerSettings;
use std::error::Error as _;
use std::time::Duration;
use url::Url;

/// Bodies larger than this are cut before decoding.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("host not found: {0}")]
    Dns(String),
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("failed to read body: {0}")]
    Body(String),
    #[error("invalid request: {0}")]
    Request(String),
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Sort a reqwest failure into the categories site errors are reported by.
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        let chain = error_chain(err);
        let lower = chain.to_lowercase();
        if lower.contains("dns error")
            || lower.contains("failed to lookup address")
            || lower.contains("name or service not known")
            || lower.contains("no such host")
        {
            FetchError::Dns(chain)
        } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
            FetchError::Tls(chain)
        } else if err.is_connect() {
            FetchError::Connect(chain)
        } else if err.is_body() || err.is_decode() {
            FetchError::Body(chain)
        } else if err.is_builder() || err.is_redirect() {
            FetchError::Request(chain)
        } else {
            FetchError::Other(chain)
        }
    }
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(e) = source {
        parts.push(e.to_string());
        source = e.source();
    }
    parts.join(": ")
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: Url,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        ct.starts_with("text/html") || ct.starts_with("application/xhtml+xml")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(settings: &CrawlerSettings) -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        if !settings.referrer.is_empty() {
            let referrer = header::HeaderValue::from_str(&settings.referrer)
                .map_err(|e| FetchError::Request(format!("referrer: {e}")))?;
            headers.insert(header::REFERER, referrer);
        }
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .redirect(redirect::Policy::limited(5))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| FetchError::classify(&e))?;
        Ok(Self { client })
    }
}

fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.is_empty() || ct.starts_with("text/") || ct.contains("xml") || ct.contains("json")
}

/// Read at most `MAX_BODY_BYTES` of the body; the rest is never downloaded.
async fn read_capped(resp: reqwest::Response) -> Result<String, FetchError> {
    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    let mut truncated = false;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::classify(&e))?;
        let room = MAX_BODY_BYTES - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }
    if truncated {
        body.truncate(complete_prefix_len(&body));
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let b = bytes[len - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = match b {
            0xF0.. => 4,
            0xE0.. => 3,
            0xC0.. => 2,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let resp = self.client.get(url.clone()).send().await.map_err(|e| FetchError::classify(&e))?;
        let final_url = resp.url().clone();
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        // binary responses are recorded without their body
        let body = if is_textual(&content_type) {
            read_capped(resp).await?
        } else {
            String::new()
        };
        Ok(FetchedPage { url: final_url, status, content_type, body })
    }
}
