//! "Same site" comparison for crawl boundaries and URL scoping.
use url::Url;

/// Normalised origin of an http(s) URL: scheme, host without a leading `www.`,
/// and the port only when it differs from the scheme default.
pub fn origin(url: &Url) -> Option<String> {
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return None;
    }
    let host = url.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    Some(match url.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// Parse `raw` and return its origin; `None` for malformed or non-http URLs.
pub fn origin_of(raw: &str) -> Option<String> {
    Url::parse(raw.trim()).ok().as_ref().and_then(origin)
}

/// Swap `www.example.com` and `example.com`.
pub fn toggle_www(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    let alt = match host.strip_prefix("www.") {
        Some(bare) => bare.to_string(),
        None => format!("www.{host}"),
    };
    let mut out = url.clone();
    out.set_host(Some(&alt)).ok()?;
    Some(out)
}
