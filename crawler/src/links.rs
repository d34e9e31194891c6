//! Link discovery and page path derivation.
use lazy_static::lazy_static;
use scraper::{Html, Selector};
use search_core::origin::origin;
use std::collections::HashSet;
use url::Url;

lazy_static! {
    static ref ANCHOR: Selector = Selector::parse("a[href]").expect("valid selector");
}

/// Absolute links in `html` that stay on `site_origin`, without fragments,
/// without duplicates and without files the crawler does not follow.
pub fn extract_links(html: &str, base: &Url, site_origin: &str, skip_extensions: &[String]) -> Vec<Url> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for a in doc.select(&ANCHOR) {
        let Some(href) = a.value().attr("href") else { continue };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(mut url) = base.join(href) else { continue };
        url.set_fragment(None);
        if origin(&url).as_deref() != Some(site_origin) || has_skipped_extension(&url, skip_extensions) {
            continue;
        }
        if seen.insert(url.to_string()) {
            links.push(url);
        }
    }
    links
}

fn has_skipped_extension(url: &Url, skip: &[String]) -> bool {
    let last = url.path().rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((_, ext)) => skip.iter().any(|s| s.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Site-relative path of a page: path plus query, cut to `max_len` characters.
pub fn page_path(url: &Url, max_len: usize) -> String {
    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(q) = url.query() {
        path.push('?');
        path.push_str(q);
    }
    match path.char_indices().nth(max_len) {
        Some((cut, _)) => path[..cut].to_string(),
        None => path,
    }
}

/// Key under which a URL is claimed in a crawl tree: the normalised origin
/// plus the stored path, so `www.` and bare spellings of a page coincide.
pub fn visit_key(url: &Url, max_len: usize) -> String {
    let site = origin(url).unwrap_or_else(|| url.origin().ascii_serialization());
    format!("{site}{}", page_path(url, max_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skip() -> Vec<String> {
        vec!["pdf".into(), "jpg".into()]
    }

    #[test]
    fn keeps_only_same_origin_pages() {
        let base = Url::parse("https://example.com/dir/").unwrap();
        let html = r##"
            <a href="page">rel</a>
            <a href="/a#part">frag</a>
            <a href="#top">self</a>
            <a href="https://www.example.com/b">www</a>
            <a href="https://other.org/c">other</a>
            <a href="/doc.PDF">pdf</a>
            <a href="mailto:me@example.com">mail</a>
            <a href="/a">dup</a>
        "##;
        let links: Vec<String> =
            extract_links(html, &base, "https://example.com", &skip()).iter().map(|u| u.to_string()).collect();
        assert_eq!(links, vec!["https://example.com/dir/page", "https://example.com/a", "https://www.example.com/b"]);
    }

    #[test]
    fn visit_key_ignores_www_and_fragment() {
        let bare = Url::parse("https://example.com/b?x=1").unwrap();
        let www = Url::parse("https://www.example.com/b?x=1#top").unwrap();
        assert_eq!(visit_key(&bare, 512), visit_key(&www, 512));
        assert_eq!(visit_key(&bare, 512), "https://example.com/b?x=1");
        assert_ne!(visit_key(&bare, 512), visit_key(&Url::parse("https://example.com/b").unwrap(), 512));
    }

    #[test]
    fn path_keeps_query_and_is_bounded() {
        let u = Url::parse("https://example.com/search?q=cat#x").unwrap();
        assert_eq!(page_path(&u, 512), "/search?q=cat");
        assert_eq!(page_path(&Url::parse("https://example.com").unwrap(), 512), "/");
        let long = Url::parse(&format!("https://example.com/{}", "a".repeat(600))).unwrap();
        assert_eq!(page_path(&long, 512).chars().count(), 512);
    }
}
