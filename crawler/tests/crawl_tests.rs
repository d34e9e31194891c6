use async_trait::async_trait;
use crawler::{CrawlError, FetchError, FetchedPage, Fetcher, Orchestrator};
use parking_lot::Mutex;
use search_core::config::{CrawlerSettings, SiteConfig};
use search_core::{SiteStatus, Store};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

#[derive(Clone)]
struct Resource {
    status: u16,
    content_type: &'static str,
    body: String,
}

/// In-memory web: unknown URLs answer 404, `broken` URLs fail name
/// resolution and `stalled` URLs never answer.
#[derive(Default)]
struct FakeWeb {
    pages: Mutex<HashMap<String, Resource>>,
    broken: HashSet<String>,
    stalled: HashSet<String>,
    hits: Mutex<HashMap<String, usize>>,
    stall_reached: Notify,
}

impl FakeWeb {
    fn html(self, url: &str, body: &str) -> Self {
        self.put(url, 200, "text/html; charset=utf-8", body);
        self
    }

    fn put(&self, url: &str, status: u16, content_type: &'static str, body: &str) {
        self.pages.lock().insert(url.to_string(), Resource { status, content_type, body: body.to_string() });
    }

    fn hits(&self, url: &str) -> usize {
        self.hits.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for FakeWeb {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let key = url.to_string();
        *self.hits.lock().entry(key.clone()).or_insert(0) += 1;
        if self.broken.contains(&key) {
            return Err(FetchError::Dns("failed to lookup address information".into()));
        }
        if self.stalled.contains(&key) {
            self.stall_reached.notify_one();
            std::future::pending::<()>().await;
        }
        let found = self.pages.lock().get(&key).cloned();
        let res = found.unwrap_or(Resource { status: 404, content_type: "text/html", body: "<p>missing</p>".into() });
        Ok(FetchedPage { url: url.clone(), status: res.status, content_type: res.content_type.into(), body: res.body })
    }
}

fn example() -> Vec<SiteConfig> {
    vec![SiteConfig { url: "https://example.com".into(), name: "Example".into() }]
}

fn orchestrator(web: Arc<FakeWeb>, sites: Vec<SiteConfig>) -> (Orchestrator, Store) {
    orchestrator_with(web, sites, 4)
}

fn orchestrator_with(web: Arc<FakeWeb>, sites: Vec<SiteConfig>, max_concurrency: usize) -> (Orchestrator, Store) {
    let store = Store::temporary().unwrap();
    let settings = CrawlerSettings { max_concurrency, ..CrawlerSettings::default() };
    (Orchestrator::new(store.clone(), web, sites, settings), store)
}

async fn finish(orch: &Orchestrator) {
    tokio::time::timeout(Duration::from_secs(10), orch.wait_idle()).await.expect("crawl finished in time");
}

fn small_site() -> FakeWeb {
    FakeWeb::default()
        .html(
            "https://example.com/",
            r##"<title>Home</title><p>cat</p>
                <a href="/a">a</a> <a href="/b#more">b</a> <a href="#top">top</a>
                <a href="/report.pdf">pdf</a> <a href="https://other.org/x">other</a>"##,
        )
        .html("https://example.com/a", r#"<p>cat dog</p><a href="/">home</a><a href="/b">b</a>"#)
        .html("https://example.com/b", r#"<p>dog</p><a href="/a">a</a><a href="/notes">notes</a>"#)
}

#[tokio::test]
async fn crawls_each_url_once_and_marks_site_indexed() {
    let web = small_site();
    web.put("https://example.com/notes", 200, "text/plain", "plain cat text");
    let web = Arc::new(web);
    let (orch, store) = orchestrator(Arc::clone(&web), example());

    assert_eq!(orch.start_all().unwrap(), 1);
    finish(&orch).await;

    for url in ["https://example.com/", "https://example.com/a", "https://example.com/b", "https://example.com/notes"] {
        assert_eq!(web.hits(url), 1, "{url}");
    }
    assert_eq!(web.hits("https://example.com/report.pdf"), 0);
    assert_eq!(web.hits("https://other.org/x"), 0);

    let site = store.site_by_url("https://example.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(site.last_error, None);
    // the plain text page is kept but contributes no lemmas
    assert_eq!(store.count_pages(Some(site.id)).unwrap(), 4);
    assert_eq!(store.find_lemma(site.id, "cat").unwrap().unwrap().frequency, 2);
    assert_eq!(store.find_lemma(site.id, "dog").unwrap().unwrap().frequency, 2);
    assert!(!orch.is_running());
}

#[tokio::test]
async fn duplicate_roots_share_one_site() {
    let web = Arc::new(small_site());
    let mut sites = example();
    sites.push(SiteConfig { url: "https://www.example.com/".into(), name: "Example again".into() });
    let (orch, store) = orchestrator(Arc::clone(&web), sites);

    assert_eq!(orch.start_all().unwrap(), 1);
    finish(&orch).await;
    assert_eq!(store.sites().unwrap().len(), 1);
    assert_eq!(web.hits("https://example.com/"), 1);
}

#[tokio::test]
async fn recrawl_replaces_previous_data() {
    let web = Arc::new(small_site());
    let (orch, store) = orchestrator(Arc::clone(&web), example());

    orch.start_all().unwrap();
    finish(&orch).await;
    orch.start_all().unwrap();
    finish(&orch).await;

    let site = store.site_by_url("https://example.com").unwrap().unwrap();
    assert_eq!(store.count_pages(Some(site.id)).unwrap(), 4);
    assert_eq!(store.find_lemma(site.id, "cat").unwrap().unwrap().frequency, 2);
}

#[tokio::test]
async fn failed_fetch_fails_site_but_siblings_continue() {
    let mut web = FakeWeb::default()
        .html("https://example.com/", r#"<a href="/ok">ok</a><a href="/down">down</a>"#)
        .html("https://example.com/ok", "<p>fine</p>");
    web.broken.insert("https://example.com/down".into());
    let (orch, store) = orchestrator(Arc::new(web), example());

    orch.start_all().unwrap();
    finish(&orch).await;

    let site = store.site_by_url("https://example.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some("host not found"));
    assert!(store.page_by_path(site.id, "/ok").unwrap().is_some());
}

#[tokio::test]
async fn second_start_is_rejected_while_running() {
    let mut web = FakeWeb::default().html("https://example.com/", r#"<a href="/slow">slow</a>"#);
    web.stalled.insert("https://example.com/slow".into());
    let web = Arc::new(web);
    let (orch, _store) = orchestrator(Arc::clone(&web), example());

    orch.start_all().unwrap();
    assert!(orch.is_running());
    assert!(matches!(orch.start_all(), Err(CrawlError::AlreadyRunning)));
    orch.stop_all().await.unwrap();
    assert!(!orch.is_running());
}

#[tokio::test]
async fn stop_fails_running_sites_and_writes_nothing_more() {
    let mut web = FakeWeb::default().html("https://example.com/", r#"<a href="/slow">slow</a>"#);
    web.stalled.insert("https://example.com/slow".into());
    let web = Arc::new(web);
    let (orch, store) = orchestrator(Arc::clone(&web), example());

    orch.start_all().unwrap();
    tokio::time::timeout(Duration::from_secs(10), web.stall_reached.notified()).await.unwrap();
    assert_eq!(orch.stop_all().await.unwrap(), 1);

    let site = store.site_by_url("https://example.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some("stopped by operator"));
    let pages = store.count_pages(None).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.count_pages(None).unwrap(), pages);
    assert!(matches!(orch.stop_all().await, Err(CrawlError::NotRunning)));
}

#[tokio::test]
async fn single_page_outside_the_sites_is_rejected() {
    let web = Arc::new(small_site());
    let (orch, store) = orchestrator(Arc::clone(&web), example());

    for raw in ["", "not a url", "https://other.org/page"] {
        let err = orch.index_single(raw).await.unwrap_err();
        assert!(err.is_validation(), "{raw}: {err}");
    }
    assert_eq!(store.count_pages(None).unwrap(), 0);
    assert!(store.sites().unwrap().is_empty());
}

#[tokio::test]
async fn single_page_refresh_replaces_its_lemmas() {
    let web = Arc::new(FakeWeb::default().html("https://example.com/news", "<p>cat</p>"));
    let (orch, store) = orchestrator(Arc::clone(&web), example());

    assert_eq!(orch.index_single("https://example.com/news").await.unwrap(), SiteStatus::Indexed);
    web.put("https://example.com/news", 200, "text/html", "<p>dog</p>");
    assert_eq!(orch.index_single("https://example.com/news").await.unwrap(), SiteStatus::Indexed);

    let site = store.site_by_url("https://example.com").unwrap().unwrap();
    assert_eq!(store.count_pages(Some(site.id)).unwrap(), 1);
    assert_eq!(store.find_lemma(site.id, "dog").unwrap().unwrap().frequency, 1);
    assert_eq!(store.find_lemma(site.id, "cat").unwrap().unwrap().frequency, 0);
}

#[tokio::test]
async fn single_page_error_status_is_recorded() {
    let web = Arc::new(FakeWeb::default());
    let (orch, store) = orchestrator(Arc::clone(&web), example());

    assert_eq!(orch.index_single("https://example.com/gone").await.unwrap(), SiteStatus::Indexed);
    let site = store.site_by_url("https://example.com").unwrap().unwrap();
    assert_eq!(site.last_error.as_deref(), Some("HTTP 404 while indexing /gone"));
    assert_eq!(store.count_lemmas(Some(site.id)).unwrap(), 0);

    web.put("https://example.com/file", 200, "application/pdf", "");
    assert_eq!(orch.index_single("https://example.com/file").await.unwrap(), SiteStatus::Failed);
}

#[tokio::test]
async fn www_and_bare_spellings_are_fetched_once() {
    let web = FakeWeb::default()
        .html("https://example.com/", r#"<a href="https://www.example.com/b">www</a><a href="https://example.com/b">bare</a>"#)
        .html("https://example.com/b", "<p>cat</p>")
        .html("https://www.example.com/b", "<p>cat</p>");
    let web = Arc::new(web);
    let (orch, store) = orchestrator(Arc::clone(&web), example());

    orch.start_all().unwrap();
    finish(&orch).await;

    assert_eq!(web.hits("https://example.com/b") + web.hits("https://www.example.com/b"), 1);
    let site = store.site_by_url("https://example.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert_eq!(store.count_pages(Some(site.id)).unwrap(), 2);
}

#[tokio::test]
async fn queued_tasks_do_not_fetch_after_stop() {
    let links: String = (1..=5).map(|i| format!(r#"<a href="/s{i}">s{i}</a>"#)).collect();
    let mut web = FakeWeb::default().html("https://example.com/", &links);
    for i in 1..=5 {
        web.stalled.insert(format!("https://example.com/s{i}"));
    }
    let web = Arc::new(web);
    let (orch, store) = orchestrator_with(Arc::clone(&web), example(), 1);

    orch.start_all().unwrap();
    tokio::time::timeout(Duration::from_secs(10), web.stall_reached.notified()).await.unwrap();
    orch.stop_all().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // one stalled fetch holds the only permit; the rest were still queued
    let fetched: usize = (1..=5).map(|i| web.hits(&format!("https://example.com/s{i}"))).sum();
    assert_eq!(fetched, 1);
    let site = store.site_by_url("https://example.com").unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(store.count_pages(Some(site.id)).unwrap(), 1);
}
