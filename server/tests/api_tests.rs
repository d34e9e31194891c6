use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use crawler::{FetchError, FetchedPage, Fetcher};
use http_body_util::BodyExt;
use indexer::PageIndexer;
use search_core::config::{Settings, SiteConfig};
use search_core::{NewPage, SiteStatus, Store};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use url::Url;

/// A web where every request hangs, so a started crawl stays running.
struct SilentWeb;

#[async_trait]
impl Fetcher for SilentWeb {
    async fn fetch(&self, _url: &Url) -> Result<FetchedPage, FetchError> {
        std::future::pending().await
    }
}

fn settings() -> Settings {
    Settings {
        sites: vec![
            SiteConfig { url: "https://example.com".into(), name: "Example".into() },
            SiteConfig { url: "https://never.example".into(), name: "Never".into() },
        ],
        ..Settings::default()
    }
}

fn app_with(store: Store) -> Router {
    server::build_app(server::AppState::new(settings(), store, Arc::new(SilentWeb)))
}

/// Four pages so that "cat" stays under the too-common threshold.
fn indexed_store() -> Store {
    let store = Store::temporary().unwrap();
    let site = store.ensure_site("https://example.com", "Example").unwrap();
    let indexer = PageIndexer::new(store.clone());
    let pages = [
        ("/a", "<title>Feline page</title><p>cat cat cat</p>"),
        ("/b", "<title>Mixed</title><p>cat dog</p>"),
        ("/c", "<p>bird</p>"),
        ("/d", "<p>fish</p>"),
    ];
    for (path, html) in pages {
        let page = store
            .insert_page(NewPage { site_id: site.id, path: path.into(), code: 200, content: html.into() })
            .unwrap();
        indexer.index_page(&page).unwrap();
    }
    store.set_site_status(site.id, SiteStatus::Indexed, None).unwrap();
    store
}

async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn search_returns_ranked_items() {
    let app = app_with(indexed_store());
    let (status, json) = call(app, "GET", "/api/search?query=cat").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["totalCount"], 2);
    let items = json["items"].as_array().unwrap();
    assert_eq!(items[0]["path"], "/a");
    assert_eq!(items[0]["title"], "Feline page");
    assert_eq!(items[0]["siteRoot"], "https://example.com");
    assert_eq!(items[0]["relevanceScore"].as_f64().unwrap(), 1.0);
    assert!(items[0]["snippet"].as_str().unwrap().contains("<b>cat</b>"));
    assert_eq!(items[1]["path"], "/b");
}

#[tokio::test]
async fn search_pages_with_offset_and_limit() {
    let app = app_with(indexed_store());
    let (status, json) = call(app, "GET", "/api/search?query=cat&offset=1&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["totalCount"], 2);
    assert_eq!(json["items"][0]["path"], "/b");
}

#[tokio::test]
async fn empty_query_is_a_bad_request() {
    let app = app_with(indexed_store());
    let (status, json) = call(app, "GET", "/api/search?query=%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "empty query");
}

#[tokio::test]
async fn statistics_cover_every_configured_site() {
    let app = app_with(indexed_store());
    let (status, json) = call(app, "GET", "/api/statistics").await;
    assert_eq!(status, StatusCode::OK);
    let stats = &json["statistics"];
    assert_eq!(stats["total"]["sites"], 2);
    assert_eq!(stats["total"]["pages"], 4);
    assert_eq!(stats["total"]["indexing"], false);
    let detailed = stats["detailed"].as_array().unwrap();
    assert_eq!(detailed[0]["status"], "INDEXED");
    assert_eq!(detailed[0]["pages"], 4);
    assert_eq!(detailed[1]["status"], "FAILED");
    assert_eq!(detailed[1]["error"], "site has not been indexed yet");
}

#[tokio::test]
async fn index_page_outside_sites_is_rejected() {
    let store = Store::temporary().unwrap();
    let app = app_with(store.clone());
    let (status, json) = call(app, "POST", "/api/indexPage?url=https%3A%2F%2Fother.org%2Fx").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(store.count_pages(None).unwrap(), 0);
}

#[tokio::test]
async fn start_and_stop_follow_the_run_state() {
    let store = Store::temporary().unwrap();
    let app = app_with(store.clone());

    let (status, _) = call(app.clone(), "GET", "/api/stopIndexing").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = call(app.clone(), "GET", "/api/startIndexing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let (status, json) = call(app.clone(), "POST", "/api/startIndexing").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "indexing is already running");

    let (status, _) = call(app.clone(), "POST", "/api/stopIndexing").await;
    assert_eq!(status, StatusCode::OK);
    for site in store.sites().unwrap() {
        assert_eq!(site.status, SiteStatus::Failed);
        assert_eq!(site.last_error.as_deref(), Some("stopped by operator"));
    }
}

#[tokio::test]
async fn health_answers_ok() {
    let app = app_with(Store::temporary().unwrap());
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
