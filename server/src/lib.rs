use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use crawler::{CrawlError, Fetcher, Orchestrator};
use search_core::config::Settings;
use search_core::origin::origin_of;
use search_core::search::{SearchEngine, SearchError, SearchRequest, SearchResults};
use search_core::{SiteStatus, Store, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const NOT_INDEXED_YET: &str = "site has not been indexed yet";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub engine: SearchEngine,
    pub store: Store,
}

impl AppState {
    pub fn new(settings: Settings, store: Store, fetcher: Arc<dyn Fetcher>) -> Self {
        let orchestrator = Orchestrator::new(store.clone(), fetcher, settings.sites, settings.crawler);
        Self { orchestrator: Arc::new(orchestrator), engine: SearchEngine::new(store.clone(), settings.search), store }
    }
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/startIndexing", get(start_indexing).post(start_indexing))
        .route("/api/stopIndexing", get(stop_indexing).post(stop_indexing))
        .route("/api/indexPage", get(index_page).post(index_page))
        .route("/api/statistics", get(statistics))
        .route("/api/search", get(search))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct Envelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn ok() -> Response {
    Json(Envelope { success: true, error: None }).into_response()
}

fn fail(status: StatusCode, error: impl ToString) -> Response {
    (status, Json(Envelope { success: false, error: Some(error.to_string()) })).into_response()
}

fn crawl_failure(err: CrawlError) -> Response {
    match err {
        CrawlError::Store(e) => store_failure(e),
        other => fail(StatusCode::BAD_REQUEST, other),
    }
}

fn store_failure(err: StoreError) -> Response {
    warn!(error = %err, "storage failure while serving request");
    fail(StatusCode::INTERNAL_SERVER_ERROR, err)
}

async fn start_indexing(State(state): State<AppState>) -> Response {
    match state.orchestrator.start_all() {
        Ok(sites) => {
            info!(sites, "indexing started on request");
            ok()
        }
        Err(e) => crawl_failure(e),
    }
}

async fn stop_indexing(State(state): State<AppState>) -> Response {
    match state.orchestrator.stop_all().await {
        Ok(_) => ok(),
        Err(e) => crawl_failure(e),
    }
}

#[derive(Deserialize)]
struct IndexPageParams {
    #[serde(default)]
    url: String,
}

/// Validate the URL now; the fetch and indexing run after the response.
async fn index_page(State(state): State<AppState>, Query(params): Query<IndexPageParams>) -> Response {
    if let Err(e) = state.orchestrator.resolve_page(&params.url) {
        return crawl_failure(e);
    }
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        match orchestrator.index_single(&params.url).await {
            Ok(status) => info!(url = %params.url, status = status.as_str(), "page job finished"),
            Err(e) => warn!(url = %params.url, error = %e, "page job failed"),
        }
    });
    ok()
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
    site: Option<String>,
    offset: Option<usize>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    success: bool,
    #[serde(flatten)]
    results: SearchResults,
}

async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Response {
    let limit = params.limit.filter(|l| *l > 0).unwrap_or(state.engine.settings().default_limit);
    let req = SearchRequest {
        query: &params.query,
        site: params.site.as_deref(),
        offset: params.offset.unwrap_or(0),
        limit,
    };
    match state.engine.search(&req) {
        Ok(results) => Json(SearchResponse { success: true, results }).into_response(),
        Err(SearchError::Store(e)) => store_failure(e),
        Err(e) => fail(StatusCode::BAD_REQUEST, e),
    }
}

#[derive(Serialize)]
struct TotalStatistics {
    sites: usize,
    pages: u64,
    lemmas: u64,
    indexing: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SiteStatistics {
    url: String,
    name: String,
    status: SiteStatus,
    /// Milliseconds since the Unix epoch.
    status_time: i64,
    error: Option<String>,
    pages: u64,
    lemmas: u64,
}

#[derive(Serialize)]
struct Statistics {
    total: TotalStatistics,
    detailed: Vec<SiteStatistics>,
}

#[derive(Serialize)]
struct StatisticsResponse {
    success: bool,
    statistics: Statistics,
}

fn epoch_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

fn collect_statistics(state: &AppState) -> Result<Statistics, StoreError> {
    let mut detailed = Vec::new();
    let mut origins = HashSet::new();
    for cfg in state.orchestrator.sites() {
        if !origins.insert(origin_of(&cfg.url).unwrap_or_else(|| cfg.url.clone())) {
            continue;
        }
        let entry = match state.store.site_by_url(&cfg.url)? {
            Some(site) => SiteStatistics {
                pages: state.store.count_pages(Some(site.id))?,
                lemmas: state.store.count_lemmas(Some(site.id))?,
                url: site.url,
                name: site.name,
                status: site.status,
                status_time: epoch_millis(site.status_time),
                error: site.last_error,
            },
            None => SiteStatistics {
                url: cfg.url.clone(),
                name: cfg.name.clone(),
                status: SiteStatus::Failed,
                status_time: epoch_millis(OffsetDateTime::now_utc()),
                error: Some(NOT_INDEXED_YET.into()),
                pages: 0,
                lemmas: 0,
            },
        };
        detailed.push(entry);
    }
    let total = TotalStatistics {
        sites: detailed.len(),
        pages: detailed.iter().map(|s| s.pages).sum(),
        lemmas: detailed.iter().map(|s| s.lemmas).sum(),
        indexing: state.orchestrator.is_running(),
    };
    Ok(Statistics { total, detailed })
}

async fn statistics(State(state): State<AppState>) -> Response {
    match collect_statistics(&state) {
        Ok(statistics) => Json(StatisticsResponse { success: true, statistics }).into_response(),
        Err(e) => store_failure(e),
    }
}
