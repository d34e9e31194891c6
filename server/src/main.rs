use anyhow::Result;
use axum::Router;
use clap::Parser;
use crawler::HttpFetcher;
use search_core::config::Settings;
use search_core::Store;
use server::{build_app, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Settings file with the site list, crawler and search options
    #[arg(long, default_value = "./sites.json")]
    config: String,
    /// Store directory
    #[arg(long, default_value = "./data")]
    data: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let settings = Settings::load(&args.config)?;
    let store = Store::open(&args.data)?;
    let fetcher = Arc::new(HttpFetcher::new(&settings.crawler)?);
    let state = AppState::new(settings, store.clone(), fetcher);
    let orchestrator = Arc::clone(&state.orchestrator);
    let app: Router = build_app(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    if orchestrator.is_running() {
        orchestrator.stop_all().await?;
    }
    store.flush()?;
    Ok(())
}
