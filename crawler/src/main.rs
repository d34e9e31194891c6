use anyhow::{anyhow, Result};
use clap::Parser;
use crawler::{HttpFetcher, Orchestrator};
use search_core::config::Settings;
use search_core::Store;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "crawler")]
#[command(about = "Crawl the configured sites into the search store")]
struct Cli {
    /// Settings file with the site list and crawler options
    #[arg(long, default_value = "./sites.json")]
    config: String,
    /// Store directory
    #[arg(long, default_value = "./data")]
    data: String,
    /// Override the number of pages fetched at once
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Cli::parse();

    let mut settings = Settings::load(&args.config)?;
    if let Some(n) = args.concurrency {
        settings.crawler.max_concurrency = n;
    }
    if settings.sites.is_empty() {
        return Err(anyhow!("no sites configured in {}", args.config));
    }
    let store = Store::open(&args.data)?;
    let fetcher = Arc::new(HttpFetcher::new(&settings.crawler)?);
    let orchestrator = Orchestrator::new(store.clone(), fetcher, settings.sites.clone(), settings.crawler.clone());

    let started = orchestrator.start_all()?;
    eprintln!(
        "crawler: sites={} concurrency={} data={}",
        started, settings.crawler.max_concurrency, args.data
    );
    tokio::select! {
        _ = orchestrator.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping crawl");
            orchestrator.stop_all().await?;
        }
    }

    store.flush()?;
    for site in store.sites()? {
        eprintln!(
            "done: site={} status={} pages={} lemmas={} error={}",
            site.url,
            site.status.as_str(),
            store.count_pages(Some(site.id))?,
            store.count_lemmas(Some(site.id))?,
            site.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
