//! Lifecycle of crawl runs: at most one full run at a time, cooperative stop,
//! and on-demand refresh of single pages.
use dashmap::DashSet;
use indexer::PageIndexer;
use parking_lot::Mutex;
use search_core::config::{CrawlerSettings, SiteConfig};
use search_core::origin::{origin, toggle_www};
use search_core::{NewPage, Site, SiteStatus, Store};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CrawlError, STOPPED_BY_OPERATOR};
use crate::fetch::{FetchError, Fetcher};
use crate::links::page_path;
use crate::task::{crawl, CrawlContext, SiteTree};

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
}

pub struct Orchestrator {
    store: Store,
    indexer: PageIndexer,
    fetcher: Arc<dyn Fetcher>,
    sites: Vec<SiteConfig>,
    settings: Arc<CrawlerSettings>,
    running: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    idle: Arc<watch::Sender<bool>>,
    next_run: AtomicU64,
}

impl Orchestrator {
    pub fn new(store: Store, fetcher: Arc<dyn Fetcher>, sites: Vec<SiteConfig>, settings: CrawlerSettings) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            indexer: PageIndexer::new(store.clone()),
            store,
            fetcher,
            sites,
            settings: Arc::new(settings),
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(None)),
            idle: Arc::new(idle),
            next_run: AtomicU64::new(1),
        }
    }

    pub fn sites(&self) -> &[SiteConfig] {
        &self.sites
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolves once no full crawl is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.idle.subscribe();
        // the sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|idle| *idle).await;
    }

    /// Start crawling every configured site. Each site's previous pages,
    /// lemmas and postings are dropped before its crawl starts. Returns the
    /// number of sites being crawled; must be called inside a tokio runtime.
    pub fn start_all(&self) -> Result<usize, CrawlError> {
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(CrawlError::AlreadyRunning);
        }
        let trees = match self.prepare_sites() {
            Ok(trees) => trees,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };
        let count = trees.len();
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let ctx = Arc::new(CrawlContext {
            store: self.store.clone(),
            indexer: self.indexer.clone(),
            fetcher: Arc::clone(&self.fetcher),
            settings: Arc::clone(&self.settings),
            permits: Arc::new(Semaphore::new(self.settings.max_concurrency.max(1))),
            cancel: cancel.clone(),
        });

        self.idle.send_replace(false);
        let mut slot = self.active.lock();
        let supervisor = tokio::spawn(supervise(
            run_id,
            ctx,
            trees,
            Arc::clone(&self.running),
            Arc::clone(&self.active),
            Arc::clone(&self.idle),
        ));
        *slot = Some(ActiveRun { id: run_id, cancel, supervisor });
        info!(run_id, sites = count, "crawl started");
        Ok(count)
    }

    /// Reset each distinct configured site to a fresh INDEXING state.
    fn prepare_sites(&self) -> Result<Vec<Arc<SiteTree>>, CrawlError> {
        let mut seen = HashSet::new();
        let mut trees = Vec::new();
        for cfg in &self.sites {
            let Ok(root) = Url::parse(cfg.url.trim()) else {
                warn!(url = %cfg.url, "skipping malformed site root");
                continue;
            };
            let Some(site_origin) = origin(&root) else {
                warn!(url = %cfg.url, "skipping non-http site root");
                continue;
            };
            if !seen.insert(site_origin.clone()) {
                debug!(url = %cfg.url, "site root already configured under another URL");
                continue;
            }
            let site = match self.store.site_by_url(&cfg.url)? {
                Some(existing) => {
                    self.store.purge_site(existing.id)?;
                    existing
                }
                None => self.store.ensure_site(&cfg.url, &cfg.name)?,
            };
            let site = self.store.set_site_status(site.id, SiteStatus::Indexing, None)?;
            trees.push(Arc::new(SiteTree { site, origin: site_origin, root, visited: DashSet::new() }));
        }
        Ok(trees)
    }

    /// Cancel the running crawl, wait for its tasks to wind down and mark every
    /// site still INDEXING as FAILED. Returns how many sites were stopped.
    pub async fn stop_all(&self) -> Result<usize, CrawlError> {
        if !self.is_running() {
            return Err(CrawlError::NotRunning);
        }
        let run = self.active.lock().take();
        let Some(run) = run else {
            return Err(CrawlError::NotRunning);
        };
        run.cancel.cancel();
        if let Err(e) = run.supervisor.await {
            warn!(run_id = run.id, error = %e, "crawl supervisor ended abnormally");
        }
        let stopped = self.fail_unfinished_sites();
        self.running.store(false, Ordering::Release);
        self.idle.send_replace(true);
        if let Ok(n) = &stopped {
            info!(run_id = run.id, sites = n, "crawl stopped");
        }
        stopped
    }

    fn fail_unfinished_sites(&self) -> Result<usize, CrawlError> {
        let mut stopped = 0;
        for site in self.store.sites()? {
            if site.status == SiteStatus::Indexing
                && self.store.transition_site(
                    site.id,
                    SiteStatus::Indexing,
                    SiteStatus::Failed,
                    Some(STOPPED_BY_OPERATOR.into()),
                )?
            {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Check that `raw` is a well-formed URL under one of the configured sites.
    pub fn resolve_page(&self, raw: &str) -> Result<(Url, &SiteConfig), CrawlError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CrawlError::validation("page URL is empty"));
        }
        let url = Url::parse(raw).map_err(|_| CrawlError::validation("malformed page URL"))?;
        let wanted = origin(&url).ok_or_else(|| CrawlError::validation("malformed page URL"))?;
        let config = self
            .sites
            .iter()
            .find(|c| Url::parse(c.url.trim()).ok().as_ref().and_then(origin).as_deref() == Some(wanted.as_str()))
            .ok_or_else(|| CrawlError::validation("page is outside the configured sites"))?;
        Ok((url, config))
    }

    /// Fetch and re-index one page, replacing its previous version. Returns
    /// the site's resulting status; only validation problems are errors.
    pub async fn index_single(&self, raw: &str) -> Result<SiteStatus, CrawlError> {
        let (url, config) = self.resolve_page(raw)?;
        let site = self.store.ensure_site(&config.url, &config.name)?;
        self.store.set_site_status(site.id, SiteStatus::Indexing, None)?;

        let (status, error) = match self.refresh_page(&site, &url).await {
            Ok((code, _)) if (200..300).contains(&code) => (SiteStatus::Indexed, None),
            Ok((code, path)) => (SiteStatus::Indexed, Some(format!("HTTP {code} while indexing {path}"))),
            Err(err) => {
                warn!(%url, error = %err, "single page indexing failed");
                (SiteStatus::Failed, Some(err.site_message()))
            }
        };
        self.store.set_site_status(site.id, status, error)?;
        info!(%url, status = status.as_str(), "single page indexed");
        Ok(status)
    }

    async fn refresh_page(&self, site: &Site, url: &Url) -> Result<(u16, String), CrawlError> {
        let fetched = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(FetchError::Dns(msg)) => match toggle_www(url) {
                Some(alt) => {
                    debug!(%url, retry = %alt, "host not found, retrying with www toggled");
                    self.fetcher.fetch(&alt).await?
                }
                None => return Err(FetchError::Dns(msg).into()),
            },
            Err(e) => return Err(e.into()),
        };
        if !fetched.is_html() {
            return Err(CrawlError::UnsupportedContent(fetched.content_type));
        }
        let success = fetched.is_success();
        let page = self.indexer.replace_page(NewPage {
            site_id: site.id,
            path: page_path(&fetched.url, self.settings.max_path_len),
            code: fetched.status,
            content: fetched.body,
        })?;
        if success {
            self.indexer.index_page(&page)?;
        }
        Ok((page.code, page.path))
    }
}

/// Drive one run: a crawl tree per site, then release the run slot unless a
/// stop already took it.
async fn supervise(
    run_id: u64,
    ctx: Arc<CrawlContext>,
    trees: Vec<Arc<SiteTree>>,
    running: Arc<AtomicBool>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    idle: Arc<watch::Sender<bool>>,
) {
    let mut set = JoinSet::new();
    for tree in trees {
        let ctx = Arc::clone(&ctx);
        set.spawn(async move {
            crawl(Arc::clone(&ctx), Arc::clone(&tree), tree.root.clone()).await;
            if ctx.cancel.is_cancelled() {
                return;
            }
            match ctx.store.transition_site(tree.site.id, SiteStatus::Indexing, SiteStatus::Indexed, None) {
                Ok(true) => info!(site = %tree.site.url, urls = tree.visited.len(), "site indexed"),
                Ok(false) => info!(site = %tree.site.url, "site crawl finished with errors"),
                Err(e) => warn!(site = %tree.site.url, error = %e, "could not mark site indexed"),
            }
        });
    }
    while set.join_next().await.is_some() {}

    let mut slot = active.lock();
    if slot.as_ref().map(|r| r.id) == Some(run_id) {
        *slot = None;
        running.store(false, Ordering::Release);
        idle.send_replace(true);
        info!(run_id, "crawl finished");
    }
}
