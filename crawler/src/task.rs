//! One crawl task per URL. A task fetches and stores its page, then spawns a
//! child task for every new link and waits for all of them, so the root task
//! of a site completes only when the whole reachable tree has been handled.
use dashmap::DashSet;
use futures::future::{BoxFuture, FutureExt};
use indexer::PageIndexer;
use search_core::config::CrawlerSettings;
use search_core::origin::origin;
use search_core::{NewPage, Site, SiteStatus, Store, StoreError};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::error::CrawlError;
use crate::fetch::Fetcher;
use crate::links::{extract_links, page_path, visit_key};

/// State shared by every task of one crawl run.
pub(crate) struct CrawlContext {
    pub store: Store,
    pub indexer: PageIndexer,
    pub fetcher: Arc<dyn Fetcher>,
    pub settings: Arc<CrawlerSettings>,
    /// Bounds pages in flight across all sites of the run.
    pub permits: Arc<Semaphore>,
    pub cancel: CancellationToken,
}

/// A single site's crawl tree.
pub(crate) struct SiteTree {
    pub site: Site,
    pub origin: String,
    pub root: Url,
    /// Pages claimed by some task of this tree, keyed by `visit_key`.
    pub visited: DashSet<String>,
}

pub(crate) fn crawl(ctx: Arc<CrawlContext>, tree: Arc<SiteTree>, url: Url) -> BoxFuture<'static, ()> {
    async move {
        let max_len = ctx.settings.max_path_len;
        if !tree.visited.insert(visit_key(&url, max_len)) || ctx.cancel.is_cancelled() {
            return;
        }
        let links = {
            let _permit = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return,
                permit = Arc::clone(&ctx.permits).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return,
                },
            };
            match visit(&ctx, &tree, &url).await {
                Ok(links) => links,
                Err(CrawlError::Cancelled) => return,
                Err(err) => {
                    fail_site(&ctx.store, &tree.site, &url, &err);
                    return;
                }
            }
        };

        let mut children = JoinSet::new();
        for link in links {
            if tree.visited.contains(&visit_key(&link, max_len)) {
                continue;
            }
            children.spawn(crawl(Arc::clone(&ctx), Arc::clone(&tree), link));
        }
        while let Some(joined) = children.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!(site = %tree.site.url, error = %e, "crawl task panicked");
                }
            }
        }
    }
    .boxed()
}

/// Fetch, store and index one page; returns the links to follow.
async fn visit(ctx: &CrawlContext, tree: &SiteTree, url: &Url) -> Result<Vec<Url>, CrawlError> {
    let fetched = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(CrawlError::Cancelled),
        res = ctx.fetcher.fetch(url) => res?,
    };
    // a response that arrives after a stop is dropped unwritten
    if ctx.cancel.is_cancelled() {
        return Err(CrawlError::Cancelled);
    }
    if fetched.url != *url {
        tree.visited.insert(visit_key(&fetched.url, ctx.settings.max_path_len));
    }
    if origin(&fetched.url).as_deref() != Some(tree.origin.as_str()) {
        debug!(%url, resolved = %fetched.url, "redirected off site");
        return Ok(Vec::new());
    }

    let html = fetched.is_html();
    if !html && !ctx.settings.store_non_html {
        return Ok(Vec::new());
    }
    let new_page = NewPage {
        site_id: tree.site.id,
        path: page_path(&fetched.url, ctx.settings.max_path_len),
        code: fetched.status,
        content: fetched.body,
    };
    let page = match ctx.store.insert_page(new_page) {
        Ok(page) => page,
        Err(StoreError::Conflict(msg)) => {
            debug!(%url, %msg, "page already stored");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };
    debug!(site = %tree.site.url, path = %page.path, code = page.code, "stored page");

    if !html || !(200..300).contains(&page.code) {
        return Ok(Vec::new());
    }
    ctx.indexer.index_page(&page)?;
    Ok(extract_links(&page.content, &fetched.url, &tree.origin, &ctx.settings.skip_extensions))
}

fn fail_site(store: &Store, site: &Site, url: &Url, err: &CrawlError) {
    warn!(site = %site.url, %url, error = %err, "crawl task failed");
    if let Err(e) = store.set_site_status(site.id, SiteStatus::Failed, Some(err.site_message())) {
        warn!(site = %site.url, error = %e, "could not record site failure");
    }
}
