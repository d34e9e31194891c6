//! Turns stored pages into lemma statistics.
//!
//! Frequencies count pages, not occurrences: each lemma found on a page bumps
//! its site-wide frequency exactly once, and the page's posting carries the
//! in-page occurrence count. Re-indexing a page first takes its previous
//! contribution back out.
use search_core::tokenizer::collect_html_lemmas;
use search_core::{NewPage, Page, PageId, Posting, SiteId, Store, StoreError};
use tracing::debug;

#[derive(Clone)]
pub struct PageIndexer {
    store: Store,
}

impl PageIndexer {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Index the visible text of `html` as the content of `page_id`.
    /// Returns the number of distinct lemmas written.
    pub fn index_html(&self, site_id: SiteId, page_id: PageId, html: &str) -> Result<usize, StoreError> {
        let rolled_back = self.store.clear_page_postings(page_id)?;
        let lemmas = collect_html_lemmas(html);
        for (text, count) in &lemmas {
            let lemma_id = self.store.lemma_id(site_id, text)?;
            self.store.increment_lemma(lemma_id)?;
            self.store.put_posting(Posting { page_id, lemma_id, weight: *count as f32 })?;
        }
        debug!(page_id, lemmas = lemmas.len(), rolled_back, "indexed page");
        Ok(lemmas.len())
    }

    pub fn index_page(&self, page: &Page) -> Result<usize, StoreError> {
        self.index_html(page.site_id, page.id, &page.content)
    }

    /// Store `page`, first removing whatever page already sits at its
    /// (site, path) along with that page's lemma contribution.
    pub fn replace_page(&self, page: NewPage) -> Result<Page, StoreError> {
        if let Some(old) = self.store.page_by_path(page.site_id, &page.path)? {
            debug!(page_id = old.id, path = %old.path, "replacing stored page");
            self.store.remove_page(old.id)?;
        }
        self.store.insert_page(page)
    }
}
