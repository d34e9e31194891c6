//! Embedded storage for sites, pages, lemmas and postings.
//!
//! Each relation lives in its own sled tree keyed by big-endian ids, with
//! secondary trees for the unique keys: (site, path) for pages and
//! (site, text) for lemmas. Postings are kept twice, once grouped by page and
//! once grouped by lemma, so both directions are a prefix scan. Lemma
//! frequencies sit in their own tree so they can be bumped atomically.
use crate::{Lemma, LemmaId, NewPage, Page, PageId, Posting, Site, SiteId, SiteStatus};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;
use time::OffsetDateTime;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Sled(#[from] sled::Error),
    #[error("record encoding failure: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt {0} value")]
    Corrupt(&'static str),
    #[error("constraint violated: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    Missing(&'static str),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Serialize, Deserialize)]
struct LemmaRecord {
    site_id: SiteId,
    text: String,
}

#[derive(Clone)]
pub struct Store {
    db: Db,
    sites: Tree,
    site_urls: Tree,
    pages: Tree,
    page_paths: Tree,
    lemmas: Tree,
    lemma_keys: Tree,
    lemma_freqs: Tree,
    page_postings: Tree,
    lemma_postings: Tree,
}

fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn scoped_key(scope: u64, text: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + text.len());
    key.extend_from_slice(&scope.to_be_bytes());
    key.extend_from_slice(text.as_bytes());
    key
}

fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}

fn read_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Corrupt("id"))?;
    Ok(u64::from_be_bytes(arr))
}

fn read_f32(bytes: &[u8]) -> Result<f32> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| StoreError::Corrupt("weight"))?;
    Ok(f32::from_be_bytes(arr))
}

/// Second half of a 16 byte pair key.
fn pair_tail(key: &[u8]) -> Result<u64> {
    key.get(8..16).ok_or(StoreError::Corrupt("posting key")).and_then(read_u64)
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway store removed from disk on drop.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            sites: db.open_tree("sites")?,
            site_urls: db.open_tree("site_urls")?,
            pages: db.open_tree("pages")?,
            page_paths: db.open_tree("page_paths")?,
            lemmas: db.open_tree("lemmas")?,
            lemma_keys: db.open_tree("lemma_keys")?,
            lemma_freqs: db.open_tree("lemma_freqs")?,
            page_postings: db.open_tree("page_postings")?,
            lemma_postings: db.open_tree("lemma_postings")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // --- sites ---

    pub fn site(&self, id: SiteId) -> Result<Option<Site>> {
        match self.sites.get(id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn site_by_url(&self, url: &str) -> Result<Option<Site>> {
        match self.site_urls.get(url.as_bytes())? {
            Some(id) => self.site(read_u64(&id)?),
            None => Ok(None),
        }
    }

    pub fn sites(&self) -> Result<Vec<Site>> {
        let mut out = Vec::new();
        for item in self.sites.iter() {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// Return the site with this root URL, creating it in INDEXING state if absent.
    pub fn ensure_site(&self, url: &str, name: &str) -> Result<Site> {
        if let Some(site) = self.site_by_url(url)? {
            return Ok(site);
        }
        let site = Site {
            id: self.db.generate_id()?,
            url: url.to_string(),
            name: name.to_string(),
            status: SiteStatus::Indexing,
            status_time: OffsetDateTime::now_utc(),
            last_error: None,
        };
        self.sites.insert(id_key(site.id), bincode::serialize(&site)?)?;
        let claimed = self
            .site_urls
            .compare_and_swap(url.as_bytes(), None::<&[u8]>, Some(&id_key(site.id)[..]))?;
        if claimed.is_err() {
            // lost a race with another creator
            self.sites.remove(id_key(site.id))?;
            return self.site_by_url(url)?.ok_or(StoreError::Missing("site"));
        }
        Ok(site)
    }

    /// Apply `f` to the stored site with compare-and-swap retries.
    /// `f` returns false to leave the row untouched.
    fn modify_site<F>(&self, id: SiteId, mut f: F) -> Result<(Site, bool)>
    where
        F: FnMut(&mut Site) -> bool,
    {
        let key = id_key(id);
        loop {
            let old = self.sites.get(key)?.ok_or(StoreError::Missing("site"))?;
            let mut site: Site = bincode::deserialize(&old)?;
            if !f(&mut site) {
                return Ok((site, false));
            }
            let new = bincode::serialize(&site)?;
            if self.sites.compare_and_swap(key, Some(&old), Some(new))?.is_ok() {
                return Ok((site, true));
            }
        }
    }

    pub fn set_site_status(&self, id: SiteId, status: SiteStatus, error: Option<String>) -> Result<Site> {
        let (site, _) = self.modify_site(id, |site| {
            site.status = status;
            site.last_error = error.clone();
            site.status_time = OffsetDateTime::now_utc();
            true
        })?;
        Ok(site)
    }

    /// Move the site to `to` only if it is currently in `from`. Returns whether it moved.
    pub fn transition_site(&self, id: SiteId, from: SiteStatus, to: SiteStatus, error: Option<String>) -> Result<bool> {
        let (_, moved) = self.modify_site(id, |site| {
            if site.status != from {
                return false;
            }
            site.status = to;
            site.last_error = error.clone();
            site.status_time = OffsetDateTime::now_utc();
            true
        })?;
        Ok(moved)
    }

    /// Delete every page, lemma and posting belonging to the site. The site row stays.
    pub fn purge_site(&self, id: SiteId) -> Result<()> {
        let prefix = id_key(id);
        for item in self.page_paths.scan_prefix(prefix) {
            let (path_key, page_id) = item?;
            let page_id = read_u64(&page_id)?;
            for posting in self.page_postings.scan_prefix(id_key(page_id)) {
                let (key, _) = posting?;
                let lemma_id = pair_tail(&key)?;
                self.lemma_postings.remove(pair_key(lemma_id, page_id))?;
                self.page_postings.remove(key)?;
            }
            self.pages.remove(id_key(page_id))?;
            self.page_paths.remove(path_key)?;
        }
        for item in self.lemma_keys.scan_prefix(prefix) {
            let (text_key, lemma_id) = item?;
            self.lemmas.remove(&lemma_id)?;
            self.lemma_freqs.remove(&lemma_id)?;
            self.lemma_keys.remove(text_key)?;
        }
        Ok(())
    }

    // --- pages ---

    pub fn page(&self, id: PageId) -> Result<Option<Page>> {
        match self.pages.get(id_key(id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn page_by_path(&self, site_id: SiteId, path: &str) -> Result<Option<Page>> {
        match self.page_paths.get(scoped_key(site_id, path))? {
            Some(id) => self.page(read_u64(&id)?),
            None => Ok(None),
        }
    }

    /// Store a new page, claiming its (site, path) key. A taken key is a conflict.
    pub fn insert_page(&self, page: NewPage) -> Result<Page> {
        let id = self.db.generate_id()?;
        let claimed = self.page_paths.compare_and_swap(
            scoped_key(page.site_id, &page.path),
            None::<&[u8]>,
            Some(&id_key(id)[..]),
        )?;
        if claimed.is_err() {
            return Err(StoreError::Conflict(format!("duplicate page path {}", page.path)));
        }
        let stored = Page { id, site_id: page.site_id, path: page.path, code: page.code, content: page.content };
        self.pages.insert(id_key(id), bincode::serialize(&stored)?)?;
        Ok(stored)
    }

    /// Delete a page and its postings, first taking the page out of every
    /// affected lemma's frequency.
    pub fn remove_page(&self, id: PageId) -> Result<Option<Page>> {
        let Some(page) = self.page(id)? else {
            return Ok(None);
        };
        self.clear_page_postings(id)?;
        self.pages.remove(id_key(id))?;
        self.page_paths.remove(scoped_key(page.site_id, &page.path))?;
        Ok(Some(page))
    }

    pub fn count_pages(&self, site: Option<SiteId>) -> Result<u64> {
        match site {
            Some(id) => Ok(self.page_paths.scan_prefix(id_key(id)).count() as u64),
            None => Ok(self.pages.len() as u64),
        }
    }

    // --- lemmas ---

    /// Id of the site's lemma `text`, created with frequency 0 if absent.
    pub fn lemma_id(&self, site_id: SiteId, text: &str) -> Result<LemmaId> {
        let key = scoped_key(site_id, text);
        if let Some(id) = self.lemma_keys.get(&key)? {
            return read_u64(&id);
        }
        let id = self.db.generate_id()?;
        let record = LemmaRecord { site_id, text: text.to_string() };
        self.lemmas.insert(id_key(id), bincode::serialize(&record)?)?;
        self.lemma_freqs.insert(id_key(id), &0u64.to_be_bytes()[..])?;
        if self.lemma_keys.compare_and_swap(&key, None::<&[u8]>, Some(&id_key(id)[..]))?.is_err() {
            self.lemmas.remove(id_key(id))?;
            self.lemma_freqs.remove(id_key(id))?;
            let existing = self.lemma_keys.get(&key)?.ok_or(StoreError::Missing("lemma"))?;
            return read_u64(&existing);
        }
        Ok(id)
    }

    /// Atomically add `delta` to a lemma's frequency, never going below zero.
    fn bump_lemma(&self, id: LemmaId, delta: i64) -> Result<u64> {
        let updated = self.lemma_freqs.update_and_fetch(id_key(id), |old| {
            old.map(|bytes| {
                let current = <[u8; 8]>::try_from(bytes).map(u64::from_be_bytes).unwrap_or(0);
                let next = if delta >= 0 {
                    current.saturating_add(delta as u64)
                } else {
                    current.saturating_sub(delta.unsigned_abs())
                };
                next.to_be_bytes().to_vec()
            })
        })?;
        read_u64(&updated.ok_or(StoreError::Missing("lemma"))?)
    }

    pub fn increment_lemma(&self, id: LemmaId) -> Result<u64> {
        self.bump_lemma(id, 1)
    }

    pub fn decrement_lemma(&self, id: LemmaId) -> Result<u64> {
        self.bump_lemma(id, -1)
    }

    pub fn lemma(&self, id: LemmaId) -> Result<Option<Lemma>> {
        let Some(bytes) = self.lemmas.get(id_key(id))? else {
            return Ok(None);
        };
        let record: LemmaRecord = bincode::deserialize(&bytes)?;
        let frequency = match self.lemma_freqs.get(id_key(id))? {
            Some(f) => read_u64(&f)?,
            None => 0,
        };
        Ok(Some(Lemma { id, site_id: record.site_id, text: record.text, frequency }))
    }

    pub fn find_lemma(&self, site_id: SiteId, text: &str) -> Result<Option<Lemma>> {
        match self.lemma_keys.get(scoped_key(site_id, text))? {
            Some(id) => self.lemma(read_u64(&id)?),
            None => Ok(None),
        }
    }

    /// Lemma rows matching any of `texts`, in one site or across all sites.
    pub fn find_lemmas(&self, texts: &[String], site: Option<SiteId>) -> Result<Vec<Lemma>> {
        let site_ids = match site {
            Some(id) => vec![id],
            None => self.sites()?.into_iter().map(|s| s.id).collect(),
        };
        let mut out = Vec::new();
        for site_id in site_ids {
            for text in texts {
                if let Some(lemma) = self.find_lemma(site_id, text)? {
                    out.push(lemma);
                }
            }
        }
        Ok(out)
    }

    pub fn count_lemmas(&self, site: Option<SiteId>) -> Result<u64> {
        match site {
            Some(id) => Ok(self.lemma_keys.scan_prefix(id_key(id)).count() as u64),
            None => Ok(self.lemmas.len() as u64),
        }
    }

    // --- postings ---

    /// Insert or overwrite the posting for (page, lemma).
    pub fn put_posting(&self, posting: Posting) -> Result<()> {
        let weight = posting.weight.to_be_bytes();
        self.page_postings.insert(pair_key(posting.page_id, posting.lemma_id), &weight[..])?;
        self.lemma_postings.insert(pair_key(posting.lemma_id, posting.page_id), &weight[..])?;
        Ok(())
    }

    /// Drop every posting of the page, decrementing each lemma's frequency once.
    /// Returns how many postings this call removed; a posting already taken by
    /// a concurrent caller is not decremented again.
    pub fn clear_page_postings(&self, page_id: PageId) -> Result<usize> {
        let mut removed = 0;
        for posting in self.page_postings(page_id)? {
            if self.page_postings.remove(pair_key(page_id, posting.lemma_id))?.is_none() {
                continue;
            }
            self.lemma_postings.remove(pair_key(posting.lemma_id, page_id))?;
            self.decrement_lemma(posting.lemma_id)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn page_postings(&self, page_id: PageId) -> Result<Vec<Posting>> {
        let mut out = Vec::new();
        for item in self.page_postings.scan_prefix(id_key(page_id)) {
            let (key, weight) = item?;
            out.push(Posting { page_id, lemma_id: pair_tail(&key)?, weight: read_f32(&weight)? });
        }
        Ok(out)
    }

    /// Pages carrying the lemma, with their posting weight.
    pub fn lemma_pages(&self, lemma_id: LemmaId) -> Result<HashMap<PageId, f32>> {
        let mut out = HashMap::new();
        for item in self.lemma_postings.scan_prefix(id_key(lemma_id)) {
            let (key, weight) = item?;
            out.insert(pair_tail(&key)?, read_f32(&weight)?);
        }
        Ok(out)
    }
}
