//! Query-time ranking over the stored postings.
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

use crate::config::SearchSettings;
use crate::html::{html_to_text, title};
use crate::origin::origin_of;
use crate::persist::{Store, StoreError};
use crate::snippet::{build_snippet, query_terms, term_pattern, SnippetOptions};
use crate::tokenizer::{analyzer_for, collect_lemmas};
use crate::{Lemma, PageId, Site, SiteId};

lazy_static! {
    /// Ultra-common words dropped from queries, kept in normalised form so they
    /// compare against lemmas directly.
    static ref STOP_LEMMAS: HashSet<String> = {
        let words: &[&str] = &[
            "и", "в", "во", "не", "на", "я", "с", "со", "как", "а", "то", "все", "она", "так", "его", "но",
            "the", "and", "to", "of", "in", "a", "is", "it", "for", "on", "that", "with", "as", "at", "by", "an",
            "be", "this", "from", "or",
        ];
        words
            .iter()
            .filter_map(|w| analyzer_for(w).normal_forms(w).into_iter().next())
            .collect()
    };
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("empty query")]
    EmptyQuery,
    #[error("no meaningful terms")]
    NoMeaningfulTerms,
    #[error("no suitable terms")]
    NoSuitableTerms,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Root URL of the site to search in; all sites when `None`.
    pub site: Option<&'a str>,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub site_root: String,
    pub site_name: String,
    pub path: String,
    pub title: String,
    pub snippet: String,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub total_count: usize,
    pub items: Vec<SearchHit>,
}

#[derive(Clone)]
pub struct SearchEngine {
    store: Store,
    settings: SearchSettings,
}

impl SearchEngine {
    pub fn new(store: Store, settings: SearchSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Find the stored site for a scope URL: exact root first, then by origin.
    fn resolve_site(&self, raw: &str) -> Result<Option<Site>, StoreError> {
        let raw = raw.trim();
        if let Some(site) = self.store.site_by_url(raw)? {
            return Ok(Some(site));
        }
        let Some(wanted) = origin_of(raw) else {
            return Ok(None);
        };
        Ok(self.store.sites()?.into_iter().find(|s| origin_of(&s.url).as_deref() == Some(wanted.as_str())))
    }

    pub fn search(&self, req: &SearchRequest<'_>) -> Result<SearchResults, SearchError> {
        let query = req.query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        let mut wanted: Vec<String> =
            collect_lemmas(query).into_keys().filter(|l| !STOP_LEMMAS.contains(l)).collect();
        if wanted.is_empty() {
            return Err(SearchError::NoMeaningfulTerms);
        }
        wanted.sort();

        let scope: Option<SiteId> = match req.site {
            Some(raw) if !raw.trim().is_empty() => match self.resolve_site(raw)? {
                Some(site) => Some(site.id),
                None => return Ok(SearchResults::default()),
            },
            _ => None,
        };

        let found = self.store.find_lemmas(&wanted, scope)?;
        if found.is_empty() {
            return Ok(SearchResults::default());
        }

        let total_pages = self.store.count_pages(scope)?;
        let threshold = self.settings.too_common_fraction * total_pages as f64;
        let mut kept: Vec<Lemma> = found.into_iter().filter(|l| l.frequency as f64 <= threshold).collect();
        if kept.is_empty() {
            return Err(SearchError::NoSuitableTerms);
        }
        // rarest first keeps the intersections small
        kept.sort_by_key(|l| (l.frequency, l.id));

        let relevance = self.score_pages(&kept)?;
        if relevance.is_empty() {
            return Ok(SearchResults::default());
        }
        let max = relevance.iter().map(|(_, r)| *r).fold(0.0f32, f32::max);
        let max = if max > 0.0 { max } else { 1.0 };

        let mut ranked: Vec<(PageId, f32)> = relevance;
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        let total_count = ranked.len();
        debug!(query, lemmas = kept.len(), candidates = total_count, "ranked search candidates");

        let lemma_texts: Vec<String> = kept.iter().map(|l| l.text.clone()).collect();
        let pattern = term_pattern(&query_terms(&lemma_texts, query));
        let opts = SnippetOptions::from(&self.settings);

        let mut sites: HashMap<SiteId, Site> = HashMap::new();
        let mut items = Vec::new();
        for (page_id, score) in ranked.into_iter().skip(req.offset).take(req.limit) {
            let Some(page) = self.store.page(page_id)? else {
                continue; // removed by a concurrent reindex
            };
            if !sites.contains_key(&page.site_id) {
                match self.store.site(page.site_id)? {
                    Some(site) => {
                        sites.insert(site.id, site);
                    }
                    None => continue,
                }
            }
            let site = &sites[&page.site_id];
            let text = html_to_text(&page.content);
            items.push(SearchHit {
                site_root: site.url.clone(),
                site_name: site.name.clone(),
                path: page.path,
                title: title(&page.content),
                snippet: build_snippet(&text, pattern.as_ref(), &opts),
                relevance_score: score / max,
            });
        }

        Ok(SearchResults { total_count, items })
    }

    /// Per site, intersect the posting sets of that site's lemmas and sum the
    /// weights on each surviving page. Results of all sites are unioned.
    fn score_pages(&self, lemmas: &[Lemma]) -> Result<Vec<(PageId, f32)>, StoreError> {
        let mut by_site: BTreeMap<SiteId, Vec<&Lemma>> = BTreeMap::new();
        for lemma in lemmas {
            by_site.entry(lemma.site_id).or_default().push(lemma);
        }

        let mut scored = Vec::new();
        for site_lemmas in by_site.values() {
            let mut postings = Vec::with_capacity(site_lemmas.len());
            for lemma in site_lemmas {
                let pages = self.store.lemma_pages(lemma.id)?;
                if !pages.is_empty() {
                    postings.push(pages);
                }
            }
            let Some((first, rest)) = postings.split_first() else {
                continue;
            };
            for (&page_id, &weight) in first {
                if !rest.iter().all(|p| p.contains_key(&page_id)) {
                    continue;
                }
                let score = weight + rest.iter().map(|p| p[&page_id]).sum::<f32>();
                scored.push((page_id, score));
            }
        }
        Ok(scored)
    }
}
