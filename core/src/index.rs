use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type SiteId = u64;
pub type PageId = u64;
pub type LemmaId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteStatus {
    Indexing,
    Indexed,
    Failed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Indexing => "INDEXING",
            SiteStatus::Indexed => "INDEXED",
            SiteStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    /// Root URL exactly as configured; unique across sites.
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub status_time: OffsetDateTime,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    /// Site-relative path including the query string, e.g. `/news?page=2`.
    pub path: String,
    pub code: u16,
    pub content: String,
}

/// A page about to be stored; the id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub site_id: SiteId,
    pub path: String,
    pub code: u16,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lemma {
    pub id: LemmaId,
    pub site_id: SiteId,
    pub text: String,
    /// Number of distinct pages of the site containing the lemma.
    pub frequency: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub page_id: PageId,
    pub lemma_id: LemmaId,
    pub weight: f32, // occurrence count of the lemma on the page
}
