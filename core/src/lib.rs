pub mod config;
pub mod html;
pub mod index;
pub mod origin;
pub mod persist;
pub mod search;
pub mod snippet;
pub mod tokenizer;

pub use index::{Lemma, LemmaId, NewPage, Page, PageId, Posting, Site, SiteId, SiteStatus};
pub use persist::{Store, StoreError};
