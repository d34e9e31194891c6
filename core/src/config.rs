use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
    #[serde(default)]
    pub crawler: CrawlerSettings,
    #[serde(default)]
    pub search: SearchSettings,
}

impl Settings {
    /// Load settings from a JSON file; every section falls back to its defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("opening settings {}", path.display()))?;
        let settings: Settings = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parsing settings {}", path.display()))?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerSettings {
    pub user_agent: String,
    pub referrer: String,
    pub timeout_secs: u64,
    /// Upper bound on pages being fetched and indexed at the same time.
    pub max_concurrency: usize,
    pub max_path_len: usize,
    /// Keep a page row for non-HTML responses even though nothing is indexed from it.
    pub store_non_html: bool,
    pub skip_extensions: Vec<String>,
}

impl Default for CrawlerSettings {
    fn default() -> Self {
        Self {
            user_agent: "sitesearch-bot/0.1 (+https://example.com/bot)".into(),
            referrer: "https://www.google.com".into(),
            timeout_secs: 30,
            max_concurrency: 16,
            max_path_len: 512,
            store_non_html: true,
            skip_extensions: [
                "jpg", "jpeg", "png", "gif", "webp", "svg", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
                "zip", "rar",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Lemmas found on more than this share of the scope's pages are ignored.
    pub too_common_fraction: f64,
    pub snippet_half_window: usize,
    pub snippet_max_fragments: usize,
    pub snippet_max_len: usize,
    pub default_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            too_common_fraction: 0.6,
            snippet_half_window: 80,
            snippet_max_fragments: 2,
            snippet_max_len: 320,
            default_limit: 20,
        }
    }
}
