//! Per-session source store.
//!
//! Sources are unique by normalized URL and are only ever appended; content
//! and summaries are attached once and never replaced.

use super::decomposition::SubQuestionId;
use super::planner::QueryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Query parameters that never change page identity.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref", "ref_src"];

/// A source discovered during research.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// URL as first discovered.
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    pub raw_content: Option<String>,
    pub summary: Option<String>,
    pub discovered_by: QueryId,
    pub discovered_by_query: String,
    pub sub_question: SubQuestionId,
    /// Position in the provider's ranked results (0 = best).
    pub rank: usize,
    pub discovered_at: DateTime<Utc>,
    pub scraped_at: Option<DateTime<Utc>>,
    /// Extraction failed permanently for this source.
    pub scrape_failed: bool,
}

impl Source {
    pub fn has_content(&self) -> bool {
        self.raw_content.is_some()
    }

    /// Usable as synthesis evidence.
    pub fn is_usable(&self) -> bool {
        self.raw_content.is_some() || self.summary.is_some()
    }

    pub fn to_ref(&self) -> SourceRef {
        SourceRef {
            url: self.url.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
        }
    }
}

/// The view of a source carried inside events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Normalize a URL into its dedup key.
///
/// Scheme, `www.`, default ports, fragments, trailing slashes and tracking
/// parameters do not distinguish pages.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_lowercase();
    };
    url.set_fragment(None);

    let host = url
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_lowercase())
        .unwrap_or_default();
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    let path = url.path().trim_end_matches('/').to_string();

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    let query = if params.is_empty() {
        String::new()
    } else {
        let joined: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("?{}", joined.join("&"))
    };

    format!("{host}{port}{path}{query}")
}

/// Tracks all sources discovered in a session.
#[derive(Debug, Default)]
pub struct SourceStore {
    sources: Vec<Source>,
    index: HashMap<String, usize>,
}

impl SourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source. Returns false if its normalized URL is already known.
    pub fn insert(&mut self, source: Source) -> bool {
        let key = normalize_url(&source.url);
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.sources.len());
        self.sources.push(source);
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.index.contains_key(&normalize_url(url))
    }

    pub fn get(&self, url: &str) -> Option<&Source> {
        self.index
            .get(&normalize_url(url))
            .map(|&i| &self.sources[i])
    }

    fn get_mut(&mut self, url: &str) -> Option<&mut Source> {
        let i = *self.index.get(&normalize_url(url))?;
        self.sources.get_mut(i)
    }

    /// Attach extracted text. Returns false if the source is unknown or
    /// already has content.
    pub fn attach_content(&mut self, url: &str, content: String, at: DateTime<Utc>) -> bool {
        match self.get_mut(url) {
            Some(source) if source.raw_content.is_none() => {
                source.raw_content = Some(content);
                source.scraped_at = Some(at);
                source.scrape_failed = false;
                true
            }
            _ => false,
        }
    }

    /// Attach a summary. Returns false if the source is unknown or already summarized.
    pub fn attach_summary(&mut self, url: &str, summary: String) -> bool {
        match self.get_mut(url) {
            Some(source) if source.summary.is_none() => {
                source.summary = Some(summary);
                true
            }
            _ => false,
        }
    }

    pub fn mark_scrape_failed(&mut self, url: &str) {
        if let Some(source) = self.get_mut(url) {
            source.scrape_failed = true;
        }
    }

    /// All sources in discovery order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn with_content(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(|s| s.has_content())
    }

    pub fn usable(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(|s| s.is_usable())
    }

    pub fn for_sub_question(&self, id: SubQuestionId) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(move |s| s.sub_question == id)
    }

    pub fn refs(&self) -> Vec<SourceRef> {
        self.sources.iter().map(Source::to_ref).collect()
    }
}

#[cfg(test)]
pub(crate) fn test_source(url: &str) -> Source {
    Source {
        url: url.to_string(),
        title: format!("Title of {url}"),
        snippet: None,
        raw_content: None,
        summary: None,
        discovered_by: QueryId(0),
        discovered_by_query: "q".to_string(),
        sub_question: SubQuestionId(0),
        rank: 0,
        discovered_at: Utc::now(),
        scraped_at: None,
        scrape_failed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url_equivalences() {
        let base = normalize_url("https://example.com/guide");
        assert_eq!(normalize_url("http://www.example.com/guide/"), base);
        assert_eq!(normalize_url("https://EXAMPLE.com/guide#intro"), base);
        assert_eq!(normalize_url("https://example.com:443/guide"), base);
        assert_eq!(
            normalize_url("https://example.com/guide?utm_source=x&fbclid=abc"),
            base
        );
    }

    #[test]
    fn test_normalize_url_keeps_distinguishing_parts() {
        assert_ne!(
            normalize_url("https://example.com/guide?page=2"),
            normalize_url("https://example.com/guide")
        );
        assert_ne!(
            normalize_url("https://example.com/Guide"),
            normalize_url("https://example.com/guide")
        );
        assert_eq!(
            normalize_url("https://example.com/?b=2&a=1"),
            normalize_url("https://example.com?a=1&b=2")
        );
    }

    #[test]
    fn test_normalize_unparseable() {
        assert_eq!(normalize_url("  Not A URL/ "), "not a url");
    }

    #[test]
    fn test_insert_dedups() {
        let mut store = SourceStore::new();
        assert!(store.insert(test_source("https://example.com/a")));
        assert!(!store.insert(test_source("http://www.example.com/a/")));
        assert!(store.insert(test_source("https://example.com/b")));
        assert_eq!(store.len(), 2);
        assert!(store.contains("https://example.com/a#top"));
    }

    #[test]
    fn test_attach_content_once() {
        let mut store = SourceStore::new();
        store.insert(test_source("https://example.com/a"));
        let now = Utc::now();
        assert!(store.attach_content("https://example.com/a", "first".into(), now));
        assert!(!store.attach_content("https://example.com/a", "second".into(), now));
        assert!(!store.attach_content("https://missing.example", "x".into(), now));
        let source = store.get("https://example.com/a").unwrap();
        assert_eq!(source.raw_content.as_deref(), Some("first"));
        assert!(source.scraped_at.is_some());
        assert_eq!(store.with_content().count(), 1);
    }

    #[test]
    fn test_attach_summary_and_usable() {
        let mut store = SourceStore::new();
        store.insert(test_source("https://example.com/a"));
        store.insert(test_source("https://example.com/b"));
        assert_eq!(store.usable().count(), 0);
        assert!(store.attach_summary("https://example.com/b", "sum".into()));
        assert!(!store.attach_summary("https://example.com/b", "again".into()));
        assert_eq!(store.usable().count(), 1);
        assert_eq!(store.refs()[1].summary.as_deref(), Some("sum"));
    }

    #[test]
    fn test_mark_scrape_failed() {
        let mut store = SourceStore::new();
        store.insert(test_source("https://example.com/a"));
        store.mark_scrape_failed("https://example.com/a");
        assert!(store.get("https://example.com/a").unwrap().scrape_failed);
    }
}
