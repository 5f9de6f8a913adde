//! Web capabilities: search and content extraction.
//!
//! The research pipeline only sees these two traits. Concrete HTTP
//! implementations live in [`crate::providers`]; the static providers here
//! serve tests and offline runs.

use crate::brain::lock;
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// A single ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    /// Page text when the provider returns it alongside results.
    pub content: Option<String>,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: None,
            content: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Text extracted from a page.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedPage {
    pub content: String,
    pub title: Option<String>,
}

/// "Given a query, return ranked source URLs with snippets."
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ProviderError>;

    fn name(&self) -> &str;
}

/// "Given a URL, return extracted text."
#[async_trait]
pub trait ScrapeProvider: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, ProviderError>;

    fn name(&self) -> &str;
}

/// In-memory search provider keyed by exact query text.
#[derive(Default)]
pub struct StaticSearchProvider {
    results: HashMap<String, Vec<SearchHit>>,
    failing: Vec<String>,
    default_hits: Vec<SearchHit>,
    calls: Mutex<Vec<String>>,
}

impl StaticSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `hits` for `query`.
    pub fn with_results(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.results.insert(query.to_string(), hits);
        self
    }

    /// Return `hits` for any query without a specific entry.
    pub fn with_default(mut self, hits: Vec<SearchHit>) -> Self {
        self.default_hits = hits;
        self
    }

    /// Fail every search for `query`.
    pub fn failing(mut self, query: &str) -> Self {
        self.failing.push(query.to_string());
        self
    }

    /// Queries received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ProviderError> {
        lock(&self.calls).push(query.to_string());
        if self.failing.iter().any(|q| q == query) {
            return Err(ProviderError::Unavailable {
                provider: "static-search".to_string(),
                message: "scripted failure".to_string(),
            });
        }
        let hits = self.results.get(query).unwrap_or(&self.default_hits);
        Ok(hits.iter().take(limit).cloned().collect())
    }

    fn name(&self) -> &str {
        "static-search"
    }
}

/// Scripted behavior for one URL of [`StaticScrapeProvider`].
#[derive(Debug, Clone)]
pub enum ScrapeBehavior {
    Content(String),
    /// Never answers within any sane timeout.
    Hang,
    Fail,
}

/// In-memory extraction provider with per-URL behavior.
pub struct StaticScrapeProvider {
    pages: HashMap<String, ScrapeBehavior>,
    fallback: ScrapeBehavior,
    calls: Mutex<Vec<String>>,
}

impl StaticScrapeProvider {
    /// Every URL returns `content` unless overridden.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            pages: HashMap::new(),
            fallback: ScrapeBehavior::Content(content.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page(mut self, url: &str, behavior: ScrapeBehavior) -> Self {
        self.pages.insert(url.to_string(), behavior);
        self
    }

    /// URLs requested so far, one entry per attempt.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ScrapeProvider for StaticScrapeProvider {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, ProviderError> {
        lock(&self.calls).push(url.to_string());
        match self.pages.get(url).unwrap_or(&self.fallback) {
            ScrapeBehavior::Content(content) => Ok(ScrapedPage {
                content: content.clone(),
                title: None,
            }),
            ScrapeBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::Timeout {
                    provider: "static-scrape".to_string(),
                    timeout_ms: 3_600_000,
                })
            }
            ScrapeBehavior::Fail => Err(ProviderError::Unavailable {
                provider: "static-scrape".to_string(),
                message: "scripted failure".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "static-scrape"
    }
}
