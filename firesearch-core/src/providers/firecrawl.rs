//! Firecrawl API client for search and content extraction.
//!
//! Implements both `SearchProvider` (`POST /search`) and `ScrapeProvider`
//! (`POST /scrape`, Markdown output).

use crate::config::{FirecrawlConfig, SearchConfig};
use crate::error::ProviderError;
use crate::web::{ScrapeProvider, ScrapedPage, SearchHit, SearchProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const PROVIDER: &str = "firecrawl";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    success: bool,
    #[serde(default)]
    data: Vec<SearchItem>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    markdown: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    success: bool,
    #[serde(default)]
    data: Option<ScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    metadata: Option<ScrapeMetadata>,
}

#[derive(Debug, Deserialize)]
struct ScrapeMetadata {
    #[serde(default)]
    title: Option<String>,
}

/// HTTP client for the Firecrawl v1 API.
pub struct FirecrawlClient {
    client: Client,
    base_url: String,
    api_key: String,
    scrape_timeout: Duration,
}

impl FirecrawlClient {
    /// Reads the API key from the environment variable named in config.
    pub fn new(config: &FirecrawlConfig, search: &SearchConfig) -> Result<Self, ProviderError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| ProviderError::AuthFailed {
                provider: format!("{}: env var '{}' not set", PROVIDER, config.api_key_env),
            })?;
        Self::new_with_key(config, search, api_key)
    }

    pub fn new_with_key(
        config: &FirecrawlConfig,
        search: &SearchConfig,
        api_key: String,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(search.search_timeout().max(search.scrape_timeout()))
            .user_agent(concat!("FireSearch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Unavailable {
                provider: PROVIDER.to_string(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            scrape_timeout: search.scrape_timeout(),
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Sending Firecrawl request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        provider: PROVIDER.to_string(),
                        timeout_ms: self.scrape_timeout.as_millis() as u64,
                    }
                } else {
                    ProviderError::Unavailable {
                        provider: PROVIDER.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Unavailable {
                provider: PROVIDER.to_string(),
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(map_http_error(status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| ProviderError::MalformedResponse {
            provider: PROVIDER.to_string(),
            message: e.to_string(),
        })
    }
}

fn map_http_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        408 => ProviderError::Timeout {
            provider: PROVIDER.to_string(),
            timeout_ms: 0,
        },
        _ => ProviderError::Http {
            provider: PROVIDER.to_string(),
            status,
            message: body.chars().take(200).collect(),
        },
    }
}

fn search_hits(response: SearchResponse) -> Result<Vec<SearchHit>, ProviderError> {
    if !response.success {
        return Err(ProviderError::Unavailable {
            provider: PROVIDER.to_string(),
            message: response
                .error
                .unwrap_or_else(|| "search unsuccessful".to_string()),
        });
    }
    Ok(response
        .data
        .into_iter()
        .map(|item| SearchHit {
            title: item
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| item.url.clone()),
            url: item.url,
            snippet: item.description,
            content: item.markdown,
        })
        .collect())
}

fn scraped_page(response: ScrapeResponse) -> Result<ScrapedPage, ProviderError> {
    if !response.success {
        return Err(ProviderError::Unavailable {
            provider: PROVIDER.to_string(),
            message: response
                .error
                .unwrap_or_else(|| "scrape unsuccessful".to_string()),
        });
    }
    let data = response
        .data
        .ok_or_else(|| ProviderError::MalformedResponse {
            provider: PROVIDER.to_string(),
            message: "scrape response has no data".to_string(),
        })?;
    Ok(ScrapedPage {
        content: data.markdown.unwrap_or_default(),
        title: data.metadata.and_then(|m| m.title),
    })
}

#[async_trait]
impl SearchProvider for FirecrawlClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, ProviderError> {
        let response: SearchResponse = self
            .post("search", json!({ "query": query, "limit": limit }))
            .await?;
        let mut hits = search_hits(response)?;
        hits.truncate(limit);
        Ok(hits)
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[async_trait]
impl ScrapeProvider for FirecrawlClient {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, ProviderError> {
        let response: ScrapeResponse = self
            .post(
                "scrape",
                json!({
                    "url": url,
                    "formats": ["markdown"],
                    "onlyMainContent": true,
                    "timeout": self.scrape_timeout.as_millis() as u64,
                }),
            )
            .await?;
        scraped_page(response)
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
