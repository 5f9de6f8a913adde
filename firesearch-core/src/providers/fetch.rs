//! Plain HTTP extraction: fetch a page and strip it down to readable text.

use crate::error::ProviderError;
use crate::web::{ScrapeProvider, ScrapedPage};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const PROVIDER: &str = "http-fetch";

/// Tags after which a line break is inserted.
const BLOCK_TAGS: &[&str] = &[
    "p", "/p", "br", "div", "/div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "/h1", "/h2",
    "/h3", "/h4", "/h5", "/h6", "section", "/section", "article", "/article",
];

/// Extraction provider that downloads HTML directly.
pub struct HttpFetchScraper {
    client: Client,
}

impl HttpFetchScraper {
    pub fn new() -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("FireSearch/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ProviderError::Unavailable {
                provider: PROVIDER.to_string(),
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScrapeProvider for HttpFetchScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, ProviderError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    provider: PROVIDER.to_string(),
                    timeout_ms: 30_000,
                }
            } else {
                ProviderError::Unavailable {
                    provider: PROVIDER.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                message: format!("GET {} failed", url),
            });
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| ct.contains("html"));

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Unavailable {
                provider: PROVIDER.to_string(),
                message: format!("Failed to read body: {}", e),
            })?;

        if is_html {
            Ok(ScrapedPage {
                title: extract_title(&body),
                content: extract_text_from_html(&body),
            })
        } else {
            Ok(ScrapedPage {
                content: body,
                title: None,
            })
        }
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    let start = lower.find("<title")?;
    let open_end = start + lower[start..].find('>')? + 1;
    let close = open_end + lower[open_end..].find("</title>")?;
    let title = html.get(open_end..close)?.trim();
    (!title.is_empty()).then(|| decode_entities(title))
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Strip tags, scripts and styles; keep block structure as line breaks.
pub fn extract_text_from_html(html: &str) -> String {
    let mut text = String::new();
    let mut in_tag = false;
    let mut building_tag = false;
    let mut skip_depth = 0usize;
    let mut tag_name = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                building_tag = true;
                tag_name.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                building_tag = false;
                let tag = tag_name.to_lowercase();
                match tag.as_str() {
                    "script" | "style" | "noscript" => skip_depth += 1,
                    "/script" | "/style" | "/noscript" => skip_depth = skip_depth.saturating_sub(1),
                    _ => {}
                }
                if BLOCK_TAGS.contains(&tag.as_str()) {
                    text.push('\n');
                }
            }
            _ if in_tag => {
                if building_tag && (ch.is_alphanumeric() || ch == '/') {
                    tag_name.push(ch);
                } else {
                    building_tag = false;
                }
            }
            _ if skip_depth > 0 => {}
            _ => text.push(ch),
        }
    }

    decode_entities(&text)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
