//! Provider implementations.
//!
//! Concrete implementations of the capability traits:
//! - `LlmProvider` for OpenAI-compatible chat completion APIs
//! - `SearchProvider` + `ScrapeProvider` for the Firecrawl API
//! - `ScrapeProvider` for plain HTTP fetching with HTML text extraction
//!
//! Use `create_llm_provider()` and `create_web_providers()` to build them from config.

pub mod fetch;
pub mod firecrawl;
pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{FirecrawlConfig, LlmConfig, SearchConfig};
use crate::error::{LlmError, ProviderError};
use crate::web::{ScrapeProvider, SearchProvider};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use crate::config::RetryConfig;
pub use fetch::HttpFetchScraper;
pub use firecrawl::FirecrawlClient;
pub use openai_compat::OpenAiCompatibleProvider;

/// Classifies an error as worth retrying.
pub trait Transient: std::fmt::Display {
    fn is_transient(&self) -> bool;

    /// Server-requested delay before the next attempt, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Streaming { .. }
                | LlmError::Connection { .. }
                | LlmError::Timeout { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        match self {
            ProviderError::Unavailable { .. } | ProviderError::Timeout { .. } => true,
            ProviderError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderError::MalformedResponse { .. } | ProviderError::AuthFailed { .. } => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries up to `config.max_retries` times; permanent errors (auth, parse)
/// return immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_transient() || attempt >= config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Compute backoff delay, respecting server retry-after hints.
fn compute_backoff<E: Transient>(config: &RetryConfig, attempt: u32, err: &E) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    match err.retry_after() {
        Some(server) => (server.as_millis() as u64).max(computed),
        None => computed,
    }
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Create the model provider named in config.
pub fn create_llm_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openai" | "openai-compatible" | "ollama" | "azure" => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
        other => {
            tracing::warn!(
                provider = other,
                "Unknown provider, treating as OpenAI-compatible"
            );
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
    }
}

/// Create the search and extraction providers.
pub fn create_web_providers(
    firecrawl: &FirecrawlConfig,
    search: &SearchConfig,
) -> Result<(Arc<dyn SearchProvider>, Arc<dyn ScrapeProvider>), ProviderError> {
    let client = Arc::new(FirecrawlClient::new(firecrawl, search)?);
    let scraper: Arc<dyn ScrapeProvider> = if firecrawl.use_http_fetch {
        Arc::new(HttpFetchScraper::new()?)
    } else {
        client.clone()
    };
    Ok((client, scraper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_llm_error_transient() {
        assert!(LlmError::RateLimited { retry_after_secs: 30 }.is_transient());
        assert!(
            LlmError::Connection {
                message: "reset".into()
            }
            .is_transient()
        );
        assert!(LlmError::Timeout { timeout_secs: 30 }.is_transient());
        assert!(
            !LlmError::AuthFailed {
                provider: "test".into()
            }
            .is_transient()
        );
        assert!(
            !LlmError::ResponseParse {
                message: "bad json".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_provider_error_transient() {
        let http = |status| ProviderError::Http {
            provider: "firecrawl".into(),
            status,
            message: String::new(),
        };
        assert!(http(503).is_transient());
        assert!(http(429).is_transient());
        assert!(!http(404).is_transient());
        assert!(
            !ProviderError::MalformedResponse {
                provider: "firecrawl".into(),
                message: "no data".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1000);
        assert_eq!(compute_exponential_backoff(&config, 1), 2000);
        assert_eq!(compute_exponential_backoff(&config, 2), 4000);
    }

    #[test]
    fn test_compute_backoff_respects_cap() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 3000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 2), 3000);
    }

    #[test]
    fn test_compute_backoff_rate_limit_uses_server_value() {
        let config = fast_retry(3);
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 30_000);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let result = with_retry(&fast_retry(3), || async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_retry(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(LlmError::AuthFailed {
                provider: "test".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_retry(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(ProviderError::Timeout {
                provider: "scrape".into(),
                timeout_ms: 10,
            })
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_retry(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ProviderError::Unavailable {
                    provider: "search".into(),
                    message: "503".into(),
                })
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }
}
