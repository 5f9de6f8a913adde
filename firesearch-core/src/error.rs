//! Error types for the FireSearch core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the model service, search/extraction providers, configuration
//! and the research session itself. Every error maps onto an [`ErrorKind`]
//! tag, which is what travels to the caller inside `error` events.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Coarse error classification carried by terminal `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    ProviderUnavailable,
    Timeout,
    MalformedResponse,
    BudgetExhausted,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProviderUnavailable => "provider-unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MalformedResponse => "malformed-response",
            ErrorKind::BudgetExhausted => "budget-exhausted",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for the FireSearch core library.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No usable sources were gathered for synthesis")]
    NoUsableSources,

    #[error("Synthesis produced an empty answer")]
    EmptyAnswer,

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Research budget exhausted: {message}")]
    BudgetExhausted { message: String },

    #[error("Research session was cancelled")]
    Cancelled,
}

impl ResearchError {
    /// Map this error onto the tag reported to the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResearchError::Llm(e) => e.kind(),
            ResearchError::Provider(e) => e.kind(),
            ResearchError::Config(_) => ErrorKind::ProviderUnavailable,
            ResearchError::NoUsableSources => ErrorKind::ProviderUnavailable,
            ResearchError::EmptyAnswer => ErrorKind::MalformedResponse,
            ResearchError::InvalidTransition { .. } => ErrorKind::MalformedResponse,
            ResearchError::BudgetExhausted { .. } => ErrorKind::BudgetExhausted,
            ResearchError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Errors from model service interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

impl LlmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::ResponseParse { .. } => ErrorKind::MalformedResponse,
            LlmError::Timeout { .. } => ErrorKind::Timeout,
            LlmError::ApiRequest { .. }
            | LlmError::Streaming { .. }
            | LlmError::AuthFailed { .. }
            | LlmError::RateLimited { .. }
            | LlmError::Connection { .. } => ErrorKind::ProviderUnavailable,
        }
    }
}

/// Errors from the search and content-extraction providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} is unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("{provider} request timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("{provider} returned a malformed response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("{provider} rejected the request with HTTP {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed for {provider}")]
    AuthFailed { provider: String },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Timeout { .. } => ErrorKind::Timeout,
            ProviderError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            ProviderError::Unavailable { .. }
            | ProviderError::Http { .. }
            | ProviderError::AuthFailed { .. } => ErrorKind::ProviderUnavailable,
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Convenience type alias for results using `ResearchError`.
pub type Result<T> = std::result::Result<T, ResearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResearchError::Llm(LlmError::RateLimited {
            retry_after_secs: 30,
        });
        assert_eq!(
            err.to_string(),
            "LLM error: Rate limited by provider, retry after 30s"
        );
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Timeout {
            provider: "firecrawl".into(),
            timeout_ms: 15_000,
        };
        assert_eq!(
            err.to_string(),
            "firecrawl request timed out after 15000ms"
        );
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            ResearchError::from(LlmError::ResponseParse {
                message: "bad".into()
            })
            .kind(),
            ErrorKind::MalformedResponse
        );
        assert_eq!(
            ResearchError::from(ProviderError::Timeout {
                provider: "x".into(),
                timeout_ms: 1
            })
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ResearchError::from(LlmError::AuthFailed {
                provider: "openai".into()
            })
            .kind(),
            ErrorKind::ProviderUnavailable
        );
        assert_eq!(ResearchError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            ResearchError::BudgetExhausted {
                message: "queries".into()
            }
            .kind(),
            ErrorKind::BudgetExhausted
        );
    }

    #[test]
    fn test_error_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::ProviderUnavailable).unwrap();
        assert_eq!(json, "\"provider-unavailable\"");
        assert_eq!(ErrorKind::MalformedResponse.to_string(), "malformed-response");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::EnvVarMissing {
            var: "FIRECRAWL_API_KEY".into(),
        };
        assert_eq!(
            err.to_string(),
            "Environment variable not set: FIRECRAWL_API_KEY"
        );
    }
}
