//! # FireSearch Core
//!
//! Core library for the FireSearch research engine.
//! Provides the research pipeline (decomposition, query planning, search
//! and scraping, confidence scoring, synthesis), the model gateway
//! (brain), web provider adapters, configuration, and industry question
//! generation.

pub mod brain;
pub mod config;
pub mod error;
pub mod providers;
pub mod questions;
pub mod research;
pub mod summarizer;
pub mod types;
pub mod web;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider, ModelTier};
pub use config::{FireSearchConfig, QuestionConfig, RetryConfig, SearchConfig, load_config};
pub use error::{ErrorKind, LlmError, ProviderError, ResearchError, Result};
pub use questions::{IndustryQuestions, InMemoryQuestionStore, QuestionGenerator, QuestionStore};
pub use research::{
    DisplayState, EventSink, Phase, ResearchEngine, ResearchHandle, SearchEvent, SessionReport,
    SourceRef, fold, normalize_url,
};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StreamEvent, TokenUsage};
pub use web::{ScrapeProvider, SearchHit, SearchProvider};
