//! Per-source summarization.
//!
//! Each scraped page is condensed into a short summary, bounded to a fixed
//! character budget, which stands in for the page when its full text is too
//! long for the synthesis prompt. When the model is unavailable the summary
//! degrades to a truncated prefix of the raw content.

use crate::brain::{Brain, ModelTier};
use std::sync::Arc;
use tracing::warn;

const SUMMARY_SYSTEM_PROMPT: &str = "You summarize web pages for a research assistant. \
Reply with one or two plain sentences capturing the facts most relevant to the research question. \
No preamble, no markdown.";

/// Content longer than this is cut before it is sent for summarization.
const MAX_SUMMARY_INPUT_CHARS: usize = 12_000;

/// A summary and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub text: String,
    /// False when the model failed and the raw content was truncated instead.
    pub generated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("LLM error during summarization: {0}")]
    LlmError(String),

    #[error("Model returned an empty summary")]
    Empty,
}

/// Generates bounded per-source summaries using the fast model tier.
pub struct SourceSummarizer {
    brain: Arc<Brain>,
    char_limit: usize,
}

impl SourceSummarizer {
    pub fn new(brain: Arc<Brain>, char_limit: usize) -> Self {
        Self { brain, char_limit }
    }

    /// Ask the model for a summary of `content`.
    pub async fn summarize(
        &self,
        question: &str,
        title: &str,
        content: &str,
    ) -> Result<String, SummarizeError> {
        let prompt = build_summary_prompt(question, title, content, self.char_limit);
        let text = self
            .brain
            .complete(ModelTier::Fast, SUMMARY_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| SummarizeError::LlmError(e.to_string()))?;

        let text = text.trim();
        if text.is_empty() {
            return Err(SummarizeError::Empty);
        }
        Ok(truncate_chars(text, self.char_limit))
    }

    /// Summarize, falling back to a truncated prefix of the content.
    pub async fn summarize_or_truncate(
        &self,
        question: &str,
        title: &str,
        content: &str,
    ) -> SourceSummary {
        match self.summarize(question, title, content).await {
            Ok(text) => SourceSummary {
                text,
                generated: true,
            },
            Err(e) => {
                warn!(error = %e, title, "Summary generation failed, truncating content");
                SourceSummary {
                    text: truncate_chars(&collapse_whitespace(content), self.char_limit),
                    generated: false,
                }
            }
        }
    }
}

fn build_summary_prompt(question: &str, title: &str, content: &str, limit: usize) -> String {
    let body: String = content.chars().take(MAX_SUMMARY_INPUT_CHARS).collect();
    format!(
        "Research question: {question}\n\
         Page title: {title}\n\
         Summarize the page below in at most {limit} characters.\n\n\
         ---\n{body}\n---"
    )
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `limit` characters, marking the cut with `…`.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    if limit == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(limit - 1).collect();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{MockFailure, MockLlmProvider};
    use crate::config::{LlmConfig, RetryConfig};

    fn summarizer(mock: MockLlmProvider, limit: usize) -> SourceSummarizer {
        let brain = Brain::new(
            Arc::new(mock),
            LlmConfig::default(),
            RetryConfig::default().with_max_retries(0),
        );
        SourceSummarizer::new(Arc::new(brain), limit)
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefghij", 5), "abcd…");
        assert_eq!(truncate_chars("abc def ghi", 5), "abc…");
        assert_eq!(truncate_chars("héllo wörld", 6).chars().count(), 6);
        assert_eq!(truncate_chars("anything", 0), "");
    }

    #[tokio::test]
    async fn test_summary_is_bounded() {
        let long = "x".repeat(500);
        let s = summarizer(MockLlmProvider::with_response(&long), 100);
        let summary = s.summarize("q", "t", "content").await.unwrap();
        assert_eq!(summary.chars().count(), 100);
    }

    #[tokio::test]
    async fn test_fallback_to_truncated_content() {
        let mock = MockLlmProvider::new().fail_on("", MockFailure::AuthFailed);
        let s = summarizer(mock, 20);
        let summary = s
            .summarize_or_truncate("q", "t", "The   quick brown fox jumps over the lazy dog")
            .await;
        assert!(!summary.generated);
        assert_eq!(summary.text, "The quick brown fox…");
    }

    #[tokio::test]
    async fn test_empty_summary_degrades() {
        let s = summarizer(MockLlmProvider::with_response("   "), 50);
        let summary = s.summarize_or_truncate("q", "t", "Body text").await;
        assert!(!summary.generated);
        assert_eq!(summary.text, "Body text");
    }

    #[tokio::test]
    async fn test_generated_summary() {
        let s = summarizer(MockLlmProvider::with_response("Rust is fast."), 100);
        let summary = s.summarize_or_truncate("q", "t", "long page").await;
        assert!(summary.generated);
        assert_eq!(summary.text, "Rust is fast.");
    }
}
