//! Confidence evaluation and the forward-progress policy.
//!
//! After each round every outstanding sub-question is scored in `[0, 1]`
//! against a bounded preview of the content gathered so far. [`decide`]
//! turns a score and the attempt count into the next step for that
//! sub-question.

use super::decomposition::{SubQuestion, SubQuestionId};
use super::sources::{Source, SourceStore};
use crate::brain::{Brain, ModelTier};
use crate::config::SearchConfig;
use crate::error::LlmError;
use crate::summarizer::truncate_chars;
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CONFIDENCE_SYSTEM_PROMPT: &str = "You judge whether gathered web content answers a research sub-question. \
Return JSON: {\"confidence\": <number between 0 and 1>, \"reasoning\": \"...\"}. \
0 means the content says nothing relevant, 1 means it answers the sub-question completely.";

#[derive(Debug, Deserialize)]
struct ConfidenceReply {
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Score for one sub-question after one round.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceScore {
    pub sub_question: SubQuestionId,
    pub score: f64,
    pub reasoning: String,
    /// True when the check failed and the score defaulted to 0.
    pub degraded: bool,
}

/// Next step for a sub-question after scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Answered,
    NeedsMoreSearch,
    LowConfidence,
}

/// Apply the forward-progress policy.
///
/// `attempts` counts search rounds that targeted the sub-question. A
/// sub-question at its attempt ceiling is always closed; it counts as
/// answered only when its score exceeds the minimum confidence.
pub fn decide(score: f64, attempts: u32, config: &SearchConfig) -> Verdict {
    if score >= config.early_termination_confidence {
        Verdict::Answered
    } else if attempts < config.max_search_attempts {
        Verdict::NeedsMoreSearch
    } else if score > config.min_answer_confidence {
        Verdict::Answered
    } else {
        Verdict::LowConfidence
    }
}

pub struct ConfidenceEvaluator {
    brain: Arc<Brain>,
    config: SearchConfig,
}

impl ConfidenceEvaluator {
    pub fn new(brain: Arc<Brain>, config: SearchConfig) -> Self {
        Self { brain, config }
    }

    /// Score every sub-question in `subs` concurrently.
    pub async fn evaluate_all(
        &self,
        question: &str,
        subs: &[&SubQuestion],
        store: &SourceStore,
    ) -> Vec<ConfidenceScore> {
        join_all(subs.iter().map(|sq| self.evaluate(question, sq, store))).await
    }

    /// Score one sub-question. Never fails: a failed check scores 0.
    pub async fn evaluate(
        &self,
        question: &str,
        sub: &SubQuestion,
        store: &SourceStore,
    ) -> ConfidenceScore {
        let preview = self.build_preview(sub.id, store);
        if preview.is_empty() {
            debug!(sub_question = %sub.id, "No content gathered yet, scoring 0");
            return ConfidenceScore {
                sub_question: sub.id,
                score: 0.0,
                reasoning: "No content available".to_string(),
                degraded: false,
            };
        }

        let prompt = format!(
            "Research question: {question}\nSub-question: {}\n\nGathered content:\n{preview}",
            sub.text
        );
        match self.check(&prompt).await {
            Ok(reply) => {
                debug!(sub_question = %sub.id, score = reply.confidence, "Confidence scored");
                ConfidenceScore {
                    sub_question: sub.id,
                    score: reply.confidence,
                    reasoning: reply.reasoning,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(sub_question = %sub.id, error = %e, "Confidence check failed, scoring 0");
                ConfidenceScore {
                    sub_question: sub.id,
                    score: 0.0,
                    reasoning: String::new(),
                    degraded: true,
                }
            }
        }
    }

    async fn check(&self, prompt: &str) -> Result<ConfidenceReply, LlmError> {
        let reply: ConfidenceReply = self
            .brain
            .complete_json(ModelTier::Fast, CONFIDENCE_SYSTEM_PROMPT, prompt)
            .await?;
        if !(0.0..=1.0).contains(&reply.confidence) {
            return Err(LlmError::ResponseParse {
                message: format!("confidence {} outside [0, 1]", reply.confidence),
            });
        }
        Ok(reply)
    }

    /// Bounded content preview, the sub-question's own sources first.
    fn build_preview(&self, id: SubQuestionId, store: &SourceStore) -> String {
        let own = store.for_sub_question(id).filter(|s| s.is_usable());
        let others = store.usable().filter(|s| s.sub_question != id);
        own.chain(others)
            .take(self.config.max_sources_to_check)
            .enumerate()
            .map(|(i, s)| {
                let text = preview_text(s, self.config.answer_check_preview);
                format!("[{}] {}\n{}\n", i + 1, s.title, text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn preview_text(source: &Source, limit: usize) -> String {
    let text = source
        .raw_content
        .as_deref()
        .or(source.summary.as_deref())
        .unwrap_or_default();
    truncate_chars(text, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{MockFailure, MockLlmProvider};
    use crate::config::{LlmConfig, RetryConfig};
    use crate::research::sources::test_source;
    use chrono::Utc;

    fn evaluator(mock: Arc<MockLlmProvider>) -> ConfidenceEvaluator {
        let brain = Brain::new(
            mock,
            LlmConfig::default(),
            RetryConfig::default().with_max_retries(0),
        );
        ConfidenceEvaluator::new(Arc::new(brain), SearchConfig::default())
    }

    fn store_with_content() -> SourceStore {
        let mut store = SourceStore::new();
        store.insert(test_source("https://example.com/a"));
        store.attach_content("https://example.com/a", "Rust is memory safe.".into(), Utc::now());
        store
    }

    #[test]
    fn test_policy() {
        let config = SearchConfig::default();
        assert_eq!(decide(0.85, 1, &config), Verdict::Answered);
        assert_eq!(decide(0.8, 1, &config), Verdict::Answered);
        assert_eq!(decide(0.5, 1, &config), Verdict::NeedsMoreSearch);
        assert_eq!(decide(0.5, 3, &config), Verdict::Answered);
        assert_eq!(decide(0.3, 3, &config), Verdict::LowConfidence);
        assert_eq!(decide(0.0, 5, &config), Verdict::LowConfidence);
    }

    #[tokio::test]
    async fn test_scores_from_model() {
        let mock = Arc::new(MockLlmProvider::with_response(
            r#"{"confidence": 0.85, "reasoning": "covered"}"#,
        ));
        let sq = SubQuestion::new(SubQuestionId(0), "Is Rust safe?");
        let score = evaluator(mock.clone())
            .evaluate("q", &sq, &store_with_content())
            .await;
        assert_eq!(score.score, 0.85);
        assert_eq!(score.reasoning, "covered");
        assert!(!score.degraded);
        assert_eq!(mock.calls_matching("Rust is memory safe."), 1);
    }

    #[tokio::test]
    async fn test_no_content_scores_zero_without_call() {
        let mock = Arc::new(MockLlmProvider::with_response(r#"{"confidence": 1.0}"#));
        let sq = SubQuestion::new(SubQuestionId(0), "Is Rust safe?");
        let score = evaluator(mock.clone())
            .evaluate("q", &sq, &SourceStore::new())
            .await;
        assert_eq!(score.score, 0.0);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_degrades_to_zero() {
        let mock = Arc::new(MockLlmProvider::with_response(r#"{"confidence": 7}"#));
        let sq = SubQuestion::new(SubQuestionId(0), "Is Rust safe?");
        let score = evaluator(mock).evaluate("q", &sq, &store_with_content()).await;
        assert_eq!(score.score, 0.0);
        assert!(score.degraded);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_zero() {
        let mock = Arc::new(MockLlmProvider::new().fail_on("", MockFailure::Unavailable));
        let subs = [
            SubQuestion::new(SubQuestionId(0), "a"),
            SubQuestion::new(SubQuestionId(1), "b"),
        ];
        let refs: Vec<_> = subs.iter().collect();
        let scores = evaluator(mock)
            .evaluate_all("q", &refs, &store_with_content())
            .await;
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|s| s.score == 0.0 && s.degraded));
    }

    #[test]
    fn test_preview_prefers_own_sources_and_is_bounded() {
        let mock = Arc::new(MockLlmProvider::new());
        let brain = Brain::new(mock, LlmConfig::default(), RetryConfig::default());
        let config = SearchConfig {
            max_sources_to_check: 1,
            answer_check_preview: 10,
            ..Default::default()
        };
        let evaluator = ConfidenceEvaluator::new(Arc::new(brain), config);

        let mut store = SourceStore::new();
        store.insert(test_source("https://example.com/other"));
        let mut own = test_source("https://example.com/own");
        own.sub_question = SubQuestionId(1);
        store.insert(own);
        let now = Utc::now();
        store.attach_content("https://example.com/other", "other content here".into(), now);
        store.attach_content("https://example.com/own", "own content is longer".into(), now);

        let preview = evaluator.build_preview(SubQuestionId(1), &store);
        assert!(preview.contains("Title of https://example.com/own"));
        assert!(!preview.contains("other"));
        assert!(preview.contains("own conte…"));
    }
}
