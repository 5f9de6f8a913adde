//! Question decomposition into sub-questions.
//!
//! Breaks a research question into a few independently searchable
//! sub-questions. The model does this at the fast tier; when it fails, a
//! structural heuristic takes over so the session always has at least the
//! original question to work on.

use crate::brain::{Brain, ModelTier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DECOMPOSE_SYSTEM_PROMPT: &str = "You break research questions into sub-questions for a web search assistant. \
Return JSON: {\"subQuestions\": [\"...\"]}. Each sub-question must be independently searchable and together they must cover the original question. \
Simple questions need only one sub-question.";

/// Session-unique identifier of a sub-question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubQuestionId(pub u32);

impl std::fmt::Display for SubQuestionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sq{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubQuestionStatus {
    Outstanding,
    Answered,
    AnsweredLowConfidence,
}

/// A sub-question and its evidence-gathering progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuestion {
    pub id: SubQuestionId,
    pub text: String,
    /// Search rounds run for this sub-question.
    pub attempts: u32,
    pub best_confidence: Option<f64>,
    pub status: SubQuestionStatus,
}

impl SubQuestion {
    pub fn new(id: SubQuestionId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            attempts: 0,
            best_confidence: None,
            status: SubQuestionStatus::Outstanding,
        }
    }

    pub fn is_outstanding(&self) -> bool {
        self.status == SubQuestionStatus::Outstanding
    }

    pub fn record_score(&mut self, score: f64) {
        self.best_confidence = Some(self.best_confidence.map_or(score, |b| b.max(score)));
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecompositionReply {
    sub_questions: Vec<String>,
}

/// Result of decomposing a question.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub sub_questions: Vec<SubQuestion>,
    /// True when the heuristic replaced a failed model call.
    pub degraded: bool,
}

/// Decomposes a question into sub-questions.
pub struct QuestionDecomposer {
    brain: Arc<Brain>,
    max_sub_questions: usize,
}

impl QuestionDecomposer {
    pub fn new(brain: Arc<Brain>, max_sub_questions: usize) -> Self {
        Self {
            brain,
            max_sub_questions: max_sub_questions.max(1),
        }
    }

    pub async fn decompose(&self, question: &str) -> Decomposition {
        let prompt = format!(
            "Research question: {question}\n\nReturn at most {} sub-questions.",
            self.max_sub_questions
        );
        let reply = self
            .brain
            .complete_json::<DecompositionReply>(ModelTier::Fast, DECOMPOSE_SYSTEM_PROMPT, &prompt)
            .await;

        let (texts, degraded) = match reply {
            Ok(reply) => {
                let texts = clean(reply.sub_questions, self.max_sub_questions);
                if texts.is_empty() {
                    warn!("Decomposition reply had no usable sub-questions, using heuristic");
                    (heuristic_decompose(question, self.max_sub_questions), true)
                } else {
                    (texts, false)
                }
            }
            Err(e) => {
                warn!(error = %e, "Decomposition failed, using heuristic");
                (heuristic_decompose(question, self.max_sub_questions), true)
            }
        };
        debug!(count = texts.len(), degraded, "Question decomposed");

        Decomposition {
            sub_questions: texts
                .into_iter()
                .enumerate()
                .map(|(i, text)| SubQuestion::new(SubQuestionId(i as u32), text))
                .collect(),
            degraded,
        }
    }
}

fn clean(texts: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    texts
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .take(max)
        .collect()
}

/// Structural decomposition: the question itself, the sides of a
/// comparison, and a procedural angle for "how" questions.
pub fn heuristic_decompose(question: &str, max: usize) -> Vec<String> {
    let question = question.trim();
    let mut parts = vec![question.to_string()];

    let sides = split_comparative(question);
    if sides.len() > 1 {
        parts.extend(sides);
    }

    if question.to_lowercase().starts_with("how") {
        parts.push(format!("What are the practical steps for: {question}"));
    }

    clean(parts, max.max(1))
}

fn split_comparative(question: &str) -> Vec<String> {
    let lower = question.to_lowercase();
    for sep in [" vs. ", " vs ", " versus ", " compared to "] {
        if let Some(pos) = lower.find(sep) {
            let (left, right) = (&question[..pos], &question[pos + sep.len()..]);
            return [left, right]
                .iter()
                .map(|s| s.trim().trim_end_matches('?').to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    if lower.contains(" and ") {
        let parts: Vec<String> = question
            .split(" and ")
            .map(|s| s.trim().trim_end_matches('?').to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if parts.len() <= 3 {
            return parts;
        }
    }
    vec![question.to_string()]
}
