//! Answer synthesis.
//!
//! Assembles the usable sources into a numbered evidence block and streams
//! a cited answer from the quality model, forwarding every token as a
//! `content-chunk` event.

use super::decomposition::SubQuestion;
use super::events::{EventSink, SearchEvent};
use super::sources::{Source, SourceRef, SourceStore};
use crate::brain::{Brain, ModelTier};
use crate::error::{LlmError, ResearchError};
use crate::types::StreamEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a research assistant writing the final answer to a research question. \
Use only the numbered sources provided. Cite sources inline as [n] using their numbers. \
Structure the answer in Markdown with a short direct answer first, then supporting detail. \
Where evidence is thin or sources disagree, say so plainly.";

/// The synthesized answer and the sources it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

pub struct Synthesizer {
    brain: Arc<Brain>,
    content_limit: usize,
}

impl Synthesizer {
    pub fn new(brain: Arc<Brain>, content_limit: usize) -> Self {
        Self {
            brain,
            content_limit,
        }
    }

    /// Stream an answer for `question` from the usable sources in `store`.
    pub async fn synthesize(
        &self,
        question: &str,
        store: &SourceStore,
        low_confidence: &[&SubQuestion],
        events: &EventSink,
    ) -> Result<Synthesis, ResearchError> {
        let usable: Vec<&Source> = store.usable().collect();
        if usable.is_empty() {
            return Err(ResearchError::NoUsableSources);
        }

        let prompt = build_synthesis_prompt(question, &usable, low_confidence, self.content_limit);
        debug!(sources = usable.len(), prompt_chars = prompt.len(), "Starting synthesis");

        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        let producer = self
            .brain
            .stream(ModelTier::Quality, SYNTHESIS_SYSTEM_PROMPT, &prompt, tx);
        let consumer = async {
            let mut answer = String::new();
            let mut stream_error = None;
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Token(chunk) => {
                        answer.push_str(&chunk);
                        events.emit(SearchEvent::ContentChunk { chunk });
                    }
                    StreamEvent::Done { usage } => self.brain.track_usage(&usage),
                    StreamEvent::Error(message) => stream_error = Some(message),
                }
            }
            (answer, stream_error)
        };

        let (result, (answer, stream_error)) = tokio::join!(producer, consumer);
        result?;
        if let Some(message) = stream_error {
            return Err(LlmError::Streaming { message }.into());
        }

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(ResearchError::EmptyAnswer);
        }
        info!(answer_chars = answer.len(), sources = usable.len(), "Synthesis complete");

        Ok(Synthesis {
            answer,
            sources: usable.iter().map(|s| s.to_ref()).collect(),
        })
    }
}

/// Numbered evidence block. Full content is used when it fits the
/// budget, otherwise the summary.
pub fn build_synthesis_prompt(
    question: &str,
    sources: &[&Source],
    low_confidence: &[&SubQuestion],
    content_limit: usize,
) -> String {
    let mut prompt = format!("Research question: {question}\n\nSources:\n");
    for (i, source) in sources.iter().enumerate() {
        let body = match (&source.raw_content, &source.summary) {
            (Some(content), _) if content.chars().count() <= content_limit => content.as_str(),
            (_, Some(summary)) => summary.as_str(),
            (Some(content), None) => content.as_str(),
            (None, None) => "",
        };
        prompt.push_str(&format!(
            "\n[{}] {}\nURL: {}\n{}\n",
            i + 1,
            source.title,
            source.url,
            body
        ));
    }

    if !low_confidence.is_empty() {
        prompt.push_str("\nThe evidence only weakly answers these sub-questions; flag the uncertainty:\n");
        for sq in low_confidence {
            prompt.push_str(&format!("- {}\n", sq.text));
        }
    }
    prompt
}
