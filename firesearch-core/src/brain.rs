//! Brain module: model service abstraction and interaction.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions and the
//! `Brain`, which layers model tiers, timeouts, bounded retry, token
//! accounting and typed JSON validation on top of a provider.

use crate::config::{LlmConfig, RetryConfig};
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::types::{
    CompletionRequest, CompletionResponse, Message, ResponseFormat, StreamEvent, TokenUsage,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Trait for model providers, supporting both full and streaming completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Perform a streaming completion, sending events to the channel.
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError>;

    /// Return the default model name.
    fn model_name(&self) -> &str;
}

/// Which configured model a call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Cheap model for planning, confidence checks and summaries.
    Fast,
    /// Strong model for synthesis.
    Quality,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The Brain wraps a provider and adds tier selection, timeouts, retry and
/// usage tracking. It is shared by every component of a session.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    config: LlmConfig,
    retry: RetryConfig,
    total_usage: Mutex<TokenUsage>,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, config: LlmConfig, retry: RetryConfig) -> Self {
        Self {
            provider,
            config,
            retry,
            total_usage: Mutex::new(TokenUsage::default()),
        }
    }

    /// Model name configured for a tier.
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.config.fast_model,
            ModelTier::Quality => &self.config.quality_model,
        }
    }

    fn build_request(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
        response_format: ResponseFormat,
    ) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::system(system), Message::user(user)],
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
            model: Some(self.model_for(tier).to_string()),
            response_format,
        }
    }

    async fn complete_once(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let timeout = self.config.request_timeout();
        let response = tokio::time::timeout(timeout, self.provider.complete(request))
            .await
            .map_err(|_| LlmError::Timeout {
                timeout_secs: timeout.as_secs(),
            })??;
        self.track_usage(&response.usage);
        Ok(response.text)
    }

    async fn complete_with_format(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
        response_format: ResponseFormat,
    ) -> Result<String, LlmError> {
        let request = self.build_request(tier, system, user, response_format);
        debug!(
            model = request.model.as_deref().unwrap_or_default(),
            prompt_chars = user.len(),
            "Sending completion request"
        );
        with_retry(&self.retry, || self.complete_once(request.clone())).await
    }

    /// Complete a prompt and return plain text.
    pub async fn complete(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
    ) -> Result<String, LlmError> {
        self.complete_with_format(tier, system, user, ResponseFormat::Text)
            .await
    }

    /// Complete a prompt and validate the reply against schema `T`.
    ///
    /// Transient failures are retried; a reply that does not match `T` is
    /// returned as `ResponseParse` without retry.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
    ) -> Result<T, LlmError> {
        let text = self
            .complete_with_format(tier, system, user, ResponseFormat::JsonObject)
            .await?;
        parse_json_reply(&text)
    }

    /// Stream a completion into `tx`. Streams are not retried because
    /// chunks may already have been forwarded to the caller.
    pub async fn stream(
        &self,
        tier: ModelTier,
        system: &str,
        user: &str,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let request = self.build_request(tier, system, user, ResponseFormat::Text);
        // Streams run longer than single replies.
        let timeout = self.config.request_timeout() * 3;
        tokio::time::timeout(timeout, self.provider.complete_streaming(request, tx))
            .await
            .map_err(|_| LlmError::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
    }

    /// Record usage reported outside `complete` (e.g. by a stream).
    pub fn track_usage(&self, usage: &TokenUsage) {
        let mut total = lock(&self.total_usage);
        total.accumulate(usage);
        info!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            session_tokens = total.total(),
            "Completion received"
        );
    }

    /// Total token usage across all calls.
    pub fn total_usage(&self) -> TokenUsage {
        *lock(&self.total_usage)
    }

    pub fn provider(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider)
    }
}

/// Extract and deserialize a JSON object from a model reply.
///
/// Tolerates surrounding prose and Markdown code fences; anything that does
/// not deserialize into `T` is a `ResponseParse` error.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let trimmed = text.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    };
    serde_json::from_str(candidate).map_err(|e| LlmError::ResponseParse {
        message: format!("Reply did not match expected schema: {}", e),
    })
}

/// A scripted reply for [`MockLlmProvider`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(MockFailure),
    /// Sleep before replying with the text.
    Delayed(Duration, String),
}

#[derive(Debug, Clone, Copy)]
pub enum MockFailure {
    Unavailable,
    Timeout,
    AuthFailed,
}

impl MockFailure {
    fn to_error(self) -> LlmError {
        match self {
            MockFailure::Unavailable => LlmError::Connection {
                message: "mock provider unavailable".to_string(),
            },
            MockFailure::Timeout => LlmError::Timeout { timeout_secs: 1 },
            MockFailure::AuthFailed => LlmError::AuthFailed {
                provider: "mock".to_string(),
            },
        }
    }
}

struct MockRule {
    needle: String,
    replies: VecDeque<MockReply>,
}

impl MockRule {
    /// Pop the next reply, repeating the last one forever.
    fn next_reply(&mut self) -> Option<MockReply> {
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

/// A mock provider for testing and development.
///
/// Replies are chosen by the first rule whose needle occurs in any message
/// of the request, then from the FIFO queue, then a fixed default text.
pub struct MockLlmProvider {
    model: String,
    rules: Mutex<Vec<MockRule>>,
    responses: Mutex<VecDeque<CompletionResponse>>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            rules: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    pub fn with_response(text: &str) -> Self {
        Self::new().on("", text)
    }

    /// Reply with `text` to every request containing `needle`.
    pub fn on(self, needle: &str, text: &str) -> Self {
        self.on_sequence(needle, vec![MockReply::Text(text.to_string())])
    }

    /// Reply to requests containing `needle` with `replies` in order; the
    /// last reply repeats once the others are used up.
    pub fn on_sequence(self, needle: &str, replies: Vec<MockReply>) -> Self {
        lock(&self.rules).push(MockRule {
            needle: needle.to_string(),
            replies: replies.into(),
        });
        self
    }

    /// Fail every request containing `needle`.
    pub fn fail_on(self, needle: &str, failure: MockFailure) -> Self {
        self.on_sequence(needle, vec![MockReply::Fail(failure)])
    }

    /// Queue a response to be returned when no rule matches.
    pub fn queue_response(&self, response: CompletionResponse) {
        lock(&self.responses).push_back(response);
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<CompletionRequest> {
        lock(&self.calls).clone()
    }

    /// Number of requests whose messages contain `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|r| r.messages.iter().any(|m| m.content.contains(needle)))
            .count()
    }

    fn pick_reply(&self, request: &CompletionRequest) -> Option<MockReply> {
        let mut rules = lock(&self.rules);
        rules
            .iter_mut()
            .find(|rule| {
                rule.needle.is_empty()
                    || request
                        .messages
                        .iter()
                        .any(|m| m.content.contains(&rule.needle))
            })
            .and_then(MockRule::next_reply)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        lock(&self.calls).push(request.clone());

        match self.pick_reply(&request) {
            Some(MockReply::Text(text)) => Ok(Self::text_response(&text)),
            Some(MockReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(Self::text_response(&text))
            }
            Some(MockReply::Fail(failure)) => Err(failure.to_error()),
            None => Ok(lock(&self.responses).pop_front().unwrap_or_else(|| {
                Self::text_response("I'm a mock LLM. No queued responses available.")
            })),
        }
    }

    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), LlmError> {
        let response = self.complete(request).await?;
        for piece in response.text.split_inclusive(' ') {
            let _ = tx.send(StreamEvent::Token(piece.to_string())).await;
        }
        let _ = tx
            .send(StreamEvent::Done {
                usage: response.usage,
            })
            .await;
        Ok(())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn brain(provider: MockLlmProvider) -> Brain {
        let retry = RetryConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            jitter: false,
            ..Default::default()
        };
        Brain::new(Arc::new(provider), LlmConfig::default(), retry)
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Score {
        confidence: f64,
    }

    #[test]
    fn test_parse_json_reply_plain() {
        let score: Score = parse_json_reply(r#"{"confidence": 0.5}"#).unwrap();
        assert_eq!(score, Score { confidence: 0.5 });
    }

    #[test]
    fn test_parse_json_reply_fenced() {
        let text = "Here you go:\n```json\n{\"confidence\": 0.9}\n```";
        let score: Score = parse_json_reply(text).unwrap();
        assert_eq!(score.confidence, 0.9);
    }

    #[test]
    fn test_parse_json_reply_schema_mismatch() {
        let result: Result<Score, _> = parse_json_reply(r#"{"score": "high"}"#);
        assert!(matches!(result, Err(LlmError::ResponseParse { .. })));
    }

    #[test]
    fn test_parse_json_reply_not_json() {
        let result: Result<Score, _> = parse_json_reply("I cannot answer that.");
        assert!(matches!(result, Err(LlmError::ResponseParse { .. })));
    }

    #[tokio::test]
    async fn test_brain_complete_uses_tier_model() {
        let mock = Arc::new(MockLlmProvider::with_response("hello"));
        let brain = Brain::new(mock.clone(), LlmConfig::default(), RetryConfig::default());

        let text = brain.complete(ModelTier::Fast, "sys", "user").await.unwrap();
        assert_eq!(text, "hello");
        brain.complete(ModelTier::Quality, "sys", "user").await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls[0].model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(calls[1].model.as_deref(), Some("gpt-4o"));
        assert_eq!(brain.total_usage().total(), 300);
    }

    #[tokio::test]
    async fn test_brain_retries_transient_then_succeeds() {
        let mock = MockLlmProvider::new().on_sequence(
            "grade",
            vec![
                MockReply::Fail(MockFailure::Unavailable),
                MockReply::Text(r#"{"confidence": 0.4}"#.into()),
            ],
        );
        let brain = brain(mock);
        let score: Score = brain
            .complete_json(ModelTier::Fast, "grade", "evidence")
            .await
            .unwrap();
        assert_eq!(score.confidence, 0.4);
    }

    #[tokio::test]
    async fn test_brain_permanent_error_not_retried() {
        let mock = Arc::new(MockLlmProvider::new().fail_on("", MockFailure::AuthFailed));
        let brain = Brain::new(mock.clone(), LlmConfig::default(), RetryConfig::default());
        let result = brain.complete(ModelTier::Fast, "sys", "user").await;
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_brain_timeout() {
        let mock = MockLlmProvider::new().on_sequence(
            "",
            vec![MockReply::Delayed(Duration::from_secs(5), "late".into())],
        );
        let config = LlmConfig {
            request_timeout_secs: 0,
            ..Default::default()
        };
        let brain = Brain::new(
            Arc::new(mock),
            config,
            RetryConfig::default().with_max_retries(0),
        );
        let result = brain.complete(ModelTier::Fast, "sys", "user").await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_mock_rules_match_in_order() {
        let mock = MockLlmProvider::new().on("alpha", "A").on("", "fallback");
        let request = CompletionRequest {
            messages: vec![Message::user("alpha beta")],
            ..Default::default()
        };
        assert_eq!(mock.complete(request).await.unwrap().text, "A");
        let request = CompletionRequest {
            messages: vec![Message::user("gamma")],
            ..Default::default()
        };
        assert_eq!(mock.complete(request).await.unwrap().text, "fallback");
        assert_eq!(mock.calls_matching("alpha"), 1);
    }

    #[tokio::test]
    async fn test_mock_streaming_reassembles_text() {
        let mock = MockLlmProvider::with_response("one two three");
        let (tx, mut rx) = mpsc::channel(16);
        mock.complete_streaming(CompletionRequest::default(), tx)
            .await
            .unwrap();
        let mut text = String::new();
        let mut done = false;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(t) => text.push_str(&t),
                StreamEvent::Done { .. } => done = true,
                StreamEvent::Error(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(text, "one two three");
        assert!(done);
    }
}
