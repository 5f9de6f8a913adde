//! Session events and the append-only event channel.
//!
//! Events are the only observable state of a research session. The sink
//! keeps the full ordered log (for replay through [`crate::research::display::fold`])
//! and forwards each event to an optional live subscriber. After a terminal
//! event (`final-result` or `error`) the sink accepts nothing further.

use super::decomposition::SubQuestionId;
use super::planner::QueryId;
use super::session::Phase;
use super::sources::SourceRef;
use crate::brain::lock;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A progress event emitted during a research session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SearchEvent {
    /// Narration; `message` may hold `|`-separated variants for rotating display.
    Thinking { message: String },
    PhaseUpdate { phase: Phase, message: String },
    Searching {
        query: String,
        index: usize,
        total: usize,
        query_id: QueryId,
        sub_question_id: SubQuestionId,
    },
    Found {
        query: String,
        query_id: QueryId,
        sources: Vec<SourceRef>,
    },
    Scraping {
        query: String,
        query_id: QueryId,
        url: String,
    },
    ContentChunk { chunk: String },
    FinalResult {
        content: String,
        sources: Vec<SourceRef>,
    },
    Error { error: String, error_type: ErrorKind },
}

impl SearchEvent {
    pub fn thinking(message: impl Into<String>) -> Self {
        SearchEvent::Thinking {
            message: message.into(),
        }
    }

    /// Whether this event ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchEvent::FinalResult { .. } | SearchEvent::Error { .. }
        )
    }

    /// Short kind tag, matching the serialized `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchEvent::Thinking { .. } => "thinking",
            SearchEvent::PhaseUpdate { .. } => "phase-update",
            SearchEvent::Searching { .. } => "searching",
            SearchEvent::Found { .. } => "found",
            SearchEvent::Scraping { .. } => "scraping",
            SearchEvent::ContentChunk { .. } => "content-chunk",
            SearchEvent::FinalResult { .. } => "final-result",
            SearchEvent::Error { .. } => "error",
        }
    }
}

/// Split a thinking message into its display variants.
pub fn thinking_variants(message: &str) -> Vec<&str> {
    message
        .split('|')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect()
}

#[derive(Default)]
struct EventLog {
    events: Vec<SearchEvent>,
    closed: bool,
}

struct SinkInner {
    log: Mutex<EventLog>,
    subscriber: Option<mpsc::UnboundedSender<SearchEvent>>,
}

/// Ordered, append-only event channel shared by every component of a session.
///
/// Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

impl EventSink {
    /// A sink that only records.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                log: Mutex::new(EventLog::default()),
                subscriber: None,
            }),
        }
    }

    /// A sink that also forwards every event to the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            inner: Arc::new(SinkInner {
                log: Mutex::new(EventLog::default()),
                subscriber: Some(tx),
            }),
        };
        (sink, rx)
    }

    /// Append an event. Returns false if the channel is already closed.
    pub fn emit(&self, event: SearchEvent) -> bool {
        let mut log = lock(&self.inner.log);
        if log.closed {
            warn!(kind = event.kind(), "Dropping event emitted after terminal event");
            return false;
        }
        debug!(kind = event.kind(), seq = log.events.len(), "Event emitted");
        log.closed = event.is_terminal();
        // Forward under the lock so subscribers see log order.
        if let Some(tx) = &self.inner.subscriber
            && tx.send(event.clone()).is_err()
        {
            debug!("Event subscriber dropped");
        }
        log.events.push(event);
        true
    }

    pub fn thinking(&self, message: impl Into<String>) -> bool {
        self.emit(SearchEvent::thinking(message))
    }

    /// Copy of every event emitted so far.
    pub fn snapshot(&self) -> Vec<SearchEvent> {
        lock(&self.inner.log).events.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.log).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a terminal event has been emitted.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.log).closed
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
