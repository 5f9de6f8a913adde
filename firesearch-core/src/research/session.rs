//! Research session state and the phase state machine.
//!
//! A session owns its question, sub-questions, sources, issued queries and
//! event log. Phases only move forward along [`Phase::ORDER`]; a failure
//! from any phase ends the session with an `error` event instead.

use super::decomposition::{SubQuestion, SubQuestionId, SubQuestionStatus};
use super::events::{EventSink, SearchEvent};
use super::planner::QueryLedger;
use super::sources::SourceStore;
use crate::error::{ErrorKind, ResearchError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Current phase of a research session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Decomposing the question.
    Understanding,
    /// Planning the first query batch.
    Planning,
    /// Search, scrape and evaluate rounds.
    Searching,
    /// Assembling the evidence digest.
    Analyzing,
    /// Writing the answer.
    Synthesizing,
    Complete,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Understanding,
        Phase::Planning,
        Phase::Searching,
        Phase::Analyzing,
        Phase::Synthesizing,
        Phase::Complete,
    ];

    /// Position in the forward sequence.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Phase> {
        Self::ORDER.get(self.ordinal() + 1).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Understanding => "Understanding",
            Phase::Planning => "Planning",
            Phase::Searching => "Searching",
            Phase::Analyzing => "Analyzing",
            Phase::Synthesizing => "Synthesizing",
            Phase::Complete => "Complete",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Understanding => "understanding",
            Phase::Planning => "planning",
            Phase::Searching => "searching",
            Phase::Analyzing => "analyzing",
            Phase::Synthesizing => "synthesizing",
            Phase::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Running,
    Completed,
    Failed(ErrorKind),
}

/// A single research session.
pub struct ResearchSession {
    pub id: Uuid,
    pub question: String,
    phase: Option<Phase>,
    outcome: SessionOutcome,
    pub sub_questions: Vec<SubQuestion>,
    pub sources: SourceStore,
    pub ledger: QueryLedger,
    /// Search rounds completed.
    pub rounds: u32,
    pub created_at: DateTime<Utc>,
    events: EventSink,
}

impl ResearchSession {
    pub fn new(question: impl Into<String>, max_queries: usize, events: EventSink) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            phase: None,
            outcome: SessionOutcome::Running,
            sub_questions: Vec::new(),
            sources: SourceStore::new(),
            ledger: QueryLedger::new(max_queries),
            rounds: 0,
            created_at: Utc::now(),
            events,
        }
    }

    /// The current phase; `None` before the session starts.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn outcome(&self) -> &SessionOutcome {
        &self.outcome
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Advance to `next`, emitting exactly one `phase-update`.
    ///
    /// Only the successor of the current phase is accepted (`understanding`
    /// from the start). Re-entering `complete` is a no-op.
    pub fn transition(&mut self, next: Phase, message: impl Into<String>) -> Result<(), ResearchError> {
        if self.outcome != SessionOutcome::Running {
            if self.phase == Some(Phase::Complete) && next == Phase::Complete {
                return Ok(());
            }
            return Err(self.invalid(next));
        }
        let expected = match self.phase {
            None => Some(Phase::Understanding),
            Some(current) => current.next(),
        };
        if expected != Some(next) {
            return Err(self.invalid(next));
        }

        let message = message.into();
        info!(session = %self.id, phase = %next, %message, "Phase transition");
        self.phase = Some(next);
        if next == Phase::Complete {
            self.outcome = SessionOutcome::Completed;
        }
        self.events.emit(SearchEvent::PhaseUpdate {
            phase: next,
            message,
        });
        Ok(())
    }

    fn invalid(&self, next: Phase) -> ResearchError {
        ResearchError::InvalidTransition {
            from: self
                .phase
                .map_or_else(|| "start".to_string(), |p| p.to_string()),
            to: next.to_string(),
        }
    }

    /// End the session with a terminal `error` event.
    pub fn fail(&mut self, error: &ResearchError) {
        let kind = error.kind();
        warn!(session = %self.id, phase = ?self.phase, kind = %kind, error = %error, "Research failed");
        self.outcome = SessionOutcome::Failed(kind);
        self.events.emit(SearchEvent::Error {
            error: error.to_string(),
            error_type: kind,
        });
    }

    pub fn outstanding(&self) -> Vec<&SubQuestion> {
        self.sub_questions
            .iter()
            .filter(|sq| sq.is_outstanding())
            .collect()
    }

    pub fn outstanding_ids(&self) -> Vec<SubQuestionId> {
        self.outstanding().iter().map(|sq| sq.id).collect()
    }

    pub fn sub_question_mut(&mut self, id: SubQuestionId) -> Option<&mut SubQuestion> {
        self.sub_questions.iter_mut().find(|sq| sq.id == id)
    }

    /// Sub-questions closed with low confidence.
    pub fn low_confidence(&self) -> Vec<&SubQuestion> {
        self.sub_questions
            .iter()
            .filter(|sq| sq.status == SubQuestionStatus::AnsweredLowConfidence)
            .collect()
    }

    /// Rough completion estimate for progress displays.
    pub fn progress(&self) -> f64 {
        match self.phase {
            None => 0.0,
            Some(Phase::Searching) => {
                let total = self.sub_questions.len().max(1);
                let done = total - self.outstanding().len().min(total);
                0.3 + 0.4 * (done as f64 / total as f64)
            }
            Some(phase) => phase.ordinal() as f64 / (Phase::ORDER.len() - 1) as f64,
        }
    }
}
