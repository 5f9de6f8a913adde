//! Research engine: drives a session through its phases.
//!
//! understanding → planning → searching (rounds of plan, search, scrape,
//! summarize, evaluate) → analyzing → synthesizing → complete. Every phase
//! change is a `phase-update` event; re-planning inside the search loop is
//! narrated with `thinking` events. Cancellation is honoured at every
//! suspension point.

use super::confidence::{ConfidenceEvaluator, Verdict, decide};
use super::decomposition::{QuestionDecomposer, SubQuestion, SubQuestionId, SubQuestionStatus};
use super::events::{EventSink, SearchEvent};
use super::executor::SearchExecutor;
use super::planner::{QueryBatch, QueryPlanner};
use super::session::{Phase, ResearchSession, SessionOutcome};
use super::sources::SourceRef;
use super::synthesis::{Synthesis, Synthesizer};
use crate::brain::Brain;
use crate::config::{FireSearchConfig, RetryConfig, SearchConfig};
use crate::error::{ErrorKind, ResearchError};
use crate::providers::{create_llm_provider, create_web_providers};
use crate::summarizer::SourceSummarizer;
use crate::types::TokenUsage;
use crate::web::{ScrapeProvider, SearchProvider};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Summary of a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub outcome: SessionOutcome,
    pub answer: Option<String>,
    pub sources: Vec<SourceRef>,
    pub sub_questions: Vec<SubQuestion>,
    pub rounds: u32,
    pub queries_issued: usize,
    /// Gateway token usage at the end of the session.
    pub usage: TokenUsage,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.outcome == SessionOutcome::Completed
    }
}

/// A session running on its own task.
pub struct ResearchHandle {
    pub events: mpsc::UnboundedReceiver<SearchEvent>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<SessionReport>,
}

/// The orchestrator. Cheap to clone; clones share providers and the gateway.
#[derive(Clone)]
pub struct ResearchEngine {
    brain: Arc<Brain>,
    config: SearchConfig,
    decomposer: Arc<QuestionDecomposer>,
    planner: Arc<QueryPlanner>,
    executor: Arc<SearchExecutor>,
    evaluator: Arc<ConfidenceEvaluator>,
    synthesizer: Arc<Synthesizer>,
}

impl ResearchEngine {
    pub fn new(
        brain: Arc<Brain>,
        search: Arc<dyn SearchProvider>,
        scrape: Arc<dyn ScrapeProvider>,
        config: SearchConfig,
        retry: RetryConfig,
    ) -> Self {
        let summarizer = Arc::new(SourceSummarizer::new(
            Arc::clone(&brain),
            config.summary_char_limit,
        ));
        Self {
            decomposer: Arc::new(QuestionDecomposer::new(
                Arc::clone(&brain),
                config.max_queries_per_round,
            )),
            planner: Arc::new(QueryPlanner::new(
                Arc::clone(&brain),
                config.max_queries_per_round,
            )),
            executor: Arc::new(SearchExecutor::new(
                search,
                scrape,
                summarizer,
                config.clone(),
                retry,
            )),
            evaluator: Arc::new(ConfidenceEvaluator::new(Arc::clone(&brain), config.clone())),
            synthesizer: Arc::new(Synthesizer::new(
                Arc::clone(&brain),
                config.synthesis_content_limit,
            )),
            brain,
            config,
        }
    }

    /// Build an engine with the HTTP providers named in `config`.
    pub fn from_config(config: &FireSearchConfig) -> Result<Self, ResearchError> {
        let provider = create_llm_provider(&config.llm)?;
        let (search, scrape) = create_web_providers(&config.firecrawl, &config.search)?;
        let brain = Arc::new(Brain::new(
            provider,
            config.llm.clone(),
            config.retry.clone(),
        ));
        Ok(Self::new(
            brain,
            search,
            scrape,
            config.search.clone(),
            config.retry.clone(),
        ))
    }

    pub fn brain(&self) -> &Arc<Brain> {
        &self.brain
    }

    /// Run a session on a new task.
    pub fn spawn(&self, question: impl Into<String>) -> ResearchHandle {
        let (events, rx) = EventSink::channel();
        let cancel = CancellationToken::new();
        let engine = self.clone();
        let question = question.into();
        let token = cancel.clone();
        let join = tokio::spawn(async move { engine.run(&question, events, token).await });
        ResearchHandle {
            events: rx,
            cancel,
            join,
        }
    }

    /// Run a session to its terminal event.
    pub async fn run(
        &self,
        question: &str,
        events: EventSink,
        cancel: CancellationToken,
    ) -> SessionReport {
        let mut session = ResearchSession::new(question, self.config.max_search_queries, events);
        info!(session = %session.id, question, "Research session started");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResearchError::Cancelled),
            result = self.drive(&mut session) => result,
        };

        let answer = match result {
            Ok(synthesis) => {
                session.events().emit(SearchEvent::FinalResult {
                    content: synthesis.answer.clone(),
                    sources: synthesis.sources,
                });
                Some(synthesis.answer)
            }
            Err(e) => {
                session.fail(&e);
                None
            }
        };

        let report = SessionReport {
            session_id: session.id,
            outcome: session.outcome().clone(),
            answer,
            sources: session.sources.refs(),
            sub_questions: session.sub_questions.clone(),
            rounds: session.rounds,
            queries_issued: session.ledger.issued_count(),
            usage: self.brain.total_usage(),
        };
        info!(
            session = %report.session_id,
            outcome = ?report.outcome,
            rounds = report.rounds,
            queries = report.queries_issued,
            sources = report.sources.len(),
            "Research session finished"
        );
        report
    }

    async fn drive(&self, session: &mut ResearchSession) -> Result<Synthesis, ResearchError> {
        let events = session.events().clone();
        let question = session.question.clone();

        session.transition(Phase::Understanding, "Understanding the question")?;
        events.thinking("Breaking the question into parts|Working out what needs evidence");
        let decomposition = self.decomposer.decompose(&question).await;
        session.sub_questions = decomposition.sub_questions;
        if session.sub_questions.len() > 1 {
            let parts: Vec<&str> = session
                .sub_questions
                .iter()
                .map(|sq| sq.text.as_str())
                .collect();
            events.thinking(format!(
                "Researching {} angles: {}",
                parts.len(),
                parts.join("; ")
            ));
        }

        session.transition(Phase::Planning, "Planning search queries")?;
        let mut batch = self.plan_next(&question, session).await;

        session.transition(
            Phase::Searching,
            format!("Searching the web with {} queries", batch.len()),
        )?;
        loop {
            if batch.is_empty() {
                events.thinking("No new search queries left to try");
                break;
            }
            session.rounds += 1;
            let report = self
                .executor
                .execute_round(&question, &batch.queries, &mut session.sources, &events)
                .await;
            events.thinking(format!(
                "Found {} new sources, read {}|Checking what the sources answer",
                report.new_sources, report.with_content
            ));

            self.evaluate_round(&question, &batch.targets(), session).await;

            let open = session.outstanding().len();
            if open == 0 {
                events.thinking("Enough evidence gathered");
                break;
            }
            if session.rounds >= self.config.max_rounds || session.ledger.remaining() == 0 {
                break;
            }
            events.thinking(format!(
                "Looking for more evidence on {open} open sub-question(s)|Refining search queries"
            ));
            batch = self.plan_next(&question, session).await;
        }
        close_exhausted(session);

        let usable = session.sources.usable().count();
        session.transition(
            Phase::Analyzing,
            format!("Analyzing {usable} of {} sources", session.sources.len()),
        )?;
        events.thinking(self.digest(session));

        session.transition(Phase::Synthesizing, "Writing the answer")?;
        let low = session.low_confidence();
        let synthesis = self
            .synthesizer
            .synthesize(&question, &session.sources, &low, &events)
            .await?;

        session.transition(Phase::Complete, "Research complete")?;
        Ok(synthesis)
    }

    async fn plan_next(&self, question: &str, session: &mut ResearchSession) -> QueryBatch {
        let outstanding: Vec<&SubQuestion> = session
            .sub_questions
            .iter()
            .filter(|sq| sq.is_outstanding())
            .collect();
        let batch = self
            .planner
            .plan(question, &outstanding, &mut session.ledger)
            .await;
        if batch.degraded && !batch.is_empty() {
            session
                .events()
                .thinking("Searching directly for each part of the question");
        }
        batch
    }

    /// Score outstanding sub-questions and apply the policy. Only the
    /// sub-questions in `searched` spend an attempt.
    async fn evaluate_round(
        &self,
        question: &str,
        searched: &HashSet<SubQuestionId>,
        session: &mut ResearchSession,
    ) {
        let outstanding: Vec<&SubQuestion> = session.outstanding();
        let scores = self
            .evaluator
            .evaluate_all(question, &outstanding, &session.sources)
            .await;

        for score in scores {
            let Some(sq) = session.sub_question_mut(score.sub_question) else {
                continue;
            };
            if searched.contains(&sq.id) {
                sq.attempts += 1;
            }
            sq.record_score(score.score);
            let verdict = decide(score.score, sq.attempts, &self.config);
            match verdict {
                Verdict::Answered => sq.status = SubQuestionStatus::Answered,
                Verdict::LowConfidence => sq.status = SubQuestionStatus::AnsweredLowConfidence,
                Verdict::NeedsMoreSearch => {}
            }
            info!(
                sub_question = %sq.id,
                score = score.score,
                attempts = sq.attempts,
                ?verdict,
                "Sub-question evaluated"
            );
        }
    }

    fn digest(&self, session: &ResearchSession) -> String {
        let coverage: Vec<String> = session
            .sub_questions
            .iter()
            .map(|sq| {
                let n = session
                    .sources
                    .for_sub_question(sq.id)
                    .filter(|s| s.is_usable())
                    .count();
                format!("{n} for \"{}\"", sq.text)
            })
            .collect();
        format!(
            "Reviewing {} usable sources ({})|Cross-checking facts across sources",
            session.sources.usable().count(),
            coverage.join(", ")
        )
    }
}

/// Close anything still outstanding once the search budget is spent.
fn close_exhausted(session: &mut ResearchSession) {
    let id = session.id;
    for sq in session
        .sub_questions
        .iter_mut()
        .filter(|sq| sq.is_outstanding())
    {
        warn!(
            session = %id,
            sub_question = %sq.id,
            kind = %ErrorKind::BudgetExhausted,
            "Search budget exhausted, answering with low confidence"
        );
        sq.status = SubQuestionStatus::AnsweredLowConfidence;
    }
}
