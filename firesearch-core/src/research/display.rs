//! Display state as a pure reduction of the event log.
//!
//! Everything a progress UI shows can be rebuilt from the events alone:
//! `fold(&events)` always yields the same [`DisplayState`], and applying
//! events one at a time as they arrive gives the same result.

use super::events::{SearchEvent, thinking_variants};
use super::planner::QueryId;
use super::session::Phase;
use super::sources::SourceRef;
use crate::error::ErrorKind;
use serde::Serialize;

/// Maximum characters of a query shown in its step label.
pub const QUERY_LABEL_CHARS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Completed,
    Active,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub label: String,
    pub status: StepStatus,
}

/// A query seen in a `searching` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryProgress {
    pub id: QueryId,
    pub query: String,
    /// Number of results, once its `found` event arrived.
    pub found: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayState {
    pub phase: Option<Phase>,
    pub queries: Vec<QueryProgress>,
    pub sources_found: usize,
    /// URLs handed to the extraction provider, in first-seen order.
    pub browsing: Vec<String>,
    /// Variants of the latest `thinking` message.
    pub thinking: Vec<String>,
    /// Answer text streamed so far.
    pub answer: String,
    pub final_result: Option<String>,
    pub sources: Vec<SourceRef>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub events_seen: usize,
}

impl DisplayState {
    pub fn apply(&mut self, event: &SearchEvent) {
        self.events_seen += 1;
        match event {
            SearchEvent::Thinking { message } => {
                self.thinking = thinking_variants(message)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
            }
            SearchEvent::PhaseUpdate { phase, .. } => self.phase = Some(*phase),
            SearchEvent::Searching { query, query_id, .. } => {
                if !self.queries.iter().any(|q| q.id == *query_id) {
                    self.queries.push(QueryProgress {
                        id: *query_id,
                        query: query.clone(),
                        found: None,
                    });
                }
            }
            SearchEvent::Found {
                query_id, sources, ..
            } => {
                self.sources_found += sources.len();
                if let Some(q) = self.queries.iter_mut().find(|q| q.id == *query_id) {
                    q.found = Some(sources.len());
                }
            }
            SearchEvent::Scraping { url, .. } => {
                if !self.browsing.contains(url) {
                    self.browsing.push(url.clone());
                }
            }
            SearchEvent::ContentChunk { chunk } => self.answer.push_str(chunk),
            SearchEvent::FinalResult { content, sources } => {
                self.final_result = Some(content.clone());
                self.sources = sources.clone();
            }
            SearchEvent::Error { error, error_type } => {
                self.error = Some(error.clone());
                self.error_kind = Some(*error_type);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.final_result.is_some() || self.error.is_some()
    }

    /// The progress checklist: phase steps, with one step per query after
    /// "Searching sources" once searching has begun.
    pub fn steps(&self) -> Vec<Step> {
        let current = self.phase.map(Phase::ordinal);
        let phase_step = |phase: Phase| {
            let status = match current {
                Some(c) if phase.ordinal() < c => StepStatus::Completed,
                Some(c) if phase.ordinal() == c => {
                    if phase == Phase::Complete {
                        StepStatus::Completed
                    } else {
                        StepStatus::Active
                    }
                }
                _ => StepStatus::Pending,
            };
            Step {
                id: phase.as_str().to_string(),
                label: phase_label(phase).to_string(),
                status,
            }
        };

        let mut steps: Vec<Step> = [Phase::Understanding, Phase::Planning, Phase::Searching]
            .into_iter()
            .map(phase_step)
            .collect();

        let searching = current.is_some_and(|c| c >= Phase::Searching.ordinal());
        if searching {
            steps.extend(self.queries.iter().map(|q| Step {
                id: format!("search-{}", q.id.0),
                label: query_label(&q.query),
                status: if q.found.is_some() {
                    StepStatus::Completed
                } else {
                    StepStatus::Active
                },
            }));
        }

        steps.extend(
            [Phase::Analyzing, Phase::Synthesizing, Phase::Complete]
                .into_iter()
                .map(phase_step),
        );
        steps
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Understanding => "Understanding request",
        Phase::Planning => "Planning search",
        Phase::Searching => "Searching sources",
        Phase::Analyzing => "Analyzing content",
        Phase::Synthesizing => "Synthesizing answer",
        Phase::Complete => "Complete",
    }
}

/// Cut a query to [`QUERY_LABEL_CHARS`] characters, appending `…` when cut.
pub fn query_label(query: &str) -> String {
    if query.chars().count() > QUERY_LABEL_CHARS {
        let mut label: String = query.chars().take(QUERY_LABEL_CHARS).collect();
        label.push('…');
        label
    } else {
        query.to_string()
    }
}

/// Rebuild display state from an event log.
pub fn fold(events: &[SearchEvent]) -> DisplayState {
    events.iter().fold(DisplayState::default(), |mut state, event| {
        state.apply(event);
        state
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::decomposition::SubQuestionId;
    use pretty_assertions::assert_eq;

    fn phase(p: Phase) -> SearchEvent {
        SearchEvent::PhaseUpdate {
            phase: p,
            message: String::new(),
        }
    }

    fn searching(id: u32, query: &str) -> SearchEvent {
        SearchEvent::Searching {
            query: query.to_string(),
            index: id as usize + 1,
            total: 2,
            query_id: QueryId(id),
            sub_question_id: SubQuestionId(0),
        }
    }

    fn found(id: u32, query: &str, n: usize) -> SearchEvent {
        SearchEvent::Found {
            query: query.to_string(),
            query_id: QueryId(id),
            sources: (0..n)
                .map(|i| SourceRef {
                    url: format!("https://example.com/{id}/{i}"),
                    title: format!("T{i}"),
                    summary: None,
                })
                .collect(),
        }
    }

    fn log() -> Vec<SearchEvent> {
        vec![
            phase(Phase::Understanding),
            SearchEvent::thinking("Reading|Thinking"),
            phase(Phase::Planning),
            phase(Phase::Searching),
            searching(0, "rust async runtimes compared in depth"),
            searching(1, "tokio"),
            found(1, "tokio", 3),
            SearchEvent::Scraping {
                query: "tokio".into(),
                query_id: QueryId(1),
                url: "https://example.com/1/0".into(),
            },
        ]
    }

    #[test]
    fn test_fold_tracks_progress() {
        let state = fold(&log());
        assert_eq!(state.phase, Some(Phase::Searching));
        assert_eq!(state.sources_found, 3);
        assert_eq!(state.browsing, vec!["https://example.com/1/0"]);
        assert_eq!(state.thinking, vec!["Reading", "Thinking"]);
        assert_eq!(state.events_seen, 8);
        assert!(!state.is_finished());

        let steps = state.steps();
        let labels: Vec<_> = steps.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Understanding request",
                "Planning search",
                "Searching sources",
                "rust async runtimes compa…",
                "tokio",
                "Analyzing content",
                "Synthesizing answer",
                "Complete"
            ]
        );
        let statuses: Vec<_> = steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                StepStatus::Completed,
                StepStatus::Completed,
                StepStatus::Active,
                StepStatus::Active,
                StepStatus::Completed,
                StepStatus::Pending,
                StepStatus::Pending,
                StepStatus::Pending
            ]
        );
    }

    #[test]
    fn test_queries_match_by_id_not_text() {
        let events = vec![
            phase(Phase::Understanding),
            phase(Phase::Planning),
            phase(Phase::Searching),
            searching(0, "Same Text"),
            searching(1, "same text"),
            found(1, "SAME TEXT", 1),
        ];
        let state = fold(&events);
        assert_eq!(state.queries[0].found, None);
        assert_eq!(state.queries[1].found, Some(1));
    }

    #[test]
    fn test_no_query_steps_before_searching() {
        let state = fold(&[phase(Phase::Understanding), phase(Phase::Planning)]);
        assert_eq!(state.steps().len(), 6);
        assert_eq!(state.steps()[1].status, StepStatus::Active);
    }

    #[test]
    fn test_final_result_and_answer() {
        let mut events = log();
        events.push(phase(Phase::Analyzing));
        events.push(phase(Phase::Synthesizing));
        events.push(SearchEvent::ContentChunk { chunk: "Hello ".into() });
        events.push(SearchEvent::ContentChunk { chunk: "world".into() });
        events.push(phase(Phase::Complete));
        events.push(SearchEvent::FinalResult {
            content: "Hello world".into(),
            sources: vec![],
        });
        let state = fold(&events);
        assert_eq!(state.answer, "Hello world");
        assert_eq!(state.final_result.as_deref(), Some("Hello world"));
        assert!(state.is_finished());
        assert!(
            state
                .steps()
                .iter()
                .filter(|s| !s.id.starts_with("search-"))
                .all(|s| s.status == StepStatus::Completed)
        );
    }

    #[test]
    fn test_error_state() {
        let state = fold(&[
            phase(Phase::Understanding),
            SearchEvent::Error {
                error: "cancelled".into(),
                error_type: ErrorKind::Cancelled,
            },
        ]);
        assert_eq!(state.error_kind, Some(ErrorKind::Cancelled));
        assert!(state.is_finished());
    }

    #[test]
    fn test_incremental_apply_matches_fold() {
        let events = log();
        let mut live = DisplayState::default();
        for e in &events {
            live.apply(e);
        }
        assert_eq!(live, fold(&events));
    }

    #[test]
    fn test_query_label() {
        assert_eq!(query_label("short"), "short");
        assert_eq!(query_label(&"a".repeat(25)), "a".repeat(25));
        assert_eq!(query_label(&"a".repeat(26)), format!("{}…", "a".repeat(25)));
    }
}
