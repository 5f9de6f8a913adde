//! Query planning.
//!
//! Turns the outstanding sub-questions into the next batch of search
//! queries. Every query is scoped to one sub-question, distinct from all
//! queries already issued this session, and admitted through the
//! [`QueryLedger`], which enforces the session query cap.

use super::decomposition::{SubQuestion, SubQuestionId};
use crate::brain::{Brain, ModelTier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub const PLANNER_SYSTEM_PROMPT: &str = "You plan web search queries for a research assistant. \
Return JSON: {\"queries\": [{\"query\": \"...\", \"subQuestion\": <id>}]}. \
Each query targets exactly one of the listed sub-questions by id, is phrased for a web search engine, \
and must differ from the queries already issued.";

/// Suffixes tried, in order, when a deterministic query was already issued.
const FALLBACK_VARIANTS: &[&str] = &["", " latest data", " analysis report", " statistics"];

/// Session-unique sequential identifier of an issued query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub u32);

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// A query admitted for execution in the current round.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub id: QueryId,
    pub text: String,
    pub sub_question: SubQuestionId,
    /// 1-based position within the batch.
    pub index: usize,
    pub total: usize,
}

/// Case- and whitespace-insensitive identity of a query.
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Every query issued in a session, and the remaining budget.
#[derive(Debug, Clone)]
pub struct QueryLedger {
    issued: Vec<String>,
    seen: HashSet<String>,
    cap: usize,
}

impl QueryLedger {
    pub fn new(cap: usize) -> Self {
        Self {
            issued: Vec::new(),
            seen: HashSet::new(),
            cap,
        }
    }

    pub fn is_issued(&self, text: &str) -> bool {
        self.seen.contains(&normalize_query(text))
    }

    pub fn issued(&self) -> &[String] {
        &self.issued
    }

    pub fn issued_count(&self) -> usize {
        self.issued.len()
    }

    pub fn remaining(&self) -> usize {
        self.cap.saturating_sub(self.issued.len())
    }

    /// Record a query. Returns its id, or `None` if it is empty, a
    /// duplicate, or the cap is reached.
    pub fn admit(&mut self, text: &str) -> Option<QueryId> {
        let key = normalize_query(text);
        if key.is_empty() || self.remaining() == 0 || self.seen.contains(&key) {
            return None;
        }
        let id = QueryId(self.issued.len() as u32);
        self.seen.insert(key);
        self.issued.push(text.trim().to_string());
        Some(id)
    }
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    queries: Vec<PlanItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanItem {
    query: String,
    #[serde(default)]
    sub_question: Option<u32>,
}

/// A planned batch.
#[derive(Debug, Clone, Default)]
pub struct QueryBatch {
    pub queries: Vec<PlannedQuery>,
    /// True when deterministic queries replaced the model's plan.
    pub degraded: bool,
}

impl QueryBatch {
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Sub-questions searched by at least one query in the batch.
    pub fn targets(&self) -> HashSet<SubQuestionId> {
        self.queries.iter().map(|q| q.sub_question).collect()
    }
}

pub struct QueryPlanner {
    brain: Arc<Brain>,
    max_per_round: usize,
}

impl QueryPlanner {
    pub fn new(brain: Arc<Brain>, max_per_round: usize) -> Self {
        Self {
            brain,
            max_per_round,
        }
    }

    /// Plan the next batch for `outstanding`, admitting every query into
    /// `ledger`. An empty batch means no further queries are available.
    pub async fn plan(
        &self,
        question: &str,
        outstanding: &[&SubQuestion],
        ledger: &mut QueryLedger,
    ) -> QueryBatch {
        let budget = self.max_per_round.min(ledger.remaining());
        if budget == 0 || outstanding.is_empty() {
            debug!(budget, outstanding = outstanding.len(), "Nothing to plan");
            return QueryBatch::default();
        }

        let prompt = build_plan_prompt(question, outstanding, ledger.issued(), budget);
        let reply = self
            .brain
            .complete_json::<PlanReply>(ModelTier::Fast, PLANNER_SYSTEM_PROMPT, &prompt)
            .await;

        let admitted = match reply {
            Ok(reply) => admit_planned(reply.queries, outstanding, ledger, budget),
            Err(e) => {
                warn!(error = %e, "Query planning failed, using deterministic queries");
                Vec::new()
            }
        };

        let (admitted, degraded) = if admitted.is_empty() {
            (fallback_queries(outstanding, ledger, budget), true)
        } else {
            let mut admitted = admitted;
            cover_skipped(outstanding, ledger, budget, &mut admitted);
            (admitted, false)
        };

        let total = admitted.len();
        let queries = admitted
            .into_iter()
            .enumerate()
            .map(|(i, (id, text, sub_question))| PlannedQuery {
                id,
                text,
                sub_question,
                index: i + 1,
                total,
            })
            .collect();

        debug!(total, degraded, remaining = ledger.remaining(), "Query batch planned");
        QueryBatch { queries, degraded }
    }
}

fn build_plan_prompt(
    question: &str,
    outstanding: &[&SubQuestion],
    issued: &[String],
    budget: usize,
) -> String {
    let mut prompt = format!("Research question: {question}\n\nSub-questions needing evidence:\n");
    for sq in outstanding {
        prompt.push_str(&format!("- [{}] {}\n", sq.id.0, sq.text));
    }
    if !issued.is_empty() {
        prompt.push_str("\nAlready issued queries (do not repeat):\n");
        for q in issued {
            prompt.push_str(&format!("- {q}\n"));
        }
    }
    prompt.push_str(&format!("\nReturn at most {budget} queries."));
    prompt
}

fn admit_planned(
    items: Vec<PlanItem>,
    outstanding: &[&SubQuestion],
    ledger: &mut QueryLedger,
    budget: usize,
) -> Vec<(QueryId, String, SubQuestionId)> {
    let mut admitted = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        if admitted.len() >= budget {
            break;
        }
        // Untargeted queries are spread over the outstanding set.
        let target = match item.sub_question.map(SubQuestionId) {
            Some(id) if outstanding.iter().any(|sq| sq.id == id) => id,
            Some(id) => {
                debug!(
                    query = %item.query,
                    sub_question = %id,
                    "Planned query targets a closed sub-question, dropped"
                );
                continue;
            }
            None => outstanding[i % outstanding.len()].id,
        };
        match ledger.admit(&item.query) {
            Some(id) => admitted.push((id, item.query.trim().to_string(), target)),
            None => debug!(query = %item.query, "Planned query rejected as duplicate"),
        }
    }
    admitted
}

/// Give every outstanding sub-question the model skipped a deterministic
/// query, while the round budget allows.
fn cover_skipped(
    outstanding: &[&SubQuestion],
    ledger: &mut QueryLedger,
    budget: usize,
    admitted: &mut Vec<(QueryId, String, SubQuestionId)>,
) {
    for sq in outstanding {
        if admitted.len() >= budget {
            break;
        }
        if admitted.iter().any(|(_, _, target)| *target == sq.id) {
            continue;
        }
        if let Some((id, text)) = deterministic_query(sq, ledger) {
            debug!(sub_question = %sq.id, query = %text, "Covering sub-question skipped by the plan");
            admitted.push((id, text, sq.id));
        }
    }
}

/// Deterministic queries derived from the sub-question text.
fn fallback_queries(
    outstanding: &[&SubQuestion],
    ledger: &mut QueryLedger,
    budget: usize,
) -> Vec<(QueryId, String, SubQuestionId)> {
    let admitted: Vec<_> = outstanding
        .iter()
        .take(budget)
        .filter_map(|sq| deterministic_query(sq, ledger).map(|(id, text)| (id, text, sq.id)))
        .collect();
    if admitted.is_empty() {
        warn!("No unused deterministic queries remain");
    }
    admitted
}

fn deterministic_query(sq: &SubQuestion, ledger: &mut QueryLedger) -> Option<(QueryId, String)> {
    let base = sq.text.trim().trim_end_matches('?');
    FALLBACK_VARIANTS.iter().find_map(|suffix| {
        let text = format!("{base}{suffix}");
        ledger.admit(&text).map(|id| (id, text))
    })
}
