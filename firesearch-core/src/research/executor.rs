//! Search, scrape and summarize one round of planned queries.
//!
//! Searches for every query in the batch run concurrently; their results
//! are fanned back in and deduplicated into the session's [`SourceStore`].
//! The best new sources (provider rank, interleaved across queries) are
//! then scraped concurrently under a hard timeout, and summaries are
//! generated for every source that gained content. Failures degrade the
//! affected source and never abort the round.

use super::events::{EventSink, SearchEvent};
use super::planner::{PlannedQuery, QueryId};
use super::sources::{Source, SourceRef, SourceStore};
use crate::config::{RetryConfig, SearchConfig};
use crate::error::ProviderError;
use crate::providers::with_retry;
use crate::summarizer::SourceSummarizer;
use crate::web::{ScrapeProvider, SearchHit, SearchProvider};
use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened during one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub queries: usize,
    pub failed_searches: usize,
    pub results: usize,
    pub new_sources: usize,
    /// Sources selected for extraction.
    pub scrape_targets: usize,
    /// Sources whose content was attached (scraped or provided inline).
    pub with_content: usize,
    pub failed_scrapes: usize,
    pub summarized: usize,
}

enum ScrapeOutcome {
    Content(String),
    /// Extracted text below the minimum length.
    TooShort(usize),
    Failed(ProviderError),
}

struct ScrapeTarget {
    url: String,
    query: String,
    query_id: QueryId,
}

/// Runs rounds against the search and extraction providers.
pub struct SearchExecutor {
    search: Arc<dyn SearchProvider>,
    scrape: Arc<dyn ScrapeProvider>,
    summarizer: Arc<SourceSummarizer>,
    config: SearchConfig,
    retry: RetryConfig,
}

impl SearchExecutor {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        scrape: Arc<dyn ScrapeProvider>,
        summarizer: Arc<SourceSummarizer>,
        config: SearchConfig,
        retry: RetryConfig,
    ) -> Self {
        let retry = retry.with_max_retries(config.max_retries);
        Self {
            search,
            scrape,
            summarizer,
            config,
            retry,
        }
    }

    /// Execute one batch, updating `store` after each fan-in.
    pub async fn execute_round(
        &self,
        question: &str,
        queries: &[PlannedQuery],
        store: &mut SourceStore,
        events: &EventSink,
    ) -> RoundReport {
        let mut report = RoundReport {
            queries: queries.len(),
            ..Default::default()
        };
        if queries.is_empty() {
            return report;
        }

        // Fan out searches; `found` events land in completion order.
        let mut results: Vec<(usize, Option<Vec<SearchHit>>)> =
            stream::iter(queries.iter().cloned().enumerate())
                .map(|(i, query)| async move { (i, self.search_one(&query, events).await) })
                .buffer_unordered(queries.len())
                .collect()
                .await;
        results.sort_by_key(|(i, _)| *i);

        // Fan in: dedup into the store, collect new sources by rank.
        let now = Utc::now();
        let mut fresh: Vec<(usize, usize, ScrapeTarget)> = Vec::new();
        let mut needs_summary: Vec<String> = Vec::new();
        for (i, hits) in results {
            let query = &queries[i];
            let Some(hits) = hits else {
                report.failed_searches += 1;
                continue;
            };
            report.results += hits.len();
            for (rank, hit) in hits.into_iter().enumerate() {
                let inline = hit
                    .content
                    .clone()
                    .filter(|c| c.trim().chars().count() >= self.config.min_content_length);
                let url = hit.url.clone();
                if !store.insert(source_from_hit(hit, query, rank)) {
                    continue;
                }
                report.new_sources += 1;
                match inline {
                    Some(content) => {
                        store.attach_content(&url, content, now);
                        report.with_content += 1;
                        needs_summary.push(url);
                    }
                    None => fresh.push((
                        rank,
                        i,
                        ScrapeTarget {
                            url,
                            query: query.text.clone(),
                            query_id: query.id,
                        },
                    )),
                }
            }
        }

        // Interleave by provider rank across queries.
        fresh.sort_by_key(|(rank, i, _)| (*rank, *i));
        let targets: Vec<ScrapeTarget> = fresh
            .into_iter()
            .take(self.config.max_sources_to_scrape)
            .map(|(_, _, t)| t)
            .collect();
        report.scrape_targets = targets.len();

        if !targets.is_empty() {
            let concurrency = targets.len();
            let outcomes: Vec<(String, ScrapeOutcome)> = stream::iter(targets)
                .map(|target| async move {
                    let outcome = self.scrape_one(&target, events).await;
                    (target.url, outcome)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            let scraped_at = Utc::now();
            for (url, outcome) in outcomes {
                match outcome {
                    ScrapeOutcome::Content(content) => {
                        if store.attach_content(&url, content, scraped_at) {
                            report.with_content += 1;
                            needs_summary.push(url);
                        }
                    }
                    ScrapeOutcome::TooShort(chars) => {
                        debug!(%url, chars, min = self.config.min_content_length, "Extracted text too short, discarded");
                    }
                    ScrapeOutcome::Failed(e) => {
                        warn!(%url, error = %e, "Extraction failed permanently, keeping source without content");
                        store.mark_scrape_failed(&url);
                        report.failed_scrapes += 1;
                    }
                }
            }
        }

        report.summarized = self.summarize(question, &needs_summary, store).await;
        debug!(?report, "Round complete");
        report
    }

    async fn search_one(&self, query: &PlannedQuery, events: &EventSink) -> Option<Vec<SearchHit>> {
        events.emit(SearchEvent::Searching {
            query: query.text.clone(),
            index: query.index,
            total: query.total,
            query_id: query.id,
            sub_question_id: query.sub_question,
        });

        let timeout = self.config.search_timeout();
        let limit = self.config.max_sources_per_search;
        let text = query.text.as_str();
        let provider = self.search.name().to_string();
        let result = with_retry(&self.retry, || {
            let provider = provider.clone();
            async move {
                tokio::time::timeout(timeout, self.search.search(text, limit))
                    .await
                    .map_err(|_| ProviderError::Timeout {
                        provider,
                        timeout_ms: timeout.as_millis() as u64,
                    })?
            }
        })
        .await;

        let hits = match result {
            Ok(mut hits) => {
                hits.truncate(limit);
                Some(hits)
            }
            Err(e) => {
                warn!(query = %query.text, error = %e, "Search failed, reporting no results");
                None
            }
        };

        let sources: Vec<SourceRef> = hits
            .iter()
            .flatten()
            .map(|h| SourceRef {
                url: h.url.clone(),
                title: h.title.clone(),
                summary: None,
            })
            .collect();
        debug!(query = %query.text, count = sources.len(), "Search returned");
        events.emit(SearchEvent::Found {
            query: query.text.clone(),
            query_id: query.id,
            sources,
        });
        hits
    }

    /// Extract one URL, emitting `scraping` before every attempt.
    async fn scrape_one(&self, target: &ScrapeTarget, events: &EventSink) -> ScrapeOutcome {
        let timeout = self.config.scrape_timeout();
        let provider = self.scrape.name().to_string();
        let result = with_retry(&self.retry, || {
            let provider = provider.clone();
            async move {
                events.emit(SearchEvent::Scraping {
                    query: target.query.clone(),
                    query_id: target.query_id,
                    url: target.url.clone(),
                });
                tokio::time::timeout(timeout, self.scrape.scrape(&target.url))
                    .await
                    .map_err(|_| ProviderError::Timeout {
                        provider,
                        timeout_ms: timeout.as_millis() as u64,
                    })?
            }
        })
        .await;

        match result {
            Ok(page) => {
                let chars = page.content.trim().chars().count();
                if chars >= self.config.min_content_length {
                    ScrapeOutcome::Content(page.content)
                } else {
                    ScrapeOutcome::TooShort(chars)
                }
            }
            Err(e) => ScrapeOutcome::Failed(e),
        }
    }

    async fn summarize(&self, question: &str, urls: &[String], store: &mut SourceStore) -> usize {
        let inputs: Vec<(String, String, String)> = urls
            .iter()
            .filter_map(|url| {
                let source = store.get(url)?;
                let content = source.raw_content.clone()?;
                Some((url.clone(), source.title.clone(), content))
            })
            .collect();

        let summaries = if self.config.parallel_summary_generation {
            join_all(inputs.iter().map(|(url, title, content)| async move {
                let summary = self.summarizer.summarize_or_truncate(question, title, content).await;
                (url.clone(), summary)
            }))
            .await
        } else {
            let mut out = Vec::with_capacity(inputs.len());
            for (url, title, content) in &inputs {
                let summary = self.summarizer.summarize_or_truncate(question, title, content).await;
                out.push((url.clone(), summary));
            }
            out
        };

        summaries
            .into_iter()
            .filter(|(url, summary)| store.attach_summary(url, summary.text.clone()))
            .count()
    }
}

fn source_from_hit(hit: SearchHit, query: &PlannedQuery, rank: usize) -> Source {
    Source {
        url: hit.url,
        title: hit.title,
        snippet: hit.snippet,
        raw_content: None,
        summary: None,
        discovered_by: query.id,
        discovered_by_query: query.text.clone(),
        sub_question: query.sub_question,
        rank,
        discovered_at: Utc::now(),
        scraped_at: None,
        scrape_failed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{Brain, MockLlmProvider};
    use crate::config::LlmConfig;
    use crate::research::decomposition::SubQuestionId;
    use crate::web::{ScrapeBehavior, StaticScrapeProvider, StaticSearchProvider};

    const PAGE: &str = "Rust is a systems programming language focused on safety, speed and concurrency. \
It achieves memory safety without garbage collection.";

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn config() -> SearchConfig {
        SearchConfig {
            max_retries: 1,
            scrape_timeout_ms: 50,
            ..Default::default()
        }
    }

    fn executor(
        search: Arc<StaticSearchProvider>,
        scrape: Arc<StaticScrapeProvider>,
        config: SearchConfig,
    ) -> SearchExecutor {
        let brain = Arc::new(Brain::new(
            Arc::new(MockLlmProvider::with_response("A short summary.")),
            LlmConfig::default(),
            fast_retry().with_max_retries(0),
        ));
        let summarizer = Arc::new(SourceSummarizer::new(brain, config.summary_char_limit));
        SearchExecutor::new(search, scrape, summarizer, config, fast_retry())
    }

    fn query(id: u32, text: &str, index: usize, total: usize) -> PlannedQuery {
        PlannedQuery {
            id: QueryId(id),
            text: text.to_string(),
            sub_question: SubQuestionId(0),
            index,
            total,
        }
    }

    fn hits(prefix: &str, n: usize) -> Vec<SearchHit> {
        (0..n)
            .map(|i| SearchHit::new(format!("https://{prefix}.example/{i}"), format!("{prefix} {i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_round_scrapes_and_summarizes() {
        let search = Arc::new(
            StaticSearchProvider::new()
                .with_results("a", hits("a", 2))
                .with_results("b", hits("b", 1)),
        );
        let scrape = Arc::new(StaticScrapeProvider::new(PAGE));
        let exec = executor(search, scrape.clone(), config());
        let mut store = SourceStore::new();
        let events = EventSink::new();
        let queries = vec![query(0, "a", 1, 2), query(1, "b", 2, 2)];

        let report = exec.execute_round("q", &queries, &mut store, &events).await;

        assert_eq!(report.new_sources, 3);
        assert_eq!(report.with_content, 3);
        assert_eq!(report.summarized, 3);
        assert_eq!(scrape.calls().len(), 3);
        assert!(store.iter().all(|s| s.summary.as_deref() == Some("A short summary.")));

        let kinds: Vec<_> = events.snapshot().iter().map(SearchEvent::kind).collect();
        assert_eq!(kinds.iter().filter(|k| **k == "searching").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "found").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "scraping").count(), 3);
    }

    #[tokio::test]
    async fn test_duplicates_across_queries_are_merged() {
        let shared = vec![SearchHit::new("https://shared.example/page", "Shared")];
        let search = Arc::new(
            StaticSearchProvider::new()
                .with_results("a", shared.clone())
                .with_results("b", vec![SearchHit::new("http://www.shared.example/page/", "Again")]),
        );
        let exec = executor(search, Arc::new(StaticScrapeProvider::new(PAGE)), config());
        let mut store = SourceStore::new();
        let report = exec
            .execute_round("q", &[query(0, "a", 1, 2), query(1, "b", 2, 2)], &mut store, &EventSink::new())
            .await;
        assert_eq!(report.results, 2);
        assert_eq!(report.new_sources, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_scrape_cap_interleaves_by_rank() {
        let search = Arc::new(
            StaticSearchProvider::new()
                .with_results("a", hits("a", 3))
                .with_results("b", hits("b", 3)),
        );
        let scrape = Arc::new(StaticScrapeProvider::new(PAGE));
        let exec = executor(
            search,
            scrape.clone(),
            SearchConfig {
                max_sources_to_scrape: 4,
                ..config()
            },
        );
        let mut store = SourceStore::new();
        exec.execute_round("q", &[query(0, "a", 1, 2), query(1, "b", 2, 2)], &mut store, &EventSink::new())
            .await;

        let mut scraped = scrape.calls();
        scraped.sort();
        assert_eq!(
            scraped,
            vec![
                "https://a.example/0",
                "https://a.example/1",
                "https://b.example/0",
                "https://b.example/1"
            ]
        );
        assert_eq!(store.len(), 6);
        assert_eq!(store.with_content().count(), 4);
    }

    #[tokio::test]
    async fn test_hanging_scrape_is_retried_then_abandoned() {
        let search = Arc::new(StaticSearchProvider::new().with_results("a", hits("a", 2)));
        let scrape = Arc::new(
            StaticScrapeProvider::new(PAGE).with_page("https://a.example/1", ScrapeBehavior::Hang),
        );
        let exec = executor(search, scrape.clone(), config());
        let mut store = SourceStore::new();
        let events = EventSink::new();
        let report = exec
            .execute_round("q", &[query(0, "a", 1, 1)], &mut store, &events)
            .await;

        assert_eq!(report.failed_scrapes, 1);
        let failed = store.get("https://a.example/1").unwrap();
        assert!(failed.scrape_failed);
        assert!(failed.raw_content.is_none());
        assert!(failed.summary.is_none());
        // One attempt plus one retry.
        let attempts = scrape.calls().iter().filter(|u| u.ends_with("/1")).count();
        assert_eq!(attempts, 2);
        assert_eq!(store.with_content().count(), 1);
    }

    #[tokio::test]
    async fn test_short_content_is_not_attached() {
        let search = Arc::new(StaticSearchProvider::new().with_results("a", hits("a", 1)));
        let scrape = Arc::new(StaticScrapeProvider::new("tiny"));
        let exec = executor(search, scrape.clone(), config());
        let mut store = SourceStore::new();
        let report = exec
            .execute_round("q", &[query(0, "a", 1, 1)], &mut store, &EventSink::new())
            .await;
        assert_eq!(report.with_content, 0);
        assert_eq!(report.failed_scrapes, 0);
        assert_eq!(scrape.calls().len(), 1);
        assert!(!store.get("https://a.example/0").unwrap().has_content());
    }

    #[tokio::test]
    async fn test_inline_content_skips_scrape() {
        let search = Arc::new(StaticSearchProvider::new().with_results(
            "a",
            vec![SearchHit::new("https://a.example/0", "A").with_content(PAGE)],
        ));
        let scrape = Arc::new(StaticScrapeProvider::new(PAGE));
        let exec = executor(search, scrape.clone(), config());
        let mut store = SourceStore::new();
        let report = exec
            .execute_round("q", &[query(0, "a", 1, 1)], &mut store, &EventSink::new())
            .await;
        assert!(scrape.calls().is_empty());
        assert_eq!(report.with_content, 1);
        assert_eq!(report.summarized, 1);
    }

    #[tokio::test]
    async fn test_failed_search_reports_empty_found() {
        let search = Arc::new(StaticSearchProvider::new().failing("a"));
        let exec = executor(search.clone(), Arc::new(StaticScrapeProvider::new(PAGE)), config());
        let mut store = SourceStore::new();
        let events = EventSink::new();
        let report = exec
            .execute_round("q", &[query(0, "a", 1, 1)], &mut store, &events)
            .await;
        assert_eq!(report.failed_searches, 1);
        // One attempt plus one retry.
        assert_eq!(search.calls().len(), 2);
        let found = events
            .snapshot()
            .into_iter()
            .find_map(|e| match e {
                SearchEvent::Found { sources, .. } => Some(sources),
                _ => None,
            })
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_sequential_summaries() {
        let search = Arc::new(StaticSearchProvider::new().with_results("a", hits("a", 2)));
        let exec = executor(
            search,
            Arc::new(StaticScrapeProvider::new(PAGE)),
            SearchConfig {
                parallel_summary_generation: false,
                ..config()
            },
        );
        let mut store = SourceStore::new();
        let report = exec
            .execute_round("q", &[query(0, "a", 1, 1)], &mut store, &EventSink::new())
            .await;
        assert_eq!(report.summarized, 2);
    }
}
