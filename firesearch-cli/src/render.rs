//! Terminal and NDJSON rendering of a live research session.

use firesearch_core::research::{DisplayState, ResearchHandle, SessionReport};
use firesearch_core::research::events::thinking_variants;
use firesearch_core::{Phase, SearchEvent};
use std::io::{self, Write};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Human-readable progress with the answer streamed inline.
    Terminal,
    /// One JSON event per line.
    Json,
}

pub struct Renderer<W: Write> {
    out: W,
    mode: RenderMode,
    state: DisplayState,
    streaming: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, mode: RenderMode) -> Self {
        Self {
            out,
            mode,
            state: DisplayState::default(),
            streaming: false,
        }
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn render(&mut self, event: &SearchEvent) -> io::Result<()> {
        self.state.apply(event);
        match self.mode {
            RenderMode::Json => {
                serde_json::to_writer(&mut self.out, event)?;
                writeln!(self.out)?;
            }
            RenderMode::Terminal => self.render_terminal(event)?,
        }
        self.out.flush()
    }

    fn render_terminal(&mut self, event: &SearchEvent) -> io::Result<()> {
        match event {
            SearchEvent::PhaseUpdate { phase, message } => {
                self.end_stream()?;
                if *phase != Phase::Complete {
                    writeln!(self.out, "» {message}")?;
                }
            }
            SearchEvent::Thinking { message } => {
                if let Some(first) = thinking_variants(message).first() {
                    writeln!(self.out, "  {first}")?;
                }
            }
            SearchEvent::Searching {
                query,
                index,
                total,
                ..
            } => writeln!(self.out, "  [{index}/{total}] {query}")?,
            SearchEvent::Found { sources, .. } => {
                writeln!(self.out, "        {} results", sources.len())?
            }
            SearchEvent::Scraping { url, .. } => writeln!(self.out, "        reading {url}")?,
            SearchEvent::ContentChunk { chunk } => {
                if !self.streaming {
                    writeln!(self.out)?;
                    self.streaming = true;
                }
                write!(self.out, "{chunk}")?;
            }
            SearchEvent::FinalResult { content, sources } => {
                if self.state.answer.is_empty() {
                    writeln!(self.out, "\n{content}")?;
                }
                self.end_stream()?;
                if !sources.is_empty() {
                    writeln!(self.out, "\nSources:")?;
                    for (i, source) in sources.iter().enumerate() {
                        writeln!(self.out, "  [{}] {}", i + 1, source.title)?;
                        writeln!(self.out, "      {}", source.url)?;
                    }
                }
            }
            SearchEvent::Error { error, error_type } => {
                self.end_stream()?;
                writeln!(self.out, "\nResearch failed ({error_type}): {error}")?;
            }
        }
        Ok(())
    }

    fn end_stream(&mut self) -> io::Result<()> {
        if self.streaming {
            writeln!(self.out)?;
            self.streaming = false;
        }
        Ok(())
    }
}

/// Render a running session until its event stream closes. Ctrl-C cancels
/// the session; its terminal `error` event is still rendered. A failed
/// write cancels the session before the error is returned.
pub async fn drive<W: Write>(
    mut handle: ResearchHandle,
    renderer: &mut Renderer<W>,
) -> anyhow::Result<SessionReport> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.events.recv() => match event {
                Some(event) => {
                    if let Err(e) = renderer.render(&event) {
                        handle.cancel.cancel();
                        return Err(e.into());
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!("Interrupted, cancelling research session");
                handle.cancel.cancel();
            }
        }
    }

    Ok(handle.join.await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use firesearch_core::research::{QueryId, SourceRef, SubQuestionId};
    use firesearch_core::ErrorKind;
    use pretty_assertions::assert_eq;

    fn events() -> Vec<SearchEvent> {
        vec![
            SearchEvent::PhaseUpdate {
                phase: Phase::Searching,
                message: "Searching the web with 1 queries".into(),
            },
            SearchEvent::thinking("Reading sources|Comparing"),
            SearchEvent::Searching {
                query: "rust async".into(),
                index: 1,
                total: 1,
                query_id: QueryId(0),
                sub_question_id: SubQuestionId(0),
            },
            SearchEvent::Found {
                query: "rust async".into(),
                query_id: QueryId(0),
                sources: vec![SourceRef {
                    url: "https://tokio.example".into(),
                    title: "Tokio".into(),
                    summary: None,
                }],
            },
            SearchEvent::ContentChunk {
                chunk: "Use Tokio ".into(),
            },
            SearchEvent::ContentChunk {
                chunk: "[1].".into(),
            },
            SearchEvent::PhaseUpdate {
                phase: Phase::Complete,
                message: "Research complete".into(),
            },
            SearchEvent::FinalResult {
                content: "Use Tokio [1].".into(),
                sources: vec![SourceRef {
                    url: "https://tokio.example".into(),
                    title: "Tokio".into(),
                    summary: None,
                }],
            },
        ]
    }

    fn render_all(mode: RenderMode, events: &[SearchEvent]) -> String {
        let mut renderer = Renderer::new(Vec::new(), mode);
        for event in events {
            renderer.render(event).unwrap();
        }
        String::from_utf8(renderer.out).unwrap()
    }

    #[test]
    fn test_terminal_output() {
        let out = render_all(RenderMode::Terminal, &events());
        assert!(out.contains("» Searching the web with 1 queries"));
        assert!(out.contains("  Reading sources\n"));
        assert!(!out.contains("Comparing"));
        assert!(out.contains("[1/1] rust async"));
        assert!(out.contains("1 results"));
        assert!(out.contains("\nUse Tokio [1].\n"));
        assert!(out.contains("Sources:\n  [1] Tokio\n      https://tokio.example"));
        assert!(!out.contains("Research complete"));
    }

    #[test]
    fn test_final_result_without_chunks_prints_content() {
        let out = render_all(
            RenderMode::Terminal,
            &[SearchEvent::FinalResult {
                content: "Answer.".into(),
                sources: vec![],
            }],
        );
        assert_eq!(out, "\nAnswer.\n");
    }

    #[test]
    fn test_error_output() {
        let out = render_all(
            RenderMode::Terminal,
            &[SearchEvent::Error {
                error: "Research cancelled".into(),
                error_type: ErrorKind::Cancelled,
            }],
        );
        assert!(out.contains("Research failed (cancelled): Research cancelled"));
    }

    #[test]
    fn test_json_output_is_one_event_per_line() {
        let events = events();
        let out = render_all(RenderMode::Json, &events);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), events.len());
        for (line, event) in lines.iter().zip(&events) {
            let parsed: SearchEvent = serde_json::from_str(line).unwrap();
            assert_eq!(&parsed, event);
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_write_failure_cancels_session() {
        use firesearch_core::brain::{MockLlmProvider, MockReply};
        use firesearch_core::config::{LlmConfig, RetryConfig, SearchConfig};
        use firesearch_core::research::decomposition::DECOMPOSE_SYSTEM_PROMPT;
        use firesearch_core::web::{StaticScrapeProvider, StaticSearchProvider};
        use firesearch_core::{Brain, ResearchEngine};
        use std::sync::Arc;
        use std::time::Duration;

        let mock = MockLlmProvider::new().on_sequence(
            DECOMPOSE_SYSTEM_PROMPT,
            vec![MockReply::Delayed(Duration::from_secs(30), "{}".to_string())],
        );
        let brain = Arc::new(Brain::new(
            Arc::new(mock),
            LlmConfig::default(),
            RetryConfig::default(),
        ));
        let engine = ResearchEngine::new(
            brain,
            Arc::new(StaticSearchProvider::new()),
            Arc::new(StaticScrapeProvider::new("page")),
            SearchConfig::default(),
            RetryConfig::default(),
        );

        let handle = engine.spawn("What is Tokio?");
        let cancel = handle.cancel.clone();
        let mut renderer = Renderer::new(BrokenPipe, RenderMode::Json);

        assert!(drive(handle, &mut renderer).await.is_err());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_renderer_tracks_display_state() {
        let mut renderer = Renderer::new(io::sink(), RenderMode::Terminal);
        for event in &events() {
            renderer.render(event).unwrap();
        }
        assert!(renderer.state().is_finished());
        assert_eq!(renderer.state().answer, "Use Tokio [1].");
    }
}
