//! Research pipeline.
//!
//! Turns one question into a cited answer:
//! 1. **Understand**: decompose the question into sub-questions
//! 2. **Plan**: derive search queries for outstanding sub-questions
//! 3. **Search**: search, scrape and summarize, then score confidence;
//!    repeat while sub-questions lack evidence and budget remains
//! 4. **Analyze**: digest the gathered evidence
//! 5. **Synthesize**: stream an answer with `[n]` citations
//!
//! Progress is reported exclusively through [`SearchEvent`]s.

pub mod confidence;
pub mod decomposition;
pub mod display;
pub mod engine;
pub mod events;
pub mod executor;
pub mod planner;
pub mod session;
pub mod sources;
pub mod synthesis;

pub use confidence::{ConfidenceEvaluator, ConfidenceScore, Verdict, decide};
pub use decomposition::{QuestionDecomposer, SubQuestion, SubQuestionId, SubQuestionStatus};
pub use display::{DisplayState, Step, StepStatus, fold};
pub use engine::{ResearchEngine, ResearchHandle, SessionReport};
pub use events::{EventSink, SearchEvent};
pub use executor::{RoundReport, SearchExecutor};
pub use planner::{PlannedQuery, QueryId, QueryLedger, QueryPlanner};
pub use session::{Phase, ResearchSession, SessionOutcome};
pub use sources::{Source, SourceRef, SourceStore, normalize_url};
pub use synthesis::{Synthesis, Synthesizer};
