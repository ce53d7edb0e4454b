//! Orchestration of a data question
//!
//! # Architecture
//!
//! ```text
//! User question → Analyst::answer
//!                  ↓
//!           VectorStore.query() → candidate DataSources
//!                  ↓
//!           Relevance filter (TaskExecutor, N concurrent checks)
//!                  ↓
//!           FeedbackLoop: CodeSolver → CodeRunner
//!                  ↓  on error
//!           CodeRefinement → CodeRunner (until budget runs out)
//!                  ↓
//!           Summarizer (optional) → AppResult
//! ```

pub mod executor;
pub mod feedback;
pub mod relevance;
pub mod response;
pub mod sessions;
pub mod workflow;

pub use executor::{ProgressFn, TaskError, TaskExecutor, DEFAULT_MAX_WORKERS};
pub use feedback::{
    refinement_query, FeedbackConfig, FeedbackLoop, LoopOutcome, LoopState, Phase,
    CODE_EXECUTION_RETRIES,
};
pub use relevance::filter_relevant;
pub use response::{AppResult, EXECUTION_FAILED_PREFIX, NO_RELEVANT_SOURCE_MESSAGE};
pub use sessions::{Session, SessionSummary, Turn, PREV_PREFIX};
pub use workflow::{Analyst, AnalystError, Continuation};
