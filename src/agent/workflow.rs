//! Question answering workflow
//!
//! ```text
//! query ──▶ VectorStore::query (top N) ──▶ relevance filter ──┐
//!                                                             ├──▶ feedback loop ──▶ AppResult
//! continuation ──▶ VectorStore::get (by id, no filter) ───────┘
//! ```

use std::sync::Arc;

use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::executor::{ProgressFn, TaskError, TaskExecutor};
use super::feedback::{FeedbackConfig, FeedbackLoop};
use super::relevance::filter_relevant;
use super::response::AppResult;
use crate::config::AnalystConfig;
use crate::llm::{backend_from_config, LlmBackend};
use crate::sandbox::{CodeRunner, PythonSandbox, SandboxConfig};
use crate::sources::{get_sources, query_sources, StoreError, VectorStore};
use crate::trace_log;

/// Code and sources of a previous turn to build on
#[derive(Debug, Clone, PartialEq)]
pub struct Continuation {
    pub code: String,
    pub source_ids: Vec<String>,
}

impl Continuation {
    /// Continuation from a prior result, if it produced code
    pub fn from_result(result: &AppResult) -> Option<Self> {
        result.code.as_ref().map(|code| Self {
            code: code.clone(),
            source_ids: result.source_ids.clone(),
        })
    }
}

/// Error type for a workflow turn
#[derive(Debug)]
pub enum AnalystError {
    /// Candidate retrieval failed
    Store(StoreError),
    /// An LLM task failed hard (backend, timeout or unparseable reply)
    Task(TaskError),
}

impl std::fmt::Display for AnalystError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalystError::Store(e) => write!(f, "Source lookup failed: {}", e),
            AnalystError::Task(e) => write!(f, "LLM task failed: {}", e),
        }
    }
}

impl std::error::Error for AnalystError {}

impl From<StoreError> for AnalystError {
    fn from(e: StoreError) -> Self {
        AnalystError::Store(e)
    }
}

impl From<TaskError> for AnalystError {
    fn from(e: TaskError) -> Self {
        AnalystError::Task(e)
    }
}

/// Answers data questions against the sources in a vector store
pub struct Analyst {
    config: AnalystConfig,
    backend: Arc<dyn LlmBackend>,
    store: Arc<dyn VectorStore>,
    runner: Arc<dyn CodeRunner>,
    on_progress: Option<ProgressFn>,
}

impl Analyst {
    pub fn new(
        config: AnalystConfig,
        backend: Arc<dyn LlmBackend>,
        store: Arc<dyn VectorStore>,
        runner: Arc<dyn CodeRunner>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            runner,
            on_progress: None,
        }
    }

    /// Analyst with the configured LLM backend and a Python sandbox
    pub fn from_config(config: AnalystConfig, store: Arc<dyn VectorStore>) -> Self {
        let backend = backend_from_config(&config);
        let runner = Arc::new(PythonSandbox::new(SandboxConfig::from_analyst(&config)));
        Self::new(config, backend, store, runner)
    }

    /// Report relevance-check progress through `callback`
    pub fn with_progress(mut self, callback: ProgressFn) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Answer one question
    ///
    /// Without a continuation the candidates come from a similarity query
    /// and pass through the relevance filter. With one, the previous turn's
    /// sources are reused as-is and its code is refined.
    pub async fn answer(
        &self,
        query: &str,
        continuation: Option<&Continuation>,
    ) -> Result<AppResult, AnalystError> {
        let trace_id = Uuid::now_v7().to_string();
        let turn_tag = format!("turn:{}", trace_id);

        let span = info_span!(
            "analyst_turn",
            trace_id = %trace_id,
            continuation = continuation.is_some(),
            model = %self.config.model,
            otel.name = "analyst_turn"
        );

        async {
            trace_log!(info, trace_id, query = %query, "Answering question");
            let executor = TaskExecutor::new(Arc::clone(&self.backend), self.config.llm_timeout());

            let (sources, prior_code) = match continuation {
                Some(previous) => {
                    let sources = get_sources(self.store.as_ref(), &previous.source_ids).await?;
                    (sources, Some(previous.code.clone()))
                }
                None => {
                    let candidates =
                        query_sources(self.store.as_ref(), query, self.config.top_n).await?;
                    trace_log!(debug, trace_id, candidates = candidates.len(), "Retrieved candidates");
                    let relevant = filter_relevant(
                        &executor,
                        &candidates,
                        query,
                        &turn_tag,
                        self.config.max_workers,
                        self.on_progress.clone(),
                    )
                    .await?;
                    (relevant, None)
                }
            };

            if sources.is_empty() {
                trace_log!(info, trace_id, "No relevant data source");
                return Ok(AppResult::no_relevant_source(query, &trace_id));
            }

            let source_ids: Vec<String> = sources.iter().map(|s| s.id.clone()).collect();
            let feedback = FeedbackLoop::new(
                &executor,
                self.runner.as_ref(),
                FeedbackConfig::from_analyst(&self.config),
            );
            let outcome = feedback.run(query, &sources, prior_code, &turn_tag).await?;
            trace_log!(debug, trace_id, attempts = outcome.attempts(), "Feedback loop finished");

            let result = AppResult::from_outcome(query, outcome, source_ids, &trace_id);
            trace_log!(
                info,
                trace_id,
                success = result.success,
                retries_used = result.retries_used,
                "Question answered"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }
}
