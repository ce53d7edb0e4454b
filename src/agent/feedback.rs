//! Code generation feedback loop
//!
//! ```text
//! Generate ──▶ Execute ──ok──▶ Done
//!                 ▲  │
//!                 │  └─err──▶ budget left? ──yes──▶ Refine ──┐
//!                 │                 │                        │
//!                 │                 no ──▶ Exhausted         │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! The loop is strictly sequential. Each failed execution spends one unit
//! of the retry budget before deciding whether to refine, so a budget of
//! `n` allows at most `n` executions.

use std::time::Instant;

use tracing::{info, info_span, warn, Instrument};

use super::executor::{TaskError, TaskExecutor};
use crate::config::AnalystConfig;
use crate::llm::PromptTask;
use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION, RETRIES_USED};
use crate::sandbox::{CodeRunner, ComputedValue, ExecutionError};
use crate::sources::DataSource;

/// Default number of refinement retries
pub const CODE_EXECUTION_RETRIES: u32 = 5;

/// Query sent to the refiner after a failed execution
pub fn refinement_query(query: &str, error: &str) -> String {
    format!("{}.\n\nCode Error: \"{}\"\n\nFix the issue.", query, error)
}

/// Limits for the loop and its optional summary
#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    pub retry_budget: u32,
    /// Stringified values longer than this are not summarized
    pub summary_max_chars: usize,
    /// Tables with more rows or columns than this are not summarized
    pub summary_max_table_dim: usize,
}

impl FeedbackConfig {
    pub fn from_analyst(config: &AnalystConfig) -> Self {
        Self {
            retry_budget: config.retry_budget,
            summary_max_chars: config.summary_max_chars,
            summary_max_table_dim: config.summary_max_table_dim,
        }
    }

    /// Whether a computed value is small enough to be worth summarizing
    pub fn should_summarize(&self, value: &ComputedValue, stringified: &str) -> bool {
        if value.is_figure() {
            return false;
        }
        if let Some((rows, columns)) = value.table_shape() {
            if rows > self.summary_max_table_dim || columns > self.summary_max_table_dim {
                return false;
            }
        }
        stringified.chars().count() <= self.summary_max_chars
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self::from_analyst(&AnalystConfig::default())
    }
}

/// Current step of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Generate,
    Execute,
    Refine,
    Done,
    Exhausted,
}

/// Mutable state owned by one loop run
#[derive(Debug, Clone, PartialEq)]
pub struct LoopState {
    pub code: Option<String>,
    pub retries_remaining: u32,
    pub last_error: Option<String>,
    /// Executions performed so far
    pub attempts: u32,
}

impl LoopState {
    pub fn new(prior_code: Option<String>, retry_budget: u32) -> Self {
        Self {
            code: prior_code,
            retries_remaining: retry_budget,
            last_error: None,
            attempts: 0,
        }
    }

    /// Record a failed execution and pick the next phase
    pub fn record_failure(&mut self, error: String) -> Phase {
        self.last_error = Some(error);
        self.retries_remaining = self.retries_remaining.saturating_sub(1);
        if self.retries_remaining > 0 {
            Phase::Refine
        } else {
            Phase::Exhausted
        }
    }
}

/// Terminal result of a loop run
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    Done {
        code: String,
        value: ComputedValue,
        summary: Option<String>,
        retries_used: u32,
        attempts: u32,
    },
    Exhausted {
        /// Last attempted code
        code: String,
        last_error: String,
        retries_used: u32,
        attempts: u32,
    },
}

impl LoopOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            LoopOutcome::Done { attempts, .. } | LoopOutcome::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Drives generation, execution and repair for one question
pub struct FeedbackLoop<'a> {
    executor: &'a TaskExecutor,
    runner: &'a dyn CodeRunner,
    config: FeedbackConfig,
}

impl<'a> FeedbackLoop<'a> {
    pub fn new(executor: &'a TaskExecutor, runner: &'a dyn CodeRunner, config: FeedbackConfig) -> Self {
        Self {
            executor,
            runner,
            config,
        }
    }

    /// Run the loop to a terminal state
    ///
    /// With `prior_code` the first generation refines that code instead of
    /// writing from scratch. Backend and parse failures of the code tasks
    /// are not retried and end the run with an error.
    pub async fn run(
        &self,
        query: &str,
        sources: &[DataSource],
        prior_code: Option<String>,
        turn_tag: &str,
    ) -> Result<LoopOutcome, TaskError> {
        let span = info_span!(
            "feedback_loop",
            turn = %turn_tag,
            sources = sources.len(),
            otel.name = "feedback_loop"
        );

        async {
            let budget = self.config.retry_budget;
            let mut state = LoopState::new(prior_code, budget);
            let mut phase = Phase::Generate;
            let mut value = None;

            loop {
                phase = match phase {
                    Phase::Generate => {
                        let task = match &state.code {
                            None => PromptTask::code_solver(sources.to_vec(), query),
                            Some(prior) => PromptTask::code_refinement(prior.clone(), sources.to_vec(), query),
                        };
                        state.code = Some(self.generate(task, turn_tag).await?);
                        Phase::Execute
                    }
                    Phase::Execute => {
                        let code = state.code.as_deref().unwrap_or_default();
                        state.attempts += 1;
                        match self.execute(code, sources, state.attempts).await {
                            Ok(computed) => {
                                value = Some(computed);
                                Phase::Done
                            }
                            Err(e) => {
                                warn!(
                                    attempt = state.attempts,
                                    retries_remaining = state.retries_remaining,
                                    error = %e,
                                    "Generated code failed"
                                );
                                state.record_failure(e.to_string())
                            }
                        }
                    }
                    Phase::Refine => {
                        let error = state.last_error.as_deref().unwrap_or_default();
                        let task = PromptTask::code_refinement(
                            state.code.clone().unwrap_or_default(),
                            sources.to_vec(),
                            refinement_query(query, error),
                        );
                        state.code = Some(self.generate(task, turn_tag).await?);
                        Phase::Execute
                    }
                    Phase::Done | Phase::Exhausted => break,
                };
            }

            let retries_used = budget - state.retries_remaining;
            RETRIES_USED.observe(retries_used as f64);
            let code = state.code.unwrap_or_default();

            match (phase, value) {
                (Phase::Done, Some(value)) => {
                    info!(attempts = state.attempts, retries_used, "Generated code succeeded");
                    let summary = self.summarize(&value, query, turn_tag).await;
                    Ok(LoopOutcome::Done {
                        code,
                        value,
                        summary,
                        retries_used,
                        attempts: state.attempts,
                    })
                }
                _ => {
                    let last_error = state.last_error.unwrap_or_default();
                    warn!(attempts = state.attempts, error = %last_error, "Retry budget exhausted");
                    Ok(LoopOutcome::Exhausted {
                        code,
                        last_error,
                        retries_used,
                        attempts: state.attempts,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn generate(&self, task: PromptTask, turn_tag: &str) -> Result<String, TaskError> {
        let kind = task.kind();
        let response = self.executor.execute_single(task.with_tag(turn_tag)).await?;
        let code = response.code().unwrap_or_default().to_string();
        info!(kind = %kind, code_len = code.len(), "Code generated");
        Ok(code)
    }

    async fn execute(
        &self,
        code: &str,
        sources: &[DataSource],
        attempt: u32,
    ) -> Result<ComputedValue, ExecutionError> {
        let span = info_span!(
            "code_execution",
            attempt,
            code_len = code.len(),
            otel.name = "code_execution"
        );

        let start = Instant::now();
        let result = self.runner.run(code, sources).instrument(span).await;
        CODE_EXECUTION_DURATION.observe(start.elapsed().as_secs_f64());

        let status = match &result {
            Ok(_) => "success",
            Err(ExecutionError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        CODE_EXECUTIONS.with_label_values(&[status]).inc();
        result
    }

    /// Best-effort summary; failures are logged and dropped
    async fn summarize(&self, value: &ComputedValue, query: &str, turn_tag: &str) -> Option<String> {
        let stringified = value.stringify();
        if !self.config.should_summarize(value, &stringified) {
            info!("Skipping summary for large or graphical result");
            return None;
        }

        let task = PromptTask::summarizer(stringified, query).with_tag(turn_tag);
        match self.executor.execute_single(task).await {
            Ok(response) => response.summary().map(str::to_string),
            Err(e) => {
                warn!(error = %e, "Summary failed");
                None
            }
        }
    }
}
