//! Prometheus metrics for the analyst pipeline
//!
//! All metrics live in the default registry; `gather_text()` renders them in
//! the Prometheus text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram, register_histogram_vec, CounterVec, Encoder,
    Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // LLM Task Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Prompt tasks completed, by task kind and status.
    ///
    /// Labels:
    /// - kind: task kind tag (e.g., "relevance_check", "code_solver")
    /// - status: "success", "backend_error", "parse_error", "timeout", "panic"
    pub static ref LLM_TASKS: CounterVec = register_counter_vec!(
        "dataloom_llm_tasks_total",
        "Prompt tasks completed by kind and status",
        &["kind", "status"]
    ).expect("failed to register LLM_TASKS metric");

    /// Latency of a single backend round trip, by task kind.
    pub static ref LLM_CALL_TIME: HistogramVec = register_histogram_vec!(
        "dataloom_llm_call_seconds",
        "Duration of LLM backend calls",
        &["kind"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_TIME metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Code Execution Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Executions of generated code, by status ("success", "error", "timeout").
    pub static ref CODE_EXECUTIONS: CounterVec = register_counter_vec!(
        "dataloom_code_executions_total",
        "Executions of generated code by status",
        &["status"]
    ).expect("failed to register CODE_EXECUTIONS metric");

    /// Wall-clock duration of generated code executions.
    pub static ref CODE_EXECUTION_DURATION: Histogram = register_histogram!(
        "dataloom_code_execution_seconds",
        "Duration of generated code executions",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("failed to register CODE_EXECUTION_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Pipeline Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Terminal outcomes of user turns.
    ///
    /// Labels:
    /// - outcome: "success", "exhausted", "no_relevant_source"
    pub static ref TURN_OUTCOMES: CounterVec = register_counter_vec!(
        "dataloom_turn_outcomes_total",
        "Terminal outcomes of user turns",
        &["outcome"]
    ).expect("failed to register TURN_OUTCOMES metric");

    /// Refinement retries consumed per feedback loop run.
    pub static ref RETRIES_USED: Histogram = register_histogram!(
        "dataloom_feedback_retries_used",
        "Refinement retries consumed per feedback loop run",
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 10.0]
    ).expect("failed to register RETRIES_USED metric");

    /// Relevance verdicts, by verdict ("relevant", "irrelevant").
    pub static ref RELEVANCE_VERDICTS: CounterVec = register_counter_vec!(
        "dataloom_relevance_verdicts_total",
        "Relevance verdicts returned by the LLM",
        &["verdict"]
    ).expect("failed to register RELEVANCE_VERDICTS metric");
}

/// Render every registered metric in text exposition format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
