//! User-facing result of one question

use serde::Serialize;

use super::feedback::LoopOutcome;
use crate::metrics::TURN_OUTCOMES;
use crate::sandbox::ComputedValue;

/// Message for a turn where no candidate source was relevant
pub const NO_RELEVANT_SOURCE_MESSAGE: &str = "Could not find relevant data source.";

/// Prefix of the message for a turn whose retry budget ran out
pub const EXECUTION_FAILED_PREFIX: &str = "Generated code did not execute successfully.\nLatest Error: ";

/// Outcome of one user turn; immutable once built
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppResult {
    pub user_prompt: String,
    pub success: bool,
    /// Summary on success, explanation on failure
    pub message: String,
    pub computed_value: Option<ComputedValue>,
    /// Final code (or last attempted code on failure)
    pub code: Option<String>,
    /// Sources the code was allowed to read
    pub source_ids: Vec<String>,
    /// Refinement retries spent
    pub retries_used: u32,
    pub trace_id: String,
}

impl AppResult {
    /// Successful turn; the message is the summary if one was produced
    pub fn success(
        user_prompt: impl Into<String>,
        code: String,
        value: ComputedValue,
        summary: Option<String>,
        source_ids: Vec<String>,
        retries_used: u32,
        trace_id: impl Into<String>,
    ) -> Self {
        TURN_OUTCOMES.with_label_values(&["success"]).inc();
        Self {
            user_prompt: user_prompt.into(),
            success: true,
            message: summary.unwrap_or_default(),
            computed_value: Some(value),
            code: Some(code),
            source_ids,
            retries_used,
            trace_id: trace_id.into(),
        }
    }

    /// Terminal failure after the retry budget ran out
    pub fn exhausted(
        user_prompt: impl Into<String>,
        code: String,
        last_error: &str,
        source_ids: Vec<String>,
        retries_used: u32,
        trace_id: impl Into<String>,
    ) -> Self {
        TURN_OUTCOMES.with_label_values(&["exhausted"]).inc();
        Self {
            user_prompt: user_prompt.into(),
            success: false,
            message: format!("{}{}", EXECUTION_FAILED_PREFIX, last_error),
            computed_value: None,
            code: Some(code),
            source_ids,
            retries_used,
            trace_id: trace_id.into(),
        }
    }

    /// Short circuit when the relevance filter kept nothing
    pub fn no_relevant_source(user_prompt: impl Into<String>, trace_id: impl Into<String>) -> Self {
        TURN_OUTCOMES.with_label_values(&["no_relevant_source"]).inc();
        Self {
            user_prompt: user_prompt.into(),
            success: false,
            message: NO_RELEVANT_SOURCE_MESSAGE.to_string(),
            computed_value: None,
            code: None,
            source_ids: Vec::new(),
            retries_used: 0,
            trace_id: trace_id.into(),
        }
    }

    /// Assemble the result of a finished feedback loop
    pub fn from_outcome(
        user_prompt: impl Into<String>,
        outcome: LoopOutcome,
        source_ids: Vec<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        match outcome {
            LoopOutcome::Done {
                code,
                value,
                summary,
                retries_used,
                ..
            } => Self::success(user_prompt, code, value, summary, source_ids, retries_used, trace_id),
            LoopOutcome::Exhausted {
                code,
                last_error,
                retries_used,
                ..
            } => Self::exhausted(user_prompt, code, &last_error, source_ids, retries_used, trace_id),
        }
    }

    /// Text shown for the computed value, if any
    pub fn value_text(&self) -> Option<String> {
        self.computed_value.as_ref().map(ComputedValue::stringify)
    }
}
