//! Chat sessions
//!
//! A session keeps the ordered history of turns for one user. Prompts
//! starting with `@prev ` build on the previous turn's code and sources.

use serde::Serialize;
use tracing::warn;

use super::response::AppResult;
use super::workflow::{Analyst, AnalystError, Continuation};

/// Prefix that continues from the previous turn
pub const PREV_PREFIX: &str = "@prev ";

/// One question and its answer
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub prompt: String,
    pub result: AppResult,
}

/// In-memory conversation history
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// Unique session ID
    pub id: String,
    pub turns: Vec<Turn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            turns: Vec::new(),
        }
    }

    pub fn last_result(&self) -> Option<&AppResult> {
        self.turns.last().map(|turn| &turn.result)
    }

    /// Split a prompt into the query and whether it continues the last turn
    pub fn parse_prompt(prompt: &str) -> (&str, bool) {
        let trimmed = prompt.trim();
        match trimmed.strip_prefix(PREV_PREFIX) {
            Some(rest) => (rest.trim(), true),
            None => (trimmed, false),
        }
    }

    /// Ask a question and record the turn
    ///
    /// An `@prev ` prompt with no previous code is answered as a fresh
    /// question.
    pub async fn ask(&mut self, analyst: &Analyst, prompt: &str) -> Result<&AppResult, AnalystError> {
        let (query, wants_previous) = Self::parse_prompt(prompt);

        let continuation = if wants_previous {
            let previous = self.last_result().and_then(Continuation::from_result);
            if previous.is_none() {
                warn!(session_id = %self.id, "No previous code to continue from");
            }
            previous
        } else {
            None
        };

        let result = analyst.answer(query, continuation.as_ref()).await?;
        self.turns.push(Turn {
            prompt: prompt.to_string(),
            result,
        });
        Ok(&self.turns[self.turns.len() - 1].result)
    }

    /// Short listing of the session
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            last_prompt: self
                .turns
                .last()
                .map(|t| truncate(&t.prompt, 50))
                .unwrap_or_default(),
            turns: self.turns.len(),
            answered: self.turns.iter().filter(|t| t.result.success).count(),
        }
    }
}

/// Summary of a session for listing
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub last_prompt: String,
    pub turns: usize,
    pub answered: usize,
}

/// Truncate a string to max characters, adding ellipsis if needed
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
