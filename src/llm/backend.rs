//! LLM backend contract
//!
//! A backend turns one rendered prompt into one completion. It is called
//! from many executor workers at once, so implementations must be
//! `Send + Sync` and cheap to share behind an `Arc`.

use async_trait::async_trait;

/// Fully rendered prompt, ready to send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl RenderedPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Error type for backend invocations
///
/// The executor never interprets these; they propagate to the batch runner.
#[derive(Debug)]
pub enum BackendError {
    Request(reqwest::Error),
    Parse(serde_json::Error),
    /// Backend answered with a non-success status
    Status { code: u16, body: String },
    EmptyResponse,
    /// Anything else, e.g. from test doubles
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Request(e) => write!(f, "Request error: {}", e),
            BackendError::Parse(e) => write!(f, "Parse error: {}", e),
            BackendError::Status { code, body } => write!(f, "Backend returned {}: {}", code, body),
            BackendError::EmptyResponse => write!(f, "Empty response from backend"),
            BackendError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        BackendError::Request(e)
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Parse(e)
    }
}

/// A single, non-streaming text completion call
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short identifier used in logs and metrics (e.g. "ollama:qwen3")
    fn name(&self) -> String;

    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<String, BackendError>;
}
