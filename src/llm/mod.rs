//! LLM plumbing: backends, prompt templates and the prompt task sum type
//!
//! # Architecture
//!
//! ```text
//! PromptTask ──preprocess()──▶ Bindings ──render()──▶ RenderedPrompt
//!                                                         │
//!                                              LlmBackend::invoke()
//!                                                         │
//! ModelResponse ◀──────────postprocess()────────────── raw text
//! ```

pub mod backend;
pub mod fence;
pub mod ollama;
pub mod openai;
pub mod task;
pub mod templates;

use std::sync::Arc;

pub use backend::{BackendError, LlmBackend, RenderedPrompt};
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use task::{ModelResponse, ParseError, Payload, PromptTask, PromptTaskKind, TaskKind};
pub use templates::{Bindings, PromptTemplate};

use crate::config::{AnalystConfig, Provider};

/// Build the backend selected by the configuration
pub fn backend_from_config(config: &AnalystConfig) -> Arc<dyn LlmBackend> {
    match config.provider {
        Provider::Ollama => Arc::new(OllamaBackend::new(
            config.base_url.clone(),
            config.model.clone(),
            config.generation.clone(),
        )),
        Provider::OpenAi => Arc::new(OpenAiBackend::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.generation.clone(),
        )),
    }
}
