//! Ollama API backend

use async_trait::async_trait;
use futures_util::stream::StreamExt;

use super::backend::{BackendError, LlmBackend, RenderedPrompt};
use crate::config::GenerationOptions;

/// Response from Ollama's generate endpoint with metadata
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// The generated text
    pub response: String,
    /// Number of tokens generated
    pub eval_count: u32,
    /// Number of tokens in the prompt
    pub prompt_eval_count: u32,
    /// Time spent generating tokens (nanoseconds)
    pub eval_duration_ns: u64,
}

/// Client for Ollama's `/api/generate` endpoint
#[derive(Clone)]
pub struct OllamaBackend {
    base_url: String,
    model: String,
    options: GenerationOptions,
    client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `model` - The model name (e.g., "qwen3")
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            options,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    /// Generate a complete response, accumulating the streamed tokens
    ///
    /// The system half goes into Ollama's `system` field so the model's own
    /// chat template is applied.
    pub async fn generate(&self, prompt: &RenderedPrompt) -> Result<GenerateResponse, BackendError> {
        let endpoint = self.endpoint();

        let response = self
            .client
            .post(&endpoint)
            .json(&serde_json::json!({
                "model": self.model,
                "system": prompt.system,
                "prompt": prompt.user,
                "stream": true,
                "options": {
                    "temperature": self.options.temperature,
                    "top_p": self.options.top_p,
                    "num_predict": self.options.max_tokens
                }
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let mut bytes_stream = response.bytes_stream();

        let mut full_response = String::new();
        let mut eval_count = 0u32;
        let mut prompt_eval_count = 0u32;
        let mut eval_duration_ns = 0u64;

        // Chunks are newline-delimited JSON, but a chunk boundary may split a line
        let mut pending = Vec::new();

        while let Some(chunk_result) = bytes_stream.next().await {
            pending.extend_from_slice(&chunk_result?);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                if let Ok(data) = serde_json::from_slice::<serde_json::Value>(&line) {
                    if let Some(token) = data["response"].as_str() {
                        full_response.push_str(token);
                    }

                    if data["done"].as_bool() == Some(true) {
                        eval_count = data["eval_count"].as_u64().unwrap_or(0) as u32;
                        prompt_eval_count = data["prompt_eval_count"].as_u64().unwrap_or(0) as u32;
                        eval_duration_ns = data["eval_duration"].as_u64().unwrap_or(0);
                    }
                }
            }
        }

        if !pending.is_empty() {
            if let Ok(data) = serde_json::from_slice::<serde_json::Value>(&pending) {
                if let Some(token) = data["response"].as_str() {
                    full_response.push_str(token);
                }
            }
        }

        Ok(GenerateResponse {
            response: full_response,
            eval_count,
            prompt_eval_count,
            eval_duration_ns,
        })
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<String, BackendError> {
        let generated = self.generate(prompt).await?;
        tracing::debug!(
            model = %self.model,
            eval_count = generated.eval_count,
            prompt_eval_count = generated.prompt_eval_count,
            eval_duration_ms = generated.eval_duration_ns as f64 / 1_000_000.0,
            "Ollama generation finished"
        );
        if generated.response.is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(generated.response)
    }
}
