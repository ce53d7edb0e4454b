//! OpenAI-compatible chat completions backend

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::backend::{BackendError, LlmBackend, RenderedPrompt};
use crate::config::GenerationOptions;

/// A message in a chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant"
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Response from `/chat/completions`
#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint
#[derive(Clone)]
pub struct OpenAiBackend {
    base_url: String,
    api_key: Option<String>,
    model: String,
    options: GenerationOptions,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            options,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, prompt: &RenderedPrompt) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                ChatMessage::system(prompt.system.clone()),
                ChatMessage::user(prompt.user.clone()),
            ],
            "temperature": self.options.temperature,
            "top_p": self.options.top_p,
            "max_tokens": self.options.max_tokens,
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> String {
        format!("openai:{}", self.model)
    }

    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<String, BackendError> {
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut request = self.client.post(&endpoint).json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(BackendError::Status {
                code: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Err(BackendError::EmptyResponse);
        }

        let completion: ChatCompletion = serde_json::from_str(&text)?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(BackendError::EmptyResponse)
    }
}
