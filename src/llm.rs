//! Answer-generation model client.
//!
//! [`ChatModel`] is the seam between the prompt pipeline and whatever
//! service generates text. [`OpenAIChatModel`] speaks the OpenAI
//! `POST {url}/chat/completions` protocol, which OpenAI itself and most
//! local servers (LM Studio, llama.cpp, vLLM, Ollama's `/v1`) expose.
//!
//! Timeouts, network failures, HTTP 429 and 5xx responses are retryable and
//! retried with backoff up to `llm.max_retries`; anything else fails
//! immediately with [`PipelineError::ModelInvocation`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};
use crate::models::{ConversationTurn, Role};

/// Author of a prompt message, in the model service's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        match turn.role {
            Role::Human => Self::user(turn.content.clone()),
            Role::Assistant => Self::assistant(turn.content.clone()),
        }
    }
}

/// One generation request. Unset sampling fields fall back to the model's
/// configured defaults.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Generate the assistant's reply to `request.messages`.
    async fn generate(&self, request: ChatRequest) -> Result<String>;
}

/// OpenAI-compatible chat completions client.
pub struct OpenAIChatModel {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    /// Build the client. The API key is read from `OPENAI_API_KEY`; servers
    /// that need no key work without it.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }

    fn body(&self, request: &ChatRequest) -> Value {
        json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature.unwrap_or(self.temperature),
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "stream": false,
        })
    }

    async fn attempt(&self, url: &str, body: &Value) -> Result<String> {
        let mut builder = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| PipelineError::ModelInvocation {
            message: if e.is_timeout() {
                format!("request timed out: {}", e)
            } else {
                format!("request failed: {}", e)
            },
            retryable: true,
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::ModelInvocation {
                message: format!("chat API error {}: {}", status, text),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::ModelInvocation {
                message: format!("invalid response body: {}", e),
                retryable: e.is_timeout(),
            })?;
        parse_completion(&payload)
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.body(&request);

        let mut attempt = 0;
        loop {
            match self.attempt(&url, &body).await {
                Ok(text) => {
                    debug!(model = %self.model, chars = text.len(), "chat completion");
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(model = %self.model, attempt, error = %e, "chat completion failed, retrying");
                    let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_completion(payload: &Value) -> Result<String> {
    payload["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PipelineError::ModelInvocation {
            message: "response has no choices[0].message.content".to_string(),
            retryable: false,
        })
}
