//! Completion backend: OpenAI-compatible `/chat/completions` over reqwest, plus validation of
//! the returned completion text.

use std::num::NonZeroU32;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::prompt::CompositePrompt;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_DETAIL_CHARS: usize = 512;

/// Request body: model, composed messages and a positive output token budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: CompositePrompt,
    pub max_tokens: NonZeroU32,
}

impl CompletionRequest {
    /// `None` when `max_tokens` is zero.
    pub fn new(model: impl Into<String>, prompt: CompositePrompt, max_tokens: u32) -> Option<Self> {
        Some(Self {
            model: model.into(),
            messages: prompt,
            max_tokens: NonZeroU32::new(max_tokens)?,
        })
    }
}

/// Sends one completion request and returns the first choice's text. No retries.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct ChatCompletionsClient {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            client: reqwest::Client::new(),
        }
    }
}

fn truncate(detail: &str) -> String {
    detail.chars().take(MAX_DETAIL_CHARS).collect()
}

#[async_trait]
impl CompletionBackend for ChatCompletionsClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        tracing::info!(
            model = %request.model,
            max_tokens = request.max_tokens.get(),
            "[PANTRY SYSTEM] completion requested"
        );

        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::dependency("completion backend", e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| GatewayError::dependency("completion backend", e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::dependency(
                "completion backend",
                format!("{}: {}", status.as_u16(), truncate(&text)),
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            GatewayError::dependency("completion backend", format!("envelope: {}", e))
        })?;

        parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .ok_or_else(|| GatewayError::dependency("completion backend", "no completion choice"))
    }
}

/// Parses completion text as JSON. Any JSON value passes; no schema is enforced.
pub fn validate_completion(raw: &str) -> Result<serde_json::Value, GatewayError> {
    serde_json::from_str(raw).map_err(|e| GatewayError::UpstreamFormat(e.to_string()))
}
