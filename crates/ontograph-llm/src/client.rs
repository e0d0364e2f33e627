//! Provider-agnostic chat interface.
//!
//! Implementations translate [`ChatRequest`] into vendor-specific HTTP
//! calls; everything above this trait is transport-blind.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// JSON-Schema rendering of the expected output; providers that support
    /// structured output pass it through, others rely on the prompt text.
    pub json_schema: Option<serde_json::Value>,
    /// Name of the object being generated, for providers that want one.
    pub object_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub supports_json_mode: bool,
}

/// Trait for LLM API providers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Executes one chat completion.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    fn model_info(&self) -> ModelInfo;
}
