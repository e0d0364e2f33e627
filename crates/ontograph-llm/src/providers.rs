//! Concrete LLM providers.
//!
//! OpenAI-style chat completions, the Anthropic messages API, and any
//! OpenAI-compatible local server (Ollama, vLLM). All of them speak JSON
//! through `reqwest`; per-attempt timeouts are enforced by the gateway,
//! not here. [`ScriptedClient`] is the deterministic in-process provider
//! used by tests and offline runs.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::client::{
    ChatRequest, ChatResponse, LlmClient, LlmError, ModelInfo, Role, TokenUsage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAi,
    Anthropic,
    /// Any OpenAI-compatible endpoint (Ollama, vLLM, llama.cpp server).
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    /// Resolves a provider from environment variables, trying OpenAI,
    /// then Anthropic, then a local endpoint.
    pub fn from_env() -> Result<Self, LlmError> {
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAi,
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                api_key: Some(api_key),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
            });
        }
        if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            return Ok(Self {
                provider: Provider::Anthropic,
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
                api_key: Some(api_key),
                base_url: None,
            });
        }
        if let Ok(base_url) = std::env::var("LOCAL_LLM_URL") {
            return Ok(Self {
                provider: Provider::Local,
                model: std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "llama3.1".to_string()),
                api_key: None,
                base_url: Some(base_url),
            });
        }
        Err(LlmError::Api(
            "no provider configured; set OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL"
                .to_string(),
        ))
    }
}

/// Builds the provider named by the settings.
pub fn build_client(settings: &ProviderSettings) -> Result<Arc<dyn LlmClient>, LlmError> {
    let http = Client::builder()
        .build()
        .map_err(|e| LlmError::Network(e.to_string()))?;
    let client: Arc<dyn LlmClient> = match settings.provider {
        Provider::OpenAi => Arc::new(OpenAiClient {
            http,
            settings: settings.clone(),
        }),
        Provider::Anthropic => Arc::new(AnthropicClient {
            http,
            settings: settings.clone(),
        }),
        Provider::Local => Arc::new(LocalClient {
            http,
            settings: settings.clone(),
        }),
    };
    Ok(client)
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn retry_after_ms(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(|secs| secs * 1_000)
}

// ============================================================================
// OpenAI
// ============================================================================

pub struct OpenAiClient {
    http: Client,
    settings: ProviderSettings,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!(
            "{}/chat/completions",
            self.settings
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
        );

        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &request.messages {
            messages.push(serde_json::json!({"role": role_str(m.role), "content": m.content}));
        }

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if request.json_schema.is_some() {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.settings.api_key.as_deref().unwrap_or("")),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after_ms = retry_after_ms(&response);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            },
            model: self.settings.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.settings.model.clone(),
            supports_json_mode: true,
        }
    }
}

// ============================================================================
// Anthropic
// ============================================================================

pub struct AnthropicClient {
    http: Client,
    settings: ProviderSettings,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = format!(
            "{}/v1/messages",
            self.settings
                .base_url
                .as_deref()
                .unwrap_or("https://api.anthropic.com")
        );

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": role_str(m.role), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(4_096),
        });
        if let Some(system) = &request.system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let response = self
            .http
            .post(&url)
            .header("x-api-key", self.settings.api_key.as_deref().unwrap_or(""))
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after_ms = retry_after_ms(&response);
            return Err(LlmError::RateLimited { retry_after_ms });
        }
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let content = data["content"][0]["text"].as_str().unwrap_or("").to_string();

        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0),
                completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0),
            },
            model: self.settings.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.settings.model.clone(),
            supports_json_mode: false,
        }
    }
}

// ============================================================================
// Local / OpenAI-compatible
// ============================================================================

pub struct LocalClient {
    http: Client,
    settings: ProviderSettings,
}

#[async_trait]
impl LlmClient for LocalClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or("http://localhost:11434");
        let url = format!("{base}/v1/chat/completions");

        let mut messages: Vec<serde_json::Value> = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        for m in &request.messages {
            messages.push(serde_json::json!({"role": role_str(m.role), "content": m.content}));
        }

        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(ChatResponse {
            content,
            usage: TokenUsage::default(),
            model: self.settings.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.settings.model.clone(),
            supports_json_mode: false,
        }
    }
}

// ============================================================================
// Scripted (offline / tests)
// ============================================================================

type Responder = dyn Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync;

/// Deterministic canned-response client.
pub struct ScriptedClient {
    responder: Box<Responder>,
}

impl ScriptedClient {
    /// Responds by calling `f` with each request.
    pub fn new(f: impl Fn(&ChatRequest) -> Result<String, LlmError> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(f),
        }
    }

    /// Responds with the given contents in order; further requests error.
    pub fn from_responses(responses: Vec<String>) -> Self {
        let queue = std::sync::Mutex::new(VecDeque::from(responses));
        Self::new(move |_| {
            queue
                .lock()
                .map_err(|_| LlmError::Api("responder poisoned".to_string()))?
                .pop_front()
                .ok_or_else(|| LlmError::Api("script exhausted".to_string()))
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let content = (self.responder)(request)?;
        let prompt_len: usize = request.messages.iter().map(|m| m.content.len()).sum();
        Ok(ChatResponse {
            usage: TokenUsage {
                prompt_tokens: (prompt_len / 4) as u64,
                completion_tokens: (content.len() / 4) as u64,
            },
            content,
            model: "scripted".to_string(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".to_string(),
            supports_json_mode: true,
        }
    }
}
