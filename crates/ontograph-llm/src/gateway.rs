//! The structured-output gateway.
//!
//! One operation: [`LlmGateway::generate_object`] - prompt in, validated
//! value out. The gateway owns everything between the caller and the
//! transport: rate-limit acquisition, the per-attempt timeout, schema
//! validation with a feedback conversation on failure, and jittered
//! exponential backoff on transport failure. `max_attempts` bounds both
//! failure modes combined. It adds no stochasticity of its own; at
//! temperature 0 a run is as deterministic as the provider allows.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::{ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, TokenUsage};
use crate::limiter::{RateLimiter, RateLimits};
use crate::schema::{format_violations, Decoded, Schema, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RetryOptions {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    8
}

fn default_initial_delay_ms() -> u64 {
    3_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub timeout: Duration,
    pub retry: RetryOptions,
    pub limits: RateLimits,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(60_000),
            retry: RetryOptions::default(),
            limits: RateLimits::default(),
            max_tokens: Some(4_096),
            temperature: 0.1,
        }
    }
}

/// The caller's side of one structured call.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: Option<String>,
    pub user: String,
}

impl Prompt {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            system: None,
            user: text.into(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A validated result plus the tokens every attempt consumed.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub value: Value,
    /// Per-row failures tolerated by salvage decoding.
    pub dropped: Vec<Violation>,
    pub usage: TokenUsage,
    pub attempts: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("timed out after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("model output failed validation after {attempts} attempts: {message}")]
    InvalidResponse { attempts: u32, message: String },
    #[error("transport failed after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    limiter: RateLimiter,
    options: GatewayOptions,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn LlmClient>, options: GatewayOptions) -> Self {
        Self {
            client,
            limiter: RateLimiter::new(options.limits),
            options,
        }
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Generates a value conforming to `schema`, using the default
    /// per-attempt timeout.
    pub async fn generate_object(
        &self,
        prompt: &Prompt,
        schema: &Schema,
        object_name: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerateOutcome, GatewayError> {
        self.generate_object_timed(prompt, schema, object_name, self.options.timeout, cancel)
            .await
    }

    /// Like [`generate_object`](Self::generate_object) with an explicit
    /// per-attempt timeout (grounding calls run with a longer one).
    pub async fn generate_object_timed(
        &self,
        prompt: &Prompt,
        schema: &Schema,
        object_name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<GenerateOutcome, GatewayError> {
        let json_schema = schema.to_json_value();
        let mut messages = vec![ChatMessage::user(prompt.user.clone())];
        let mut usage = TokenUsage::default();
        let mut delay_ms = self.options.retry.initial_delay_ms;
        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }
            attempts += 1;

            self.limiter
                .acquire(cancel)
                .await
                .map_err(|_| GatewayError::Cancelled)?;

            let request = ChatRequest {
                system: prompt.system.clone(),
                messages: messages.clone(),
                max_tokens: self.options.max_tokens,
                temperature: Some(self.options.temperature),
                json_schema: Some(json_schema.clone()),
                object_name: Some(object_name.to_string()),
            };

            let attempt = tokio::select! {
                () = cancel.cancelled() => return Err(GatewayError::Cancelled),
                r = tokio::time::timeout(timeout, self.client.complete(&request)) => r,
            };

            match attempt {
                Err(_) => {
                    tracing::warn!(object = object_name, attempts, "LLM attempt timed out");
                    if attempts >= max_attempts {
                        return Err(GatewayError::Timeout { attempts });
                    }
                    self.backoff(&mut delay_ms, None, cancel).await?;
                }
                Ok(Err(LlmError::RateLimited { retry_after_ms })) => {
                    tracing::warn!(object = object_name, attempts, "provider rate limit hit");
                    if attempts >= max_attempts {
                        return Err(GatewayError::RateLimited { attempts });
                    }
                    self.backoff(&mut delay_ms, retry_after_ms, cancel).await?;
                }
                Ok(Err(error)) => {
                    tracing::warn!(object = object_name, attempts, %error, "transport failure");
                    if attempts >= max_attempts {
                        return Err(GatewayError::Transport {
                            attempts,
                            message: truncate(&error.to_string()),
                        });
                    }
                    self.backoff(&mut delay_ms, None, cancel).await?;
                }
                Ok(Ok(response)) => {
                    usage.add(response.usage);
                    match self.validate(&response, schema) {
                        Ok(decoded) => {
                            return Ok(GenerateOutcome {
                                value: decoded.value,
                                dropped: decoded.dropped,
                                usage,
                                attempts,
                            });
                        }
                        Err(report) => {
                            tracing::warn!(
                                object = object_name,
                                attempts,
                                "schema validation failed; resubmitting with feedback"
                            );
                            if attempts >= max_attempts {
                                return Err(GatewayError::InvalidResponse {
                                    attempts,
                                    message: truncate(&report),
                                });
                            }
                            // Rebuild the exchange: the invalid output as an
                            // assistant turn, then the validator's report.
                            messages.push(ChatMessage::assistant(response.content.clone()));
                            messages.push(ChatMessage::user(feedback_message(
                                &report,
                                object_name,
                            )));
                        }
                    }
                }
            }
        }
    }

    fn validate(&self, response: &ChatResponse, schema: &Schema) -> Result<Decoded, String> {
        let raw = parse_json_content(&response.content)
            .map_err(|e| format!("output was not valid JSON: {e}"))?;
        schema
            .decode(&raw)
            .map_err(|violations| format_violations(&violations))
    }

    async fn backoff(
        &self,
        delay_ms: &mut u64,
        retry_after_ms: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        let base = (*delay_ms).min(self.options.retry.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
        let wait = retry_after_ms.unwrap_or(0).max(base.saturating_sub(base / 8) + jitter);
        *delay_ms = (*delay_ms).saturating_mul(2).min(self.options.retry.max_delay_ms);

        tokio::select! {
            () = cancel.cancelled() => Err(GatewayError::Cancelled),
            () = tokio::time::sleep(Duration::from_millis(wait)) => Ok(()),
        }
    }
}

fn feedback_message(report: &str, object_name: &str) -> String {
    format!(
        "Your previous output was invalid.\n\nValidation errors:\n{report}\n\
         Critical rules:\n\
         - Copy IRIs character-for-character from the allowed lists; never \
         re-case or re-derive them from labels.\n\
         - Output only the JSON {object_name}, no commentary.\n\
         - Every required field must be present with the exact field name.\n\n\
         Produce the corrected {object_name} now."
    )
}

/// Parses the model's content as JSON, tolerating code fences and leading
/// prose around the first JSON value.
fn parse_json_content(content: &str) -> Result<Value, serde_json::Error> {
    let trimmed = content.trim();
    let unfenced = strip_code_fence(trimmed);
    match serde_json::from_str(unfenced) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            if let Some(slice) = extract_json_slice(unfenced) {
                serde_json::from_str(slice)
            } else {
                Err(first_error)
            }
        }
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\r', '\n']);
    rest.strip_suffix("```").map_or(rest, str::trim_end)
}

fn extract_json_slice(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let end = s.rfind(['}', ']'])?;
    (end > start).then(|| &s[start..=end])
}

fn truncate(message: &str) -> String {
    const LIMIT: usize = 600;
    if message.len() <= LIMIT {
        message.to_string()
    } else {
        let cut = message
            .char_indices()
            .take_while(|(i, _)| *i < LIMIT)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}…", &message[..cut])
    }
}
