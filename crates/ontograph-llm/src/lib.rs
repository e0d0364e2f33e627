//! LLM access layer: structured-output calls with validation and retry.
//!
//! The extraction pipeline never talks to a provider directly. It builds a
//! [`Schema`](schema::Schema) describing the value it wants, a prompt, and
//! hands both to the [`LlmGateway`](gateway::LlmGateway), which:
//!
//! - waits on a dual token bucket (per-second burst, per-minute sustained),
//! - enforces a per-attempt timeout,
//! - parses and validates the model's JSON against the schema,
//! - on validation failure, resubmits as a short conversation carrying the
//!   validator's error report,
//! - on transport failure, retries with jittered exponential backoff.
//!
//! Concrete providers (OpenAI, Anthropic, Ollama-compatible) live behind
//! the [`LlmClient`](client::LlmClient) trait; a deterministic
//! [`ScriptedClient`](providers::ScriptedClient) serves tests and offline
//! runs.

pub mod client;
pub mod gateway;
pub mod limiter;
pub mod providers;
pub mod schema;

pub use client::{ChatMessage, ChatRequest, ChatResponse, LlmClient, LlmError, Role, TokenUsage};
pub use gateway::{GatewayError, GatewayOptions, GenerateOutcome, LlmGateway, Prompt, RetryOptions};
pub use limiter::{RateLimiter, RateLimits};
pub use providers::{build_client, Provider, ProviderSettings, ScriptedClient};
pub use schema::{CanonicalSet, Decoded, Schema, Violation};
