//! Pipeline configuration.
//!
//! One serde record covers the whole run; every field has a default so a
//! config file only states what it overrides. Validation happens once at
//! pipeline construction.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ontograph_extract::{ChunkingOptions, GroundingOptions, RetrievalOptions};
use ontograph_graph::resolve::ResolverOptions;
use ontograph_graph::RdfOptions;
use ontograph_index::Bm25Params;
use ontograph_llm::gateway::{GatewayOptions, RetryOptions};
use ontograph_llm::limiter::RateLimits;
use ontograph_llm::providers::{Provider, ProviderSettings};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_provider")]
    pub provider: Provider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub rate_limits: RateLimits,
}

fn default_provider() -> Provider {
    Provider::Local
}

fn default_model() -> String {
    "llama3.1".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_tokens() -> u32 {
    4_096
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            timeout_ms: default_timeout_ms(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            rate_limits: RateLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_extraction_concurrency")]
    pub extraction_concurrency: usize,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_extraction_concurrency() -> usize {
    2
}

fn default_retry_max_attempts() -> u32 {
    8
}

fn default_retry_initial_delay_ms() -> u64 {
    3_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            extraction_concurrency: default_extraction_concurrency(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologySettings {
    #[serde(default)]
    pub path: PathBuf,
    /// Reserved for long-running hosts that reload the ontology.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

fn default_cache_ttl_seconds() -> u64 {
    3_600
}

impl Default for OntologySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub runtime: RuntimeSettings,
    #[serde(default)]
    pub rdf: RdfOptions,
    #[serde(default)]
    pub ontology: OntologySettings,
    #[serde(default)]
    pub chunking: ChunkingOptions,
    #[serde(default)]
    pub retrieval: RetrievalOptions,
    #[serde(default)]
    pub grounding: GroundingOptions,
    #[serde(default)]
    pub resolver: ResolverOptions,
    #[serde(default)]
    pub bm25: Bm25Params,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_json_file(path: &std::path::Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config {}: {e}", path.display()))?;
        Self::from_json_str(&text).map_err(|e| format!("failed to parse config: {e}"))
    }

    /// Structural checks that cannot be expressed through serde defaults.
    pub fn validate(&self) -> Result<(), String> {
        if self.runtime.extraction_concurrency == 0 {
            return Err("runtime.extraction_concurrency must be at least 1".to_string());
        }
        if self.runtime.retry_max_attempts == 0 {
            return Err("runtime.retry_max_attempts must be at least 1".to_string());
        }
        if self.chunking.max_chars == 0 {
            return Err("chunking.max_chars must be at least 1".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err("llm.temperature must be within [0, 2]".to_string());
        }
        if !(0.0..=1.0).contains(&self.grounding.confidence_threshold) {
            return Err("grounding.confidence_threshold must be within [0, 1]".to_string());
        }
        if self.llm.model.trim().is_empty() {
            return Err("llm.model must not be empty".to_string());
        }
        Ok(())
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            provider: self.llm.provider,
            model: self.llm.model.clone(),
            api_key: self.llm.api_key.clone(),
            base_url: self.llm.base_url.clone(),
        }
    }

    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            timeout: Duration::from_millis(self.llm.timeout_ms),
            retry: RetryOptions {
                max_attempts: self.runtime.retry_max_attempts,
                initial_delay_ms: self.runtime.retry_initial_delay_ms,
                max_delay_ms: self.runtime.retry_max_delay_ms,
            },
            limits: self.llm.rate_limits,
            max_tokens: Some(self.llm.max_tokens),
            temperature: self.llm.temperature,
        }
    }
}
