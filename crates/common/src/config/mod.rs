//! Configuration management for DeepForge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Reasoning loop knobs
    #[serde(default)]
    pub research: ResearchConfig,

    /// Delimiter literals of the reasoning protocol
    #[serde(default)]
    pub tags: TagConfig,

    /// Generator (chat model) configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Knowledge-base retriever configuration
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,

    /// Web search configuration
    #[serde(default)]
    pub web: WebSearchConfig,

    /// Knowledge-graph retriever configuration
    #[serde(default)]
    pub knowledge_graph: KnowledgeGraphConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Cross-session cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResearchConfig {
    /// Hard cap on reasoning steps per session
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Protocol limit; reaching `max_search_limit - 1` ends the session
    #[serde(default = "default_max_search_limit")]
    pub max_search_limit: usize,

    /// Queries kept per step after validation
    #[serde(default = "default_max_queries_per_step")]
    pub max_queries_per_step: usize,

    /// Jaccard similarity above which a query is redundant
    #[serde(default = "default_redundancy_threshold")]
    pub redundancy_threshold: f64,

    /// Minimum canonical query length in characters
    #[serde(default = "default_min_query_len")]
    pub min_query_len: usize,

    /// Soft token cap on one reasoning continuation
    #[serde(default = "default_reasoning_token_budget")]
    pub reasoning_token_budget: usize,

    /// Soft token budget for the previous-reasoning summary
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,

    /// Token budget for the rendered extraction document
    #[serde(default = "default_document_token_budget")]
    pub document_token_budget: usize,

    /// Chunks kept as sources on each search result
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Attempts made against the knowledge base per query
    #[serde(default = "default_kb_attempts")]
    pub kb_attempts: u32,

    /// Deadline for each back-end call in seconds
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,

    /// Stream extraction output instead of waiting for the full answer
    #[serde(default = "default_enabled")]
    pub stream_extraction: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagConfig {
    #[serde(default = "default_begin_query")]
    pub begin_query: String,
    #[serde(default = "default_end_query")]
    pub end_query: String,
    #[serde(default = "default_begin_result")]
    pub begin_result: String,
    #[serde(default = "default_end_result")]
    pub end_result: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// API key (empty for unauthenticated local servers)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Context window in tokens
    #[serde(default = "default_llm_max_length")]
    pub max_length: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnowledgeBaseConfig {
    /// Retrieval endpoint; the knowledge base is skipped when unset
    pub endpoint: Option<String>,

    /// Chunks requested per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebSearchConfig {
    /// API key; web search is enabled only when present
    pub api_key: Option<String>,

    /// Search endpoint
    #[serde(default = "default_web_endpoint")]
    pub endpoint: String,

    /// Maximum hits per query
    #[serde(default = "default_web_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KnowledgeGraphConfig {
    /// Graph retrieval endpoint; the graph is skipped when unset
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock, or none to score results by token overlap
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Redis URL; an in-process cache is used when unset
    pub redis_url: Option<String>,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Entry TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

// Default value functions
fn default_max_steps() -> usize { 10 }
fn default_max_search_limit() -> usize { 6 }
fn default_max_queries_per_step() -> usize { 3 }
fn default_redundancy_threshold() -> f64 { 0.8 }
fn default_min_query_len() -> usize { 3 }
fn default_reasoning_token_budget() -> usize { 1500 }
fn default_context_token_budget() -> usize { 4000 }
fn default_document_token_budget() -> usize { 4096 }
fn default_max_sources() -> usize { 5 }
fn default_kb_attempts() -> u32 { 2 }
fn default_backend_timeout() -> u64 { 30 }
fn default_enabled() -> bool { true }
fn default_begin_query() -> String { "<|begin_search_query|>".to_string() }
fn default_end_query() -> String { "<|end_search_query|>".to_string() }
fn default_begin_result() -> String { "<|begin_search_result|>".to_string() }
fn default_end_result() -> String { "<|end_search_result|>".to_string() }
fn default_llm_endpoint() -> String { "https://api.openai.com/v1".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_llm_max_length() -> usize { 128_000 }
fn default_temperature() -> f32 { 0.2 }
fn default_llm_timeout() -> u64 { 120 }
fn default_top_k() -> usize { 8 }
fn default_web_endpoint() -> String { "https://api.tavily.com/search".to_string() }
fn default_web_max_results() -> usize { 6 }
fn default_embedding_provider() -> String { "none".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_key_prefix() -> String { "deepforge".to_string() }
fn default_cache_ttl() -> u64 { 86_400 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_search_limit: default_max_search_limit(),
            max_queries_per_step: default_max_queries_per_step(),
            redundancy_threshold: default_redundancy_threshold(),
            min_query_len: default_min_query_len(),
            reasoning_token_budget: default_reasoning_token_budget(),
            context_token_budget: default_context_token_budget(),
            document_token_budget: default_document_token_budget(),
            max_sources: default_max_sources(),
            kb_attempts: default_kb_attempts(),
            backend_timeout_secs: default_backend_timeout(),
            stream_extraction: default_enabled(),
        }
    }
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            begin_query: default_begin_query(),
            end_query: default_end_query(),
            begin_result: default_begin_result(),
            end_result: default_end_result(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            max_length: default_llm_max_length(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            top_k: default_top_k(),
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_web_endpoint(),
            max_results: default_web_max_results(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

impl ResearchConfig {
    /// Get the per-call back-end deadline as Duration
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__RESEARCH__MAX_STEPS=4
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let tags = &self.tags;
        for (field, literal) in [
            ("tags.begin_query", &tags.begin_query),
            ("tags.end_query", &tags.end_query),
            ("tags.begin_result", &tags.begin_result),
            ("tags.end_result", &tags.end_result),
        ] {
            if literal.trim().is_empty() {
                return Err(invalid(field, "tag literal must not be empty"));
            }
        }
        if tags.begin_query == tags.end_query || tags.begin_result == tags.end_result {
            return Err(invalid("tags", "begin and end literals must differ"));
        }

        let research = &self.research;
        if research.max_queries_per_step == 0 {
            return Err(invalid("research.max_queries_per_step", "must be at least 1"));
        }
        if research.max_search_limit == 0 {
            return Err(invalid("research.max_search_limit", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&research.redundancy_threshold) {
            return Err(invalid("research.redundancy_threshold", "must lie in [0, 1]"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> AppError {
    AppError::Validation {
        message: format!("{}: {}", field, message),
        field: Some(field.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.research.max_steps, 10);
        assert_eq!(config.research.max_queries_per_step, 3);
        assert_eq!(config.tags.begin_query, "<|begin_search_query|>");
        assert!(config.web.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_identical_tags_rejected() {
        let mut config = AppConfig::default();
        config.tags.end_query = config.tags.begin_query.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_range() {
        let mut config = AppConfig::default();
        config.research.redundancy_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redundancy_threshold"));
    }

    #[test]
    fn test_sections_fill_from_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"research": {"max_steps": 4}}"#).unwrap();
        assert_eq!(config.research.max_steps, 4);
        assert_eq!(config.research.max_search_limit, 6);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }
}
