//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use sodam_core::DomainTag;

use crate::constants::{endpoints, engine, evaluation, rate, retrieval, router};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub domains: DomainsConfig,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub vector_store: VectorStoreSettings,

    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Retrieval and gate tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates fetched per ranker before fusion.
    #[serde(default = "default_k_fetch")]
    pub k_fetch: usize,
    /// Fused chunks kept per (query, domain) pair.
    #[serde(default = "default_k_retrieve")]
    pub k_retrieve: usize,
    /// Chunks assembled into the Generator context.
    #[serde(default = "default_k_context")]
    pub k_context: usize,
    /// RRF constant.
    #[serde(default = "default_k_rrf")]
    pub k_rrf: f32,
    #[serde(default = "default_min_docs")]
    pub min_docs: usize,
    #[serde(default = "default_min_avg_sim")]
    pub min_avg_sim: f32,
    #[serde(default = "default_min_keyword_ratio")]
    pub min_keyword_ratio: f32,
}

fn default_k_fetch() -> usize {
    retrieval::K_FETCH
}
fn default_k_retrieve() -> usize {
    retrieval::K_RETRIEVE
}
fn default_k_context() -> usize {
    retrieval::K_CONTEXT
}
fn default_k_rrf() -> f32 {
    retrieval::K_RRF
}
fn default_min_docs() -> usize {
    retrieval::MIN_DOCS
}
fn default_min_avg_sim() -> f32 {
    retrieval::MIN_AVG_SIM
}
fn default_min_keyword_ratio() -> f32 {
    retrieval::MIN_KEYWORD_RATIO
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_fetch: retrieval::K_FETCH,
            k_retrieve: retrieval::K_RETRIEVE,
            k_context: retrieval::K_CONTEXT,
            k_rrf: retrieval::K_RRF,
            min_docs: retrieval::MIN_DOCS,
            min_avg_sim: retrieval::MIN_AVG_SIM,
            min_keyword_ratio: retrieval::MIN_KEYWORD_RATIO,
        }
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock deadline across the whole state graph (seconds).
    #[serde(default = "default_deadline_s")]
    pub request_deadline_s: u64,
    /// Retry budget per query, shared between the gate rewrite and the
    /// evaluator regeneration.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_deadline_s() -> u64 {
    engine::REQUEST_DEADLINE_S
}
fn default_max_retries() -> u32 {
    engine::MAX_RETRIES
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_deadline_s: engine::REQUEST_DEADLINE_S,
            max_retries: engine::MAX_RETRIES,
        }
    }
}

/// Evaluator pass thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_faithfulness")]
    pub faithfulness_threshold: f32,
    #[serde(default = "default_relevancy")]
    pub relevancy_threshold: f32,
    #[serde(default = "default_llm_score")]
    pub llm_score_threshold: u8,
}

fn default_faithfulness() -> f32 {
    evaluation::FAITHFULNESS_THRESHOLD
}
fn default_relevancy() -> f32 {
    evaluation::RELEVANCY_THRESHOLD
}
fn default_llm_score() -> u8 {
    evaluation::LLM_SCORE_THRESHOLD
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            faithfulness_threshold: evaluation::FAITHFULNESS_THRESHOLD,
            relevancy_threshold: evaluation::RELEVANCY_THRESHOLD,
            llm_score_threshold: evaluation::LLM_SCORE_THRESHOLD,
        }
    }
}

/// Router pre-filter tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_router_min_score")]
    pub min_score: f32,
    #[serde(default = "default_router_margin")]
    pub margin_threshold: f32,
}

fn default_router_min_score() -> f32 {
    router::MIN_SCORE
}
fn default_router_margin() -> f32 {
    router::MARGIN_THRESHOLD
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_score: router::MIN_SCORE,
            margin_threshold: router::MARGIN_THRESHOLD,
        }
    }
}

/// Domain ordering and collection binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainsConfig {
    /// Priority order, most specific first. Lives in configuration so a
    /// change is a visible diff; tests pin the current ordering.
    #[serde(default = "default_domain_priority")]
    pub priority: Vec<DomainTag>,
    /// Collection name per domain.
    #[serde(default = "default_collections")]
    pub collections: HashMap<DomainTag, String>,
}

fn default_domain_priority() -> Vec<DomainTag> {
    DomainTag::PRIORITY.to_vec()
}

fn default_collections() -> HashMap<DomainTag, String> {
    DomainTag::PRIORITY
        .iter()
        .map(|t| (*t, format!("sodam_{}", t.as_str())))
        .collect()
}

impl DomainsConfig {
    pub fn collection(&self, tag: DomainTag) -> &str {
        self.collections
            .get(&tag)
            .map(|s| s.as_str())
            .unwrap_or(tag.as_str())
    }
}

impl Default for DomainsConfig {
    fn default() -> Self {
        Self {
            priority: default_domain_priority(),
            collections: default_collections(),
        }
    }
}

/// LLM service configuration (generation + judge share the endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Judge model; may equal `model`.
    #[serde(default = "default_judge_model")]
    pub judge_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_llm_timeout_s")]
    pub timeout_s: u64,
    /// From env LLM_API_KEY; required outside development.
    #[serde(default = "default_llm_api_key")]
    pub api_key: String,
}

fn default_llm_endpoint() -> String {
    endpoints::LLM_DEFAULT.clone()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_judge_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> usize {
    1536
}
fn default_llm_timeout_s() -> u64 {
    60
}
fn default_llm_api_key() -> String {
    std::env::var("LLM_API_KEY").unwrap_or_default()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            judge_model: default_judge_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_s: default_llm_timeout_s(),
            api_key: default_llm_api_key(),
        }
    }
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dim")]
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout_s")]
    pub timeout_s: u64,
    /// From env EMBEDDING_API_KEY; required outside development.
    #[serde(default = "default_embedding_api_key")]
    pub api_key: String,
}

fn default_embedding_endpoint() -> String {
    endpoints::EMBEDDING_DEFAULT.clone()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_embedding_dim() -> usize {
    1536
}
fn default_embedding_timeout_s() -> u64 {
    30
}
fn default_embedding_api_key() -> String {
    std::env::var("EMBEDDING_API_KEY").unwrap_or_default()
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model: default_embedding_model(),
            dimension: default_embedding_dim(),
            timeout_s: default_embedding_timeout_s(),
            api_key: default_embedding_api_key(),
        }
    }
}

/// Vector store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreSettings {
    /// From env QDRANT_URL; required outside development.
    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_qdrant_api_key")]
    pub api_key: Option<String>,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.clone()
}
fn default_qdrant_api_key() -> Option<String> {
    std::env::var("QDRANT_API_KEY").ok()
}

impl Default for VectorStoreSettings {
    fn default() -> Self {
        Self {
            endpoint: default_qdrant_endpoint(),
            api_key: default_qdrant_api_key(),
        }
    }
}

/// Token-bucket budgets per external service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_embedding_capacity")]
    pub embedding_capacity: u32,
    #[serde(default = "default_generation_capacity")]
    pub generation_capacity: u32,
    #[serde(default = "default_judge_capacity")]
    pub judge_capacity: u32,
    /// One token refills per this interval (milliseconds).
    #[serde(default = "default_refill_ms")]
    pub refill_ms: u64,
    /// Waiting longer than this on an empty bucket is QuotaExhausted.
    #[serde(default = "default_max_wait_s")]
    pub max_wait_s: u64,
}

fn default_embedding_capacity() -> u32 {
    rate::EMBEDDING_CAPACITY
}
fn default_generation_capacity() -> u32 {
    rate::GENERATION_CAPACITY
}
fn default_judge_capacity() -> u32 {
    rate::JUDGE_CAPACITY
}
fn default_refill_ms() -> u64 {
    rate::REFILL_MS
}
fn default_max_wait_s() -> u64 {
    rate::MAX_WAIT_S
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: rate::EMBEDDING_CAPACITY,
            generation_capacity: rate::GENERATION_CAPACITY,
            judge_capacity: rate::JUDGE_CAPACITY,
            refill_ms: rate::REFILL_MS,
            max_wait_s: rate::MAX_WAIT_S,
        }
    }
}

/// Conversational memory bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Last N (query, answer) pairs kept per conversation.
    #[serde(default = "default_memory_turns")]
    pub memory_turns: usize,
    /// Idle conversations are dropped after this many seconds.
    #[serde(default = "default_session_ttl_s")]
    pub ttl_s: u64,
}

fn default_memory_turns() -> usize {
    5
}
fn default_session_ttl_s() -> u64 {
    1_800
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            memory_turns: default_memory_turns(),
            ttl_s: default_session_ttl_s(),
        }
    }
}

impl Settings {
    /// Validate ranges and, in strict profiles, required secrets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.k_rrf <= 0.0 {
            return Err(ConfigError::Invalid("retrieval.k_rrf must be positive".into()));
        }
        for (name, v) in [
            ("retrieval.min_avg_sim", self.retrieval.min_avg_sim),
            ("retrieval.min_keyword_ratio", self.retrieval.min_keyword_ratio),
            ("evaluation.faithfulness_threshold", self.evaluation.faithfulness_threshold),
            ("evaluation.relevancy_threshold", self.evaluation.relevancy_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1]")));
            }
        }
        if self.retrieval.k_context > self.retrieval.k_retrieve {
            return Err(ConfigError::Invalid(
                "retrieval.k_context cannot exceed retrieval.k_retrieve".into(),
            ));
        }
        if self.domains.priority.is_empty() {
            return Err(ConfigError::Invalid("domains.priority must not be empty".into()));
        }

        if self.environment.is_strict() {
            if self.llm.api_key.is_empty() {
                return Err(ConfigError::MissingSecret("LLM_API_KEY".into()));
            }
            if self.embedding.api_key.is_empty() {
                return Err(ConfigError::MissingSecret("EMBEDDING_API_KEY".into()));
            }
            if self.vector_store.endpoint.is_empty() {
                return Err(ConfigError::MissingSecret("QDRANT_URL".into()));
            }
        }

        Ok(())
    }
}

/// Load settings with priority: env vars > config/{env}.yaml >
/// config/default.yaml > built-in defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("SODAM")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
