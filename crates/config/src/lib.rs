//! Configuration management for the sodam advisory engine
//!
//! Supports loading configuration from:
//! - YAML files (`config/default.yaml`, `config/{env}.yaml`)
//! - Environment variables (`SODAM_` prefix, `__` separator)
//!
//! The prompt registry also lives here: prompt templates are pure data keyed
//! by `(domain, purpose)`, and changing one is a content change that must
//! not require new code paths elsewhere.

pub mod constants;
pub mod keywords;
pub mod prompts;
pub mod settings;

pub use keywords::RouterLexicon;
pub use prompts::{
    PromptRegistry, PromptTemplate, Purpose, ACTIONS_MARKER, CONTEXT_FENCE_CLOSE,
    CONTEXT_FENCE_OPEN, SOURCES_MARKER,
};
pub use settings::{
    load_settings, DomainsConfig, EmbeddingSettings, EngineConfig, EvaluationConfig, LlmSettings,
    RateLimitConfig, RetrievalConfig, RouterConfig, RuntimeEnvironment, ServerConfig,
    SessionConfig, Settings, VectorStoreSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required secret: {0}")]
    MissingSecret(String),

    #[error("prompt placeholder not provided: {0}")]
    MissingPlaceholder(String),

    #[error(transparent)]
    Load(#[from] config::ConfigError),
}
