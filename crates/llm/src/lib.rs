//! LLM, judge, and embedding clients
//!
//! Features:
//! - `ChatBackend` trait with an OpenAI-compatible implementation
//! - Streaming token generation over an mpsc channel
//! - Structured JSON completions for LLM-as-judge calls
//! - Remote embedding client
//! - Token-bucket rate gates with separate budgets per external service

pub mod backend;
pub mod embedding;
pub mod judge;
pub mod message;
pub mod ratelimit;

pub use backend::{ChatBackend, FinishReason, GenerationResult, OpenAiBackend, OpenAiConfig};
pub use embedding::{cosine_similarity, Embedder, EmbeddingConfig, HttpEmbedder};
pub use judge::{parse_json_body, JudgeClient};
pub use message::{Message, Role};
pub use ratelimit::{RateGates, TokenBucket};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("rate-limit wait exceeded for {0}")]
    QuotaExhausted(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for sodam_core::EngineError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::QuotaExhausted(service) => sodam_core::EngineError::QuotaExhausted(service),
            other => sodam_core::EngineError::BackendUnavailable(other.to_string()),
        }
    }
}
