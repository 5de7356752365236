//! Engine error taxonomy
//!
//! `OutOfDomain` and `InsufficientContext` are terminal states rather than
//! failures: they produce canned user-visible messages and a `done` event
//! with `passed=false`. The remaining variants produce an `error` event and
//! discard any partial answer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Router refused the query.
    #[error("query is out of the advisory domains")]
    OutOfDomain,

    /// Retrieval gate verdict was FAIL.
    #[error("retrieved context is insufficient to answer")]
    InsufficientContext,

    /// External service hard failure after bounded retry.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Rate-limit bucket permanently empty; treated as BackendUnavailable.
    #[error("quota exhausted for {0}")]
    QuotaExhausted(String),

    /// Wall-clock deadline elapsed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Parser could not recover citations/actions. The answer is still
    /// delivered; only the structured trailer is dropped.
    #[error("malformed model output: {0}")]
    MalformedModelOutput(String),
}

impl EngineError {
    /// Taxonomy tag carried on the `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::OutOfDomain => "out_of_domain",
            EngineError::InsufficientContext => "insufficient_context",
            EngineError::BackendUnavailable(_) => "backend_unavailable",
            EngineError::QuotaExhausted(_) => "backend_unavailable",
            EngineError::DeadlineExceeded => "deadline_exceeded",
            EngineError::MalformedModelOutput(_) => "malformed_model_output",
        }
    }

    /// True when the orchestrator must emit an `error` event instead of a
    /// `done` event.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::BackendUnavailable(_)
                | EngineError::QuotaExhausted(_)
                | EngineError::DeadlineExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_maps_to_backend_unavailable() {
        let err = EngineError::QuotaExhausted("judge".to_string());
        assert_eq!(err.kind(), "backend_unavailable");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_terminal_states_are_not_fatal() {
        assert!(!EngineError::OutOfDomain.is_fatal());
        assert!(!EngineError::InsufficientContext.is_fatal());
        assert!(!EngineError::MalformedModelOutput("x".into()).is_fatal());
    }
}
