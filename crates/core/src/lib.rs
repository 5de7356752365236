//! Core types for the sodam advisory engine
//!
//! This crate provides the foundational types used across all other crates:
//! - Query and conversation types
//! - Advisory domain tags and their fixed priority ordering
//! - Chunk and retrieval result types
//! - Answer, source reference, and action suggestion types
//! - Stream events for the SSE contract
//! - The engine error taxonomy
//! - The persistence-collaborator seam

pub mod answer;
pub mod archive;
pub mod chunk;
pub mod domain;
pub mod error;
pub mod events;
pub mod query;

pub use answer::{
    ActionSuggestion, Answer, EvaluationRecord, EvaluatorNote, SourceReference, DOCUMENT_TYPES,
};
pub use archive::{ArchivedExchange, ExchangeArchive, NullArchive};
pub use chunk::{Chunk, RetrievalResult, ScoredChunk, SourceDescriptor};
pub use domain::DomainTag;
pub use error::{EngineError, Result};
pub use events::{StreamEvent, TerminalState};
pub use query::{CompanyContext, Query};
