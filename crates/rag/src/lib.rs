//! Hybrid retrieval for the sodam advisory engine
//!
//! Features:
//! - Narrow vector store adapter (dense + lexical) with a Qdrant backend
//! - Tantivy BM25 lexical search per collection
//! - Hybrid fusion with reciprocal rank fusion
//! - Multi-domain fan-out with per-domain quota merging
//! - Retrieval gate (PASS / RETRY / FAIL)
//! - LLM query rewriting for the RETRY path
//! - Context assembly with provenance markers

pub mod context;
pub mod gate;
pub mod memory;
pub mod qdrant;
pub mod retriever;
pub mod rewrite;
pub mod sparse;
pub mod store;

pub use context::ContextBundle;
pub use gate::{GateReport, GateVerdict, RetrievalGate};
pub use memory::{HashEmbedder, InMemoryStore};
pub use qdrant::{QdrantStore, QdrantStoreConfig};
pub use retriever::{merge_with_quotas, rrf_fuse, HybridRetriever, MultiDomainRetriever};
pub use rewrite::QueryRewriter;
pub use sparse::{SparseConfig, SparseIndex};
pub use store::{LexicalHit, SearchFilter, VectorHit, VectorStore};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),
}

impl From<sodam_llm::LlmError> for RagError {
    fn from(err: sodam_llm::LlmError) -> Self {
        RagError::Embedding(err.to_string())
    }
}

impl From<RagError> for sodam_core::EngineError {
    fn from(err: RagError) -> Self {
        sodam_core::EngineError::BackendUnavailable(err.to_string())
    }
}
