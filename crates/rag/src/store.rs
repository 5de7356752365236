//! Vector store adapter
//!
//! The narrow interface the engine sees. Concrete backends are swappable
//! and no backend-specific type crosses this boundary. Embedding vectors are
//! owned by the store: `upsert` computes them, `query` consumes one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sodam_core::Chunk;

use crate::RagError;

/// Payload-level filter for dense search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Restrict to chunks from one origin system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.origin.is_none()
    }
}

/// Dense search hit with cosine similarity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Lexical (BM25) search hit.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// Uniform interface over the external vector service.
///
/// Implementations must be safe under concurrent use and surface transport
/// failures as `RagError::BackendUnavailable` after one transparent
/// reconnect attempt.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunks in a collection. The engine never calls
    /// this on the request path; it exists for the offline corpus loader.
    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<(), RagError>;

    /// Nearest-neighbor search by cosine similarity.
    async fn query(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<VectorHit>, RagError>;

    /// BM25 search over the same corpus.
    async fn lexical_query(
        &self,
        collection: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<LexicalHit>, RagError>;

    /// Number of chunks stored in a collection.
    async fn count(&self, collection: &str) -> Result<u64, RagError>;
}
