//! Chunk and retrieval result types
//!
//! A chunk is the smallest retrievable unit in a vector collection. The
//! engine treats chunks as read-only; embeddings are owned by the vector
//! store and never cross this boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::DomainTag;

/// Provenance of a chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Origin system, e.g. "국가법령정보센터", "기업마당"
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected_at: Option<DateTime<Utc>>,
    /// Article/clause path where applicable, e.g. "근로기준법 제17조"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_path: Option<String>,
}

/// A stored passage with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub domain: DomainTag,
    pub title: String,
    pub text: String,
    pub source: SourceDescriptor,
}

impl Chunk {
    pub fn new(
        id: impl Into<String>,
        domain: DomainTag,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            domain,
            title: title.into(),
            text: text.into(),
            source: SourceDescriptor::default(),
        }
    }

    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.source = source;
        self
    }
}

/// One fused candidate produced by hybrid retrieval.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity from dense search; 0.0 when dense did not rank it.
    pub dense_score: f32,
    /// BM25 score from lexical search; 0.0 when lexical did not rank it.
    pub lexical_score: f32,
    /// Reciprocal-rank fused score.
    pub fused_score: f32,
}

/// Ordered fused candidates for one (query, domain) pair.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub domain: DomainTag,
    /// Descending by fused score, bounded by `k_retrieve`.
    pub chunks: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn new(domain: DomainTag) -> Self {
        Self { domain, chunks: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn mean_dense_score(&self) -> f32 {
        if self.chunks.is_empty() {
            return 0.0;
        }
        self.chunks.iter().map(|c| c.dense_score).sum::<f32>() / self.chunks.len() as f32
    }
}
