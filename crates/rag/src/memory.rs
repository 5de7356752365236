//! In-memory vector store
//!
//! Implements the adapter trait without any external service. Used by tests
//! and the development profile, where neither Qdrant nor the embedding
//! service is reachable.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use sodam_core::Chunk;
use sodam_llm::{cosine_similarity, Embedder, LlmError};

use crate::store::{LexicalHit, SearchFilter, VectorHit, VectorStore};
use crate::RagError;

const HASH_DIM: usize = 64;

/// Deterministic hashing embedder.
///
/// Maps each whitespace token into a fixed-dimensional bucket vector, so
/// texts sharing tokens land near each other under cosine similarity. Not a
/// semantic model; good enough to exercise the dense path end to end.
#[derive(Debug, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; HASH_DIM];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % HASH_DIM as u64) as usize;
            let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| Self::embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        HASH_DIM
    }
}

#[derive(Default)]
struct StoredCollection {
    points: Vec<(Chunk, Vec<f32>)>,
}

/// In-process store over hash embeddings and token-overlap lexical scoring.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, matching how the engine holds the Qdrant store.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .filter(|t| t.chars().count() > 1)
            .map(|t| t.to_string())
            .collect()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<(), RagError> {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();
        for chunk in chunks {
            let vector = HashEmbedder::embed_text(&chunk.text);
            if let Some(existing) = stored.points.iter_mut().find(|(c, _)| c.id == chunk.id) {
                *existing = (chunk.clone(), vector);
            } else {
                stored.points.push((chunk.clone(), vector));
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<VectorHit>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let collections = self.collections.read();
        let Some(stored) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorHit> = stored
            .points
            .iter()
            .filter(|(chunk, _)| match &filter {
                Some(f) => f.origin.as_deref().map_or(true, |o| chunk.source.origin == o),
                None => true,
            })
            .map(|(chunk, vector)| VectorHit {
                chunk: chunk.clone(),
                score: cosine_similarity(query_vector, vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn lexical_query(
        &self,
        collection: &str,
        text: &str,
        k: usize,
    ) -> Result<Vec<LexicalHit>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_tokens = Self::tokens(text);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let collections = self.collections.read();
        let Some(stored) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<LexicalHit> = stored
            .points
            .iter()
            .filter_map(|(chunk, _)| {
                let haystack = format!("{} {}", chunk.title, chunk.text).to_lowercase();
                let overlap = query_tokens.iter().filter(|t| haystack.contains(*t)).count();
                (overlap > 0).then(|| LexicalHit {
                    chunk: chunk.clone(),
                    score: overlap as f32,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<u64, RagError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|s| s.points.len() as u64)
            .unwrap_or(0))
    }
}
