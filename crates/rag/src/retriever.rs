//! Hybrid retriever
//!
//! One logical retriever per domain, each bound to a single collection.
//! Dense and lexical search run concurrently and are joined by reciprocal
//! rank fusion; multi-domain queries fan out per domain and merge under
//! per-domain quotas.

use std::collections::HashMap;
use std::sync::Arc;

use sodam_config::{DomainsConfig, RetrievalConfig};
use sodam_core::{Chunk, DomainTag, RetrievalResult, ScoredChunk};
use sodam_llm::{Embedder, TokenBucket};

use crate::store::{LexicalHit, VectorHit, VectorStore};
use crate::RagError;

/// Per-domain hybrid retriever.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    embedding_gate: Arc<TokenBucket>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        embedding_gate: Arc<TokenBucket>,
        config: RetrievalConfig,
    ) -> Self {
        Self { store, embedder, embedding_gate, config }
    }

    /// Retrieve fused candidates for one (query, domain) pair.
    pub async fn retrieve(
        &self,
        domain: DomainTag,
        collection: &str,
        query: &str,
        k_fetch: usize,
    ) -> Result<RetrievalResult, RagError> {
        if k_fetch == 0 {
            return Ok(RetrievalResult::new(domain));
        }

        self.embedding_gate.acquire().await?;
        let query_vector = self.embedder.embed_one(query).await?;

        let dense_future = self.store.query(collection, &query_vector, k_fetch, None);
        let lexical_future = self.store.lexical_query(collection, query, k_fetch);
        let (dense, lexical) = tokio::join!(dense_future, lexical_future);
        let dense = dense?;
        let lexical = lexical?;

        tracing::debug!(
            domain = %domain,
            collection,
            dense = dense.len(),
            lexical = lexical.len(),
            "hybrid retrieval fetched candidates"
        );

        let mut fused = rrf_fuse(&dense, &lexical, self.config.k_rrf);
        fused.truncate(self.config.k_retrieve);

        Ok(RetrievalResult { domain, chunks: fused })
    }
}

/// Reciprocal rank fusion over the dense and lexical rankings.
///
/// `score(c) = Σ 1/(k_rrf + rank_i(c))` over the rankers that returned `c`,
/// ranks 1-based. Deterministic given the same per-ranker inputs: ties break
/// by dense score, then by chunk id.
pub fn rrf_fuse(dense: &[VectorHit], lexical: &[LexicalHit], k_rrf: f32) -> Vec<ScoredChunk> {
    struct Entry {
        chunk: Chunk,
        dense_score: f32,
        lexical_score: f32,
        fused_score: f32,
    }

    let mut entries: HashMap<String, Entry> = HashMap::new();

    for (rank, hit) in dense.iter().enumerate() {
        let rrf = 1.0 / (k_rrf + rank as f32 + 1.0);
        entries
            .entry(hit.chunk.id.clone())
            .and_modify(|e| {
                e.fused_score += rrf;
                e.dense_score = hit.score;
            })
            .or_insert(Entry {
                chunk: hit.chunk.clone(),
                dense_score: hit.score,
                lexical_score: 0.0,
                fused_score: rrf,
            });
    }

    for (rank, hit) in lexical.iter().enumerate() {
        let rrf = 1.0 / (k_rrf + rank as f32 + 1.0);
        entries
            .entry(hit.chunk.id.clone())
            .and_modify(|e| {
                e.fused_score += rrf;
                e.lexical_score = hit.score;
            })
            .or_insert(Entry {
                chunk: hit.chunk.clone(),
                dense_score: 0.0,
                lexical_score: hit.score,
                fused_score: rrf,
            });
    }

    let mut fused: Vec<ScoredChunk> = entries
        .into_values()
        .map(|e| ScoredChunk {
            chunk: e.chunk,
            dense_score: e.dense_score,
            lexical_score: e.lexical_score,
            fused_score: e.fused_score,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.dense_score
                    .partial_cmp(&a.dense_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });

    fused
}

/// Fan-out retriever over the full domain set.
pub struct MultiDomainRetriever {
    retriever: HybridRetriever,
    domains: DomainsConfig,
    k_retrieve: usize,
    k_fetch: usize,
}

impl MultiDomainRetriever {
    pub fn new(retriever: HybridRetriever, domains: DomainsConfig) -> Self {
        let k_retrieve = retriever.config.k_retrieve;
        let k_fetch = retriever.config.k_fetch;
        Self { retriever, domains, k_retrieve, k_fetch }
    }

    /// Retrieve for every routed domain concurrently and merge with
    /// per-domain quotas. The first (dominant) domain gets the largest
    /// share. `reduced_budget` halves the per-ranker fetch, used when the
    /// router degraded to all domains.
    pub async fn retrieve(
        &self,
        domains: &[DomainTag],
        query: &str,
        reduced_budget: bool,
    ) -> Result<Vec<ScoredChunk>, RagError> {
        if domains.is_empty() {
            return Ok(Vec::new());
        }

        let k_fetch = if reduced_budget {
            (self.k_fetch / 2).max(1)
        } else {
            self.k_fetch
        };

        let futures = domains.iter().map(|domain| {
            let collection = self.domains.collection(*domain).to_string();
            async move {
                self.retriever
                    .retrieve(*domain, &collection, query, k_fetch)
                    .await
            }
        });

        let per_domain: Vec<RetrievalResult> =
            futures::future::try_join_all(futures).await?;

        Ok(merge_with_quotas(&per_domain, self.k_retrieve))
    }
}

/// Merge per-domain results into one bounded list.
///
/// Quotas descend with domain position (first domain largest); unclaimed
/// quota is refilled from remaining candidates in domain order. Duplicate
/// chunk ids keep their first (highest-priority) occurrence.
pub fn merge_with_quotas(per_domain: &[RetrievalResult], budget: usize) -> Vec<ScoredChunk> {
    if per_domain.is_empty() || budget == 0 {
        return Vec::new();
    }

    let n = per_domain.len();
    let weight_sum: usize = (1..=n).sum();

    let mut quotas: Vec<usize> = (0..n)
        .map(|i| ((n - i) * budget + weight_sum - 1) / weight_sum)
        .collect();
    // Rounding up can oversubscribe; trim from the tail.
    let mut excess = quotas.iter().sum::<usize>().saturating_sub(budget);
    for quota in quotas.iter_mut().rev() {
        let cut = excess.min(quota.saturating_sub(1));
        *quota -= cut;
        excess -= cut;
        if excess == 0 {
            break;
        }
    }

    let mut merged: Vec<ScoredChunk> = Vec::with_capacity(budget);
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut cursors = vec![0usize; n];

    for (i, result) in per_domain.iter().enumerate() {
        let mut taken = 0;
        while taken < quotas[i] && cursors[i] < result.chunks.len() {
            let candidate = &result.chunks[cursors[i]];
            cursors[i] += 1;
            if seen.insert(candidate.chunk.id.clone()) {
                merged.push(candidate.clone());
                taken += 1;
            }
        }
    }

    // Refill unclaimed budget from leftovers, still in domain order.
    for (i, result) in per_domain.iter().enumerate() {
        while merged.len() < budget && cursors[i] < result.chunks.len() {
            let candidate = &result.chunks[cursors[i]];
            cursors[i] += 1;
            if seen.insert(candidate.chunk.id.clone()) {
                merged.push(candidate.clone());
            }
        }
    }

    merged
}
