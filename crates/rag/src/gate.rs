//! Retrieval gate
//!
//! Quantitative check on retrieval output before any Generator call.
//! `RETRY` sends the orchestrator through one query rewrite; `FAIL` short-
//! circuits to a graceful insufficient-information answer.

use sodam_config::RetrievalConfig;
use sodam_core::ScoredChunk;

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Pass,
    Retry,
    Fail,
}

/// The three checks of the gate, exposed for logging.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub verdict: GateVerdict,
    pub chunk_count: usize,
    pub mean_dense_score: f32,
    pub keyword_ratio: f32,
}

/// Lightweight retrieval quality check.
#[derive(Debug, Clone)]
pub struct RetrievalGate {
    min_docs: usize,
    min_avg_sim: f32,
    min_keyword_ratio: f32,
}

impl RetrievalGate {
    pub fn new(config: &RetrievalConfig) -> Self {
        Self {
            min_docs: config.min_docs,
            min_avg_sim: config.min_avg_sim,
            min_keyword_ratio: config.min_keyword_ratio,
        }
    }

    /// Check the merged retrieval output against the query.
    ///
    /// Empty output, or output failing all three checks at once, is FAIL;
    /// passing all three is PASS; anything in between earns one RETRY.
    pub fn check(&self, query: &str, chunks: &[ScoredChunk]) -> GateReport {
        let chunk_count = chunks.len();
        let mean_dense_score = if chunks.is_empty() {
            0.0
        } else {
            chunks.iter().map(|c| c.dense_score).sum::<f32>() / chunks.len() as f32
        };
        let keyword_ratio = keyword_overlap(query, chunks);

        let docs_ok = chunk_count >= self.min_docs;
        let sim_ok = mean_dense_score >= self.min_avg_sim;
        let keywords_ok = keyword_ratio >= self.min_keyword_ratio;

        let verdict = if chunks.is_empty() || (!docs_ok && !sim_ok && !keywords_ok) {
            GateVerdict::Fail
        } else if docs_ok && sim_ok && keywords_ok {
            GateVerdict::Pass
        } else {
            GateVerdict::Retry
        };

        GateReport { verdict, chunk_count, mean_dense_score, keyword_ratio }
    }
}

/// Fraction of query terms that occur in at least one retrieved title.
fn keyword_overlap(query: &str, chunks: &[ScoredChunk]) -> f32 {
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_string())
        .collect();

    if terms.is_empty() || chunks.is_empty() {
        return 0.0;
    }

    let titles: Vec<String> = chunks.iter().map(|c| c.chunk.title.to_lowercase()).collect();
    let matched = terms
        .iter()
        .filter(|term| titles.iter().any(|title| title.contains(term.as_str())))
        .count();

    matched as f32 / terms.len() as f32
}
