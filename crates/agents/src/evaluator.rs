//! Answer evaluator
//!
//! Scores a finished answer against the retrieved context. The three metric
//! groups are independent and fan out in parallel; a failed judge call
//! degrades that metric to zero with a note instead of blocking delivery.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use sodam_config::{EvaluationConfig, PromptRegistry, Purpose};
use sodam_core::{EvaluationRecord, EvaluatorNote};
use sodam_llm::{cosine_similarity, Embedder, JudgeClient, TokenBucket};
use sodam_rag::ContextBundle;

const MAX_CLAIMS: usize = 12;

#[derive(Debug, Deserialize)]
struct FaithfulnessVerdicts {
    #[serde(default)]
    verdicts: Vec<bool>,
}

#[derive(Debug, Deserialize)]
struct ContextJudgement {
    #[serde(default)]
    precision: f32,
    #[serde(default)]
    recall: f32,
    #[serde(default)]
    score: i64,
}

/// Post-generation quality evaluator.
pub struct Evaluator {
    judge: JudgeClient,
    embedder: Arc<dyn Embedder>,
    embedding_gate: Arc<TokenBucket>,
    registry: Arc<PromptRegistry>,
    thresholds: EvaluationConfig,
}

impl Evaluator {
    pub fn new(
        judge: JudgeClient,
        embedder: Arc<dyn Embedder>,
        embedding_gate: Arc<TokenBucket>,
        registry: Arc<PromptRegistry>,
        thresholds: EvaluationConfig,
    ) -> Self {
        Self { judge, embedder, embedding_gate, registry, thresholds }
    }

    /// Evaluate one answer. Independent metric calls run concurrently.
    pub async fn evaluate(
        &self,
        question: &str,
        answer: &str,
        bundle: &ContextBundle,
        latency_s: f64,
        mut notes: Vec<EvaluatorNote>,
    ) -> EvaluationRecord {
        let (faithfulness, relevancy, context) = tokio::join!(
            self.judge_faithfulness(answer, bundle),
            self.judge_relevancy(question, answer),
            self.judge_context(question, answer, bundle),
        );

        let mut judge_failed = false;

        let faithfulness = faithfulness.unwrap_or_else(|| {
            judge_failed = true;
            0.0
        });
        let answer_relevancy = relevancy.unwrap_or_else(|| {
            judge_failed = true;
            0.0
        });
        let (context_precision, context_recall, llm_score) = context.unwrap_or_else(|| {
            judge_failed = true;
            (0.0, 0.0, 0)
        });

        if judge_failed && !notes.contains(&EvaluatorNote::JudgeUnavailable) {
            notes.push(EvaluatorNote::JudgeUnavailable);
        }

        let passed = faithfulness >= self.thresholds.faithfulness_threshold
            && answer_relevancy >= self.thresholds.relevancy_threshold
            && llm_score >= self.thresholds.llm_score_threshold;

        EvaluationRecord {
            faithfulness,
            answer_relevancy,
            context_precision,
            context_recall,
            llm_score,
            passed,
            latency_s,
            retrieved_chunk_ids: bundle.chunk_ids(),
            notes,
        }
    }

    /// One-line reason for the stricter retry prompt, quoting the first
    /// threshold the record missed.
    pub fn failure_reason(&self, record: &EvaluationRecord) -> String {
        if record.faithfulness < self.thresholds.faithfulness_threshold {
            format!(
                "faithfulness {:.2} < {:.2}",
                record.faithfulness, self.thresholds.faithfulness_threshold
            )
        } else if record.answer_relevancy < self.thresholds.relevancy_threshold {
            format!(
                "answer_relevancy {:.2} < {:.2}",
                record.answer_relevancy, self.thresholds.relevancy_threshold
            )
        } else {
            format!(
                "llm_score {} < {}",
                record.llm_score, self.thresholds.llm_score_threshold
            )
        }
    }

    /// Fraction of atomic claims supported by the retrieved chunks.
    async fn judge_faithfulness(&self, answer: &str, bundle: &ContextBundle) -> Option<f32> {
        let claims = split_claims(answer);
        if claims.is_empty() || bundle.is_empty() {
            return Some(0.0);
        }

        let numbered = claims
            .iter()
            .enumerate()
            .map(|(i, claim)| format!("{}. {claim}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let mut values = HashMap::new();
        values.insert("context", bundle.rendered().to_string());
        values.insert("claims", numbered);
        let prompt = self.registry.render(None, Purpose::JudgeFaithfulness, &values).ok()?;

        match self.judge.structured::<FaithfulnessVerdicts>(&prompt).await {
            Ok(parsed) if !parsed.verdicts.is_empty() => {
                let considered = parsed.verdicts.len().min(claims.len());
                let supported = parsed.verdicts[..considered].iter().filter(|v| **v).count();
                Some(supported as f32 / claims.len() as f32)
            }
            Ok(_) => Some(0.0),
            Err(error) => {
                tracing::warn!(%error, "faithfulness judge failed");
                None
            }
        }
    }

    /// Cosine similarity between the original question and a question
    /// reverse-generated from the answer.
    async fn judge_relevancy(&self, question: &str, answer: &str) -> Option<f32> {
        let mut values = HashMap::new();
        values.insert("answer", answer.to_string());
        let prompt = self.registry.render(None, Purpose::ReverseQuestion, &values).ok()?;

        let reverse = match self.judge.text(&prompt).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => return Some(0.0),
            Err(error) => {
                tracing::warn!(%error, "reverse-question judge failed");
                return None;
            }
        };

        if self.embedding_gate.acquire().await.is_err() {
            return None;
        }
        match self
            .embedder
            .embed(&[question.to_string(), reverse.clone()])
            .await
        {
            Ok(vectors) if vectors.len() == 2 => {
                Some(cosine_similarity(&vectors[0], &vectors[1]).clamp(0.0, 1.0))
            }
            Ok(_) => Some(0.0),
            Err(error) => {
                tracing::warn!(%error, "relevancy embedding failed");
                None
            }
        }
    }

    /// Context precision, context recall, and the 0-100 composite score.
    async fn judge_context(
        &self,
        question: &str,
        answer: &str,
        bundle: &ContextBundle,
    ) -> Option<(f32, f32, u8)> {
        if bundle.is_empty() {
            return Some((0.0, 0.0, 0));
        }

        let mut values = HashMap::new();
        values.insert("question", question.to_string());
        values.insert("answer", answer.to_string());
        values.insert("context", bundle.rendered().to_string());
        let prompt = self.registry.render(None, Purpose::JudgeContext, &values).ok()?;

        match self.judge.structured::<ContextJudgement>(&prompt).await {
            Ok(parsed) => Some((
                parsed.precision.clamp(0.0, 1.0),
                parsed.recall.clamp(0.0, 1.0),
                parsed.score.clamp(0, 100) as u8,
            )),
            Err(error) => {
                tracing::warn!(%error, "context judge failed");
                None
            }
        }
    }
}

/// Split an answer into atomic claims: sentences long enough to assert
/// something, capped to keep the judge prompt bounded.
fn split_claims(answer: &str) -> Vec<String> {
    answer
        .split_inclusive(['.', '!', '?', '\n'])
        .map(|s| s.trim().trim_end_matches(['.', '!', '?']).trim())
        .filter(|s| s.chars().count() >= 5)
        .map(|s| s.to_string())
        .take(MAX_CLAIMS)
        .collect()
}
