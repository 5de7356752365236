//! Answer, source reference, action suggestion, and evaluation types

use serde::{Deserialize, Serialize};

/// Closed allow-list of generatable document types.
///
/// The engine only suggests these; the document-rendering collaborator owns
/// the actual templates.
pub const DOCUMENT_TYPES: [&str; 5] = [
    "labor_contract",
    "employment_rules",
    "business_plan",
    "funding_application",
    "tax_invoice",
];

/// A citation surfaced with the answer. Always traces to a retrieved chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    /// Id of the cited chunk.
    pub chunk_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Origin system, e.g. "국가법령정보센터"
    pub origin: String,
}

/// Typed, structured follow-up hint for the UI.
///
/// Only `document_generation` and `external_link` are validated; the rest
/// are declarative placeholders so the UI can render them without a protocol
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSuggestion {
    DocumentGeneration { document_type: String },
    ExternalLink { url: String, label: String },
    Calculator { kind: String },
    ScheduleAlert { topic: String },
    FundingSearch { keyword: String },
}

/// A note the evaluator attaches when something degraded but delivery
/// continued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorNote {
    /// The structured trailer could not be parsed; actions were dropped.
    MalformedModelOutput,
    /// One or more judge calls failed; affected scores are zero.
    JudgeUnavailable,
}

/// Scalar quality record attached to every terminal `done` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Fraction of atomic claims supported by retrieved chunks, in [0,1].
    pub faithfulness: f32,
    /// Semantic similarity between answer and reverse-generated question.
    pub answer_relevancy: f32,
    /// Do retrieved chunks contain the answer-relevant evidence?
    pub context_precision: f32,
    /// Is everything in the answer covered by retrieved chunks?
    ///
    /// Computed against retrieved chunks only, not the corpus, so recall
    /// failures caused by missing corpus coverage are not visible here.
    pub context_recall: f32,
    /// Composite 0-100 judge score.
    pub llm_score: u8,
    pub passed: bool,
    pub latency_s: f64,
    /// Ids of the chunks that made up the Generator context, in order.
    pub retrieved_chunk_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<EvaluatorNote>,
}

impl EvaluationRecord {
    /// Record for terminal states that never reached the evaluator
    /// (refusal, insufficient context).
    pub fn zeroed(latency_s: f64) -> Self {
        Self {
            faithfulness: 0.0,
            answer_relevancy: 0.0,
            context_precision: 0.0,
            context_recall: 0.0,
            llm_score: 0,
            passed: false,
            latency_s,
            retrieved_chunk_ids: Vec::new(),
            notes: Vec::new(),
        }
    }
}

/// The final response handed to the caller and the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceReference>,
    pub actions: Vec<ActionSuggestion>,
    pub evaluation: EvaluationRecord,
}
