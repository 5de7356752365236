//! Centralized constants
//!
//! Single source of truth for engine tuning defaults. Business content
//! (keyword tables, prompt text) lives in `keywords` and `prompts`; this
//! module only holds numeric defaults and service endpoints.

/// Service endpoints (loaded from env vars with fallback defaults)
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// Qdrant vector store endpoint (env: QDRANT_URL)
    pub static QDRANT_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
    });

    /// OpenAI-compatible LLM endpoint (env: LLM_API_BASE)
    pub static LLM_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("LLM_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
    });

    /// OpenAI-compatible embedding endpoint (env: EMBEDDING_API_BASE)
    pub static EMBEDDING_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("EMBEDDING_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
    });
}

/// Retrieval tuning defaults
pub mod retrieval {
    /// Candidates fetched per ranker before fusion.
    pub const K_FETCH: usize = 20;

    /// Fused chunks returned per (query, domain) pair.
    pub const K_RETRIEVE: usize = 10;

    /// Chunks assembled into the Generator context.
    pub const K_CONTEXT: usize = 5;

    /// Reciprocal rank fusion constant.
    pub const K_RRF: f32 = 60.0;

    /// Retrieval gate: minimum chunk count.
    pub const MIN_DOCS: usize = 3;

    /// Retrieval gate: minimum mean dense similarity.
    pub const MIN_AVG_SIM: f32 = 0.35;

    /// Retrieval gate: minimum query-term/title overlap ratio.
    pub const MIN_KEYWORD_RATIO: f32 = 0.2;
}

/// Orchestration defaults
pub mod engine {
    /// Wall-clock deadline across the whole state graph (seconds).
    pub const REQUEST_DEADLINE_S: u64 = 60;

    /// Retry budget per query, shared between the retrieval-gate rewrite and
    /// the evaluator-triggered regeneration.
    pub const MAX_RETRIES: u32 = 1;
}

/// Evaluator pass thresholds
pub mod evaluation {
    pub const FAITHFULNESS_THRESHOLD: f32 = 0.8;
    pub const RELEVANCY_THRESHOLD: f32 = 0.7;
    pub const LLM_SCORE_THRESHOLD: u8 = 70;
}

/// Router defaults
pub mod router {
    /// Minimum normalized keyword score for the pre-filter to claim a domain.
    pub const MIN_SCORE: f32 = 0.25;

    /// Required margin between the dominant and runner-up domain scores for
    /// the pre-filter to be confident without an LLM call.
    pub const MARGIN_THRESHOLD: f32 = 0.15;
}

/// Rate gate defaults (tokens per bucket)
pub mod rate {
    pub const EMBEDDING_CAPACITY: u32 = 60;
    pub const GENERATION_CAPACITY: u32 = 20;
    pub const JUDGE_CAPACITY: u32 = 40;

    /// Refill interval for one token (milliseconds).
    pub const REFILL_MS: u64 = 1_000;

    /// A caller waiting longer than this on an empty bucket surfaces
    /// `QuotaExhausted`.
    pub const MAX_WAIT_S: u64 = 30;
}
