//! Query rewriting
//!
//! Runs once after a RETRY gate verdict: expands acronyms and injects
//! domain hints so the second retrieval pass has more to work with.

use std::collections::HashMap;
use std::sync::Arc;

use sodam_config::{PromptRegistry, Purpose};
use sodam_core::DomainTag;
use sodam_llm::{ChatBackend, LlmError, Message, TokenBucket};

/// LLM-backed query rewriter.
pub struct QueryRewriter {
    backend: Arc<dyn ChatBackend>,
    gate: Arc<TokenBucket>,
    registry: Arc<PromptRegistry>,
}

impl QueryRewriter {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        gate: Arc<TokenBucket>,
        registry: Arc<PromptRegistry>,
    ) -> Self {
        Self { backend, gate, registry }
    }

    /// Rewrite `query` into a retrieval-friendlier form. Falls back to the
    /// original text when the model returns nothing usable.
    pub async fn rewrite(
        &self,
        query: &str,
        domains: &[DomainTag],
    ) -> Result<String, LlmError> {
        let domain_hint = domains
            .iter()
            .map(|d| d.display_name())
            .collect::<Vec<_>>()
            .join(", ");

        let mut values = HashMap::new();
        values.insert("domain_hint", domain_hint);
        values.insert("question", query.to_string());

        let prompt = self
            .registry
            .render(None, Purpose::QueryRewrite, &values)
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        self.gate.acquire().await?;
        let result = self.backend.generate(&[Message::user(prompt)]).await?;

        let rewritten = result
            .text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
            .to_string();

        if rewritten.is_empty() {
            tracing::warn!("query rewrite returned empty text, keeping original");
            return Ok(query.to_string());
        }

        tracing::debug!(original = query, rewritten = %rewritten, "query rewritten");
        Ok(rewritten)
    }
}
