//! LLM-as-judge client
//!
//! Wraps a chat backend for structured completions: the judge prompt asks
//! for JSON only, and the response is parsed into a serde type after
//! stripping code fences and any prose around the JSON body.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::backend::ChatBackend;
use crate::message::Message;
use crate::ratelimit::TokenBucket;
use crate::LlmError;

/// Structured-completion client for evaluator and router judge calls.
#[derive(Clone)]
pub struct JudgeClient {
    backend: Arc<dyn ChatBackend>,
    gate: Arc<TokenBucket>,
}

impl JudgeClient {
    pub fn new(backend: Arc<dyn ChatBackend>, gate: Arc<TokenBucket>) -> Self {
        Self { backend, gate }
    }

    /// Issue one judge call and parse the JSON body into `T`.
    pub async fn structured<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, LlmError> {
        self.gate.acquire().await?;

        let result = self.backend.generate(&[Message::user(prompt)]).await?;
        parse_json_body(&result.text)
    }

    /// Issue one judge call and return the raw text, for prompts whose
    /// output is a sentence rather than JSON.
    pub async fn text(&self, prompt: &str) -> Result<String, LlmError> {
        self.gate.acquire().await?;
        let result = self.backend.generate(&[Message::user(prompt)]).await?;
        Ok(result.text.trim().to_string())
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }
}

/// Extract and parse the JSON body of a model response.
///
/// Models wrap JSON in code fences or lead with a sentence of prose often
/// enough that parsing the raw text directly is the uncommon case.
pub fn parse_json_body<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let trimmed = strip_code_fences(text.trim());

    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    // Fall back to the outermost JSON object or array substring.
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    Err(LlmError::InvalidResponse(format!(
        "no parseable JSON in judge output: {}",
        text.chars().take(120).collect::<String>()
    )))
}

fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(rest)
}
