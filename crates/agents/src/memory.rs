//! Conversational memory
//!
//! A bounded ring of past (question, answer) pairs per conversation, used
//! to rewrite follow-ups into self-contained queries before routing. The
//! engine owns only this in-memory copy; durable history is the
//! persistence collaborator's concern.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use sodam_config::{PromptRegistry, Purpose};
use sodam_llm::{ChatBackend, Message, TokenBucket};

/// Bounded ring of conversation turns.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<(String, String)>,
    capacity: usize,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        Self { turns: VecDeque::with_capacity(capacity), capacity: capacity.max(1) }
    }

    pub fn push(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back((question.into(), answer.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Render for prompt injection.
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|(q, a)| format!("사용자: {q}\n상담사: {a}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Rewrites follow-up questions into self-contained ones.
pub struct FollowUpCondenser {
    backend: Arc<dyn ChatBackend>,
    gate: Arc<TokenBucket>,
    registry: Arc<PromptRegistry>,
}

impl FollowUpCondenser {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        gate: Arc<TokenBucket>,
        registry: Arc<PromptRegistry>,
    ) -> Self {
        Self { backend, gate, registry }
    }

    /// Rewrite `question` using the conversation so far. Returns the
    /// original text when there is no history or the rewrite fails; a bad
    /// condensation must never block the query.
    pub async fn condense(&self, question: &str, memory: &ConversationMemory) -> String {
        if memory.is_empty() {
            return question.to_string();
        }

        let mut values = HashMap::new();
        values.insert("history", memory.render());
        values.insert("question", question.to_string());

        let prompt = match self.registry.render(None, Purpose::CondenseFollowUp, &values) {
            Ok(prompt) => prompt,
            Err(error) => {
                tracing::warn!(%error, "condense prompt render failed");
                return question.to_string();
            }
        };

        if self.gate.acquire().await.is_err() {
            return question.to_string();
        }

        match self.backend.generate(&[Message::user(prompt)]).await {
            Ok(result) => {
                let condensed = result
                    .text
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .unwrap_or("")
                    .to_string();
                if condensed.is_empty() {
                    question.to_string()
                } else {
                    tracing::debug!(original = question, condensed = %condensed, "follow-up condensed");
                    condensed
                }
            }
            Err(error) => {
                tracing::warn!(%error, "follow-up condensation failed, using original");
                question.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_bounded() {
        let mut memory = ConversationMemory::new(2);
        memory.push("q1", "a1");
        memory.push("q2", "a2");
        memory.push("q3", "a3");

        assert_eq!(memory.len(), 2);
        let rendered = memory.render();
        assert!(!rendered.contains("q1"));
        assert!(rendered.contains("q2"));
        assert!(rendered.contains("q3"));
    }

    #[test]
    fn test_render_format() {
        let mut memory = ConversationMemory::new(5);
        memory.push("부가세 기한은?", "1월 25일까지입니다.");
        let rendered = memory.render();
        assert!(rendered.starts_with("사용자: 부가세 기한은?"));
        assert!(rendered.contains("상담사: 1월 25일까지입니다."));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut memory = ConversationMemory::new(0);
        memory.push("q", "a");
        assert_eq!(memory.len(), 1);
    }
}
