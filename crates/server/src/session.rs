//! Conversation session management
//!
//! Keeps the bounded conversational memory per conversation id. Durable
//! session persistence is an external concern; this map only backs
//! follow-up condensation, and idle conversations are swept after a TTL.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use sodam_agents::ConversationMemory;
use sodam_config::SessionConfig;

struct SessionEntry {
    memory: ConversationMemory,
    last_touched: Instant,
}

/// In-memory conversation store keyed by conversation id.
pub struct SessionManager {
    sessions: DashMap<String, SessionEntry>,
    memory_turns: usize,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            memory_turns: config.memory_turns,
            ttl: Duration::from_secs(config.ttl_s),
        }
    }

    /// Snapshot of a conversation's memory; a fresh ring when unknown.
    pub fn memory(&self, conversation_id: &str) -> ConversationMemory {
        self.sessions
            .get(conversation_id)
            .map(|entry| entry.memory.clone())
            .unwrap_or_else(|| ConversationMemory::new(self.memory_turns))
    }

    /// Record a finished exchange for a conversation.
    pub fn record(&self, conversation_id: &str, question: &str, answer: &str) {
        let mut entry = self
            .sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| SessionEntry {
                memory: ConversationMemory::new(self.memory_turns),
                last_touched: Instant::now(),
            });
        entry.memory.push(question, answer);
        entry.last_touched = Instant::now();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop conversations idle past the TTL. Called from a background task.
    pub fn sweep(&self) -> usize {
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.last_touched.elapsed() < ttl);
        before - self.sessions.len()
    }

    /// Spawn the periodic sweep loop.
    pub fn start_sweeper(self: &std::sync::Arc<Self>, interval: Duration) {
        let manager = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let swept = manager.sweep();
                if swept > 0 {
                    tracing::debug!(swept, remaining = manager.len(), "swept idle conversations");
                }
            }
        });
    }
}
