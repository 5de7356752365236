//! Stream events
//!
//! The wire contract for `POST /chat/stream`. Within one query, tokens are
//! emitted in generation order, every `source` precedes `done`, and
//! `done`/`error` is always the last event.

use serde::{Deserialize, Serialize};

use crate::answer::{ActionSuggestion, EvaluationRecord, SourceReference};

/// Terminal state of a query, surfaced on the `done` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Done,
    Refused,
    Insufficient,
    Failed,
}

/// One server-sent event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Content delta, in generation order.
    Token { content: String },
    /// Citation metadata, emitted as soon as parsed from model output.
    Source { source: SourceReference },
    /// Action suggestion, emitted after validation.
    Action { action: ActionSuggestion },
    /// Final event of a successful (or gracefully degraded) stream.
    Done {
        state: TerminalState,
        evaluation: EvaluationRecord,
    },
    /// Terminal error; no further events follow.
    Error { kind: String, message: String },
}

impl StreamEvent {
    /// SSE event name for this variant.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::Token { .. } => "token",
            StreamEvent::Source { .. } => "source",
            StreamEvent::Action { .. } => "action",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// True for `done` and `error`; nothing may follow these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
