//! Orchestrator
//!
//! Explicit state machine over the agent graph:
//! `ADMITTED → ROUTED → RETRIEVED → GENERATING → EVALUATED → DONE`, with
//! side branches `REFUSED`, `INSUFFICIENT`, `RETRYING`, and `FAILED`. The
//! retry budget lives on the state and is shared by the retrieval-gate
//! rewrite and the evaluator regeneration, so "at most one retry per query"
//! is a counter check, not an emergent property.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use sodam_config::EngineConfig;
use sodam_core::{
    Answer, ArchivedExchange, EngineError, EvaluationRecord, EvaluatorNote, ExchangeArchive,
    Query, StreamEvent, TerminalState,
};
use sodam_rag::{ContextBundle, GateVerdict, MultiDomainRetriever, QueryRewriter, RetrievalGate};

use crate::actions::validate_actions;
use crate::evaluator::Evaluator;
use crate::generator::Generator;
use crate::memory::{ConversationMemory, FollowUpCondenser};
use crate::router::{RouteOutcome, Router};

/// Canned refusal for out-of-domain queries.
pub const REFUSAL_MESSAGE: &str = "죄송합니다. 저는 창업·지원사업, 세무·회계, 인사·노무, 생활법률에 관한 \
     질문을 도와드리는 상담사예요. 해당 분야의 질문을 해주시면 성심껏 답변드릴게요.";

/// Canned answer when the retrieval gate fails.
pub const INSUFFICIENT_MESSAGE: &str = "죄송합니다. 현재 보유한 자료로는 정확한 답변을 드리기 어렵습니다. \
     질문을 조금 더 구체적으로 작성해 주시면 다시 확인해 볼게요.";

/// Orchestration states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Admitted,
    Routed,
    Retrieved,
    Generating,
    Evaluated,
    Retrying,
    Done,
    Refused,
    Insufficient,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Admitted => "ADMITTED",
            EngineState::Routed => "ROUTED",
            EngineState::Retrieved => "RETRIEVED",
            EngineState::Generating => "GENERATING",
            EngineState::Evaluated => "EVALUATED",
            EngineState::Retrying => "RETRYING",
            EngineState::Done => "DONE",
            EngineState::Refused => "REFUSED",
            EngineState::Insufficient => "INSUFFICIENT",
            EngineState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Everything the engine is wired with at startup.
pub struct EngineDeps {
    pub router: Router,
    pub retriever: MultiDomainRetriever,
    pub rewriter: QueryRewriter,
    pub gate: RetrievalGate,
    pub generator: Generator,
    pub evaluator: Evaluator,
    pub condenser: FollowUpCondenser,
    pub archive: Arc<dyn ExchangeArchive>,
    pub config: EngineConfig,
    pub k_context: usize,
}

/// The RAG orchestration engine.
pub struct AdvisoryEngine {
    deps: EngineDeps,
}

impl AdvisoryEngine {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps }
    }

    /// Run one query through the graph, emitting events to `events`.
    ///
    /// `done` or `error` is always the last event; nothing follows either.
    /// The returned answer is what was (or would have been) archived; `None`
    /// means a fatal error or a cancelled stream.
    pub async fn handle(
        &self,
        query: Query,
        memory: &ConversationMemory,
        events: mpsc::Sender<StreamEvent>,
    ) -> (TerminalState, Option<Answer>) {
        let started = Instant::now();
        let mut state = EngineState::Admitted;
        let deadline = Duration::from_secs(self.deps.config.request_deadline_s);

        let outcome = tokio::time::timeout(
            deadline,
            self.run(&query, memory, &events, started, &mut state),
        )
        .await;

        match outcome {
            Ok(Ok((terminal, answer))) => (terminal, answer),
            Ok(Err(error)) => {
                tracing::error!(
                    query_id = %query.id,
                    state = %state,
                    kind = error.kind(),
                    %error,
                    "query failed"
                );
                let _ = events
                    .send(StreamEvent::Error {
                        kind: error.kind().to_string(),
                        message: error.to_string(),
                    })
                    .await;
                (TerminalState::Failed, None)
            }
            Err(_elapsed) => {
                let error = EngineError::DeadlineExceeded;
                tracing::error!(
                    query_id = %query.id,
                    state = %state,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "deadline exceeded, cancelling query"
                );
                let _ = events
                    .send(StreamEvent::Error {
                        kind: error.kind().to_string(),
                        message: error.to_string(),
                    })
                    .await;
                (TerminalState::Failed, None)
            }
        }
    }

    async fn run(
        &self,
        query: &Query,
        memory: &ConversationMemory,
        events: &mpsc::Sender<StreamEvent>,
        started: Instant,
        state: &mut EngineState,
    ) -> Result<(TerminalState, Option<Answer>), EngineError> {
        let mut retries_used: u32 = 0;
        let max_retries = self.deps.config.max_retries;

        // Follow-ups are rewritten into self-contained questions before
        // routing; a failed rewrite falls back to the raw text.
        let question = self.deps.condenser.condense(&query.text, memory).await;

        // ADMITTED → ROUTED
        let route = self.deps.router.route(&question).await;
        self.transition(query, state, EngineState::Routed, started);

        let (domains, degraded) = match route {
            RouteOutcome::Refused => {
                self.transition(query, state, EngineState::Refused, started);
                let answer = self
                    .finish_canned(query, events, REFUSAL_MESSAGE, TerminalState::Refused, started)
                    .await;
                return Ok((TerminalState::Refused, answer));
            }
            RouteOutcome::Routed { domains, degraded } => (domains, degraded),
        };

        // ROUTED → RETRIEVED, with at most one rewrite retry.
        let mut retrieval_question = question.clone();
        let mut merged = self
            .deps
            .retriever
            .retrieve(&domains, &retrieval_question, degraded)
            .await?;
        self.transition(query, state, EngineState::Retrieved, started);

        let mut report = self.deps.gate.check(&retrieval_question, &merged);
        tracing::debug!(
            query_id = %query.id,
            verdict = ?report.verdict,
            chunks = report.chunk_count,
            mean_dense = report.mean_dense_score,
            keyword_ratio = report.keyword_ratio,
            "retrieval gate"
        );

        if report.verdict == GateVerdict::Retry && retries_used < max_retries {
            retries_used += 1;
            self.transition(query, state, EngineState::Retrying, started);

            retrieval_question = match self.deps.rewriter.rewrite(&retrieval_question, &domains).await {
                Ok(rewritten) => rewritten,
                Err(error) => {
                    tracing::warn!(query_id = %query.id, %error, "query rewrite failed, retrying with original");
                    retrieval_question
                }
            };

            merged = self
                .deps
                .retriever
                .retrieve(&domains, &retrieval_question, degraded)
                .await?;
            self.transition(query, state, EngineState::Retrieved, started);
            report = self.deps.gate.check(&retrieval_question, &merged);
        }

        if report.verdict != GateVerdict::Pass {
            self.transition(query, state, EngineState::Insufficient, started);
            let answer = self
                .finish_canned(query, events, INSUFFICIENT_MESSAGE, TerminalState::Insufficient, started)
                .await;
            return Ok((TerminalState::Insufficient, answer));
        }

        let bundle = ContextBundle::assemble(&merged, self.deps.k_context);
        let history = memory.render();
        let primary = domains[0];

        // RETRIEVED → GENERATING. While a regeneration is still possible the
        // first draft's tokens are buffered, so the caller only ever sees
        // the draft that survives evaluation; once the budget is spent the
        // (by construction final) generation streams live.
        self.transition(query, state, EngineState::Generating, started);

        let mut draft;
        let mut record;

        if retries_used < max_retries {
            let (buffer_tx, mut buffer_rx) = mpsc::channel::<StreamEvent>(64);
            let collector = tokio::spawn(async move {
                let mut tokens = Vec::new();
                while let Some(event) = buffer_rx.recv().await {
                    if let StreamEvent::Token { content } = event {
                        tokens.push(content);
                    }
                }
                tokens
            });

            draft = self
                .deps
                .generator
                .stream(primary, &history, &bundle, &question, None, &buffer_tx)
                .await?;
            drop(buffer_tx);
            let buffered = collector.await.unwrap_or_default();

            if draft.cancelled {
                tracing::info!(query_id = %query.id, "stream cancelled by caller, discarding partial answer");
                return Ok((TerminalState::Failed, None));
            }

            self.transition(query, state, EngineState::Evaluated, started);
            record = self
                .deps
                .evaluator
                .evaluate(
                    &question,
                    &draft.text,
                    &bundle,
                    started.elapsed().as_secs_f64(),
                    draft_notes(draft.malformed),
                )
                .await;

            if record.passed {
                // The first draft survives; release its tokens.
                for content in buffered {
                    if events.send(StreamEvent::Token { content }).await.is_err() {
                        tracing::info!(query_id = %query.id, "stream cancelled by caller, discarding answer");
                        return Ok((TerminalState::Failed, None));
                    }
                }
            } else {
                // One stricter regeneration; the buffered draft is dropped.
                // The decision is final: a second failure ships anyway with
                // `passed=false` recorded.
                retries_used += 1;
                self.transition(query, state, EngineState::Retrying, started);
                let reason = self.deps.evaluator.failure_reason(&record);
                tracing::info!(query_id = %query.id, %reason, "evaluator failed draft, regenerating");

                self.transition(query, state, EngineState::Generating, started);
                let retry_draft = self
                    .deps
                    .generator
                    .stream(primary, &history, &bundle, &question, Some(&reason), events)
                    .await?;

                if retry_draft.cancelled {
                    tracing::info!(query_id = %query.id, "stream cancelled during retry, discarding");
                    return Ok((TerminalState::Failed, None));
                }

                self.transition(query, state, EngineState::Evaluated, started);
                record = self
                    .deps
                    .evaluator
                    .evaluate(
                        &question,
                        &retry_draft.text,
                        &bundle,
                        started.elapsed().as_secs_f64(),
                        draft_notes(retry_draft.malformed),
                    )
                    .await;
                draft = retry_draft;
            }
        } else {
            draft = self
                .deps
                .generator
                .stream(primary, &history, &bundle, &question, None, events)
                .await?;

            if draft.cancelled {
                tracing::info!(query_id = %query.id, "stream cancelled by caller, discarding partial answer");
                return Ok((TerminalState::Failed, None));
            }

            self.transition(query, state, EngineState::Evaluated, started);
            record = self
                .deps
                .evaluator
                .evaluate(
                    &question,
                    &draft.text,
                    &bundle,
                    started.elapsed().as_secs_f64(),
                    draft_notes(draft.malformed),
                )
                .await;
        }

        tracing::debug!(query_id = %query.id, retries_used, passed = record.passed, "pipeline complete");

        // Metadata events precede `done`. A malformed trailer delivers the
        // answer with an evaluator note and no actions.
        for source in &draft.sources {
            let _ = events.send(StreamEvent::Source { source: source.clone() }).await;
        }
        let actions = if draft.malformed {
            Vec::new()
        } else {
            validate_actions(draft.actions.clone())
        };
        for action in &actions {
            let _ = events.send(StreamEvent::Action { action: action.clone() }).await;
        }

        record.latency_s = started.elapsed().as_secs_f64();
        let _ = events
            .send(StreamEvent::Done { state: TerminalState::Done, evaluation: record.clone() })
            .await;
        self.transition(query, state, EngineState::Done, started);

        let answer = Answer {
            text: draft.text,
            sources: draft.sources,
            actions,
            evaluation: record,
        };
        self.archive(query, answer.clone());

        Ok((TerminalState::Done, Some(answer)))
    }

    /// Emit a canned terminal answer (refusal / insufficient context) with a
    /// zero-score evaluation record.
    async fn finish_canned(
        &self,
        query: &Query,
        events: &mpsc::Sender<StreamEvent>,
        message: &str,
        terminal: TerminalState,
        started: Instant,
    ) -> Option<Answer> {
        let _ = events
            .send(StreamEvent::Token { content: message.to_string() })
            .await;

        let evaluation = EvaluationRecord::zeroed(started.elapsed().as_secs_f64());
        let _ = events
            .send(StreamEvent::Done { state: terminal, evaluation: evaluation.clone() })
            .await;

        let answer = Answer {
            text: message.to_string(),
            sources: Vec::new(),
            actions: Vec::new(),
            evaluation,
        };
        self.archive(query, answer.clone());
        Some(answer)
    }

    /// Hand the finished exchange to the persistence collaborator on a
    /// detached task; its failures only log.
    fn archive(&self, query: &Query, answer: Answer) {
        let archive = Arc::clone(&self.deps.archive);
        let exchange = ArchivedExchange::new(query, answer);
        let query_id = query.id;
        tokio::spawn(async move {
            if let Err(error) = archive.store(exchange).await {
                tracing::warn!(%query_id, error, "archive collaborator failed");
            }
        });
    }

    fn transition(
        &self,
        query: &Query,
        state: &mut EngineState,
        next: EngineState,
        started: Instant,
    ) {
        tracing::info!(
            query_id = %query.id,
            from = %state,
            to = %next,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "state transition"
        );
        *state = next;
    }
}

fn draft_notes(malformed: bool) -> Vec<EvaluatorNote> {
    if malformed {
        vec![EvaluatorNote::MalformedModelOutput]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Admitted.to_string(), "ADMITTED");
        assert_eq!(EngineState::Insufficient.to_string(), "INSUFFICIENT");
    }
}
