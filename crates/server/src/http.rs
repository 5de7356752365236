//! HTTP endpoints
//!
//! `POST /chat/stream` serves the orchestrator's event stream as
//! server-sent events; `POST /chat` aggregates the same pipeline into one
//! JSON payload. `GET /health` reports per-collection reachability.

use std::convert::Infallible;

use axum::{
    extract::{Json, State},
    http::{HeaderValue, Method, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sodam_core::{
    ActionSuggestion, EvaluationRecord, Query, SourceReference, StreamEvent, TerminalState,
};

use crate::metrics::metrics_handler;
use crate::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        .route("/chat/stream", post(chat_stream))
        .route("/chat", post(chat))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(origin, "invalid CORS origin");
                None
            })
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("no CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    state: TerminalState,
    answer: String,
    sources: Vec<SourceReference>,
    actions: Vec<ActionSuggestion>,
    evaluation: Option<EvaluationRecord>,
}

fn terminal_label(state: TerminalState) -> &'static str {
    match state {
        TerminalState::Done => "done",
        TerminalState::Refused => "refused",
        TerminalState::Insufficient => "insufficient",
        TerminalState::Failed => "failed",
    }
}

/// Run one query through the engine on a detached task, returning the event
/// receiver. Session memory is recorded once the answer is final.
fn spawn_query(
    state: &AppState,
    request: ChatRequest,
) -> mpsc::Receiver<StreamEvent> {
    let (tx, rx) = mpsc::channel(64);

    let engine = state.engine.clone();
    let sessions = state.sessions.clone();
    let conversation_id = request.conversation_id;
    let memory = conversation_id
        .as_deref()
        .map(|id| sessions.memory(id))
        .unwrap_or_else(|| sessions.memory(""));
    let query = Query::new(request.message);
    let question = query.text.clone();

    tokio::spawn(async move {
        let (terminal, answer) = engine.handle(query, &memory, tx).await;
        metrics::counter!("sodam_queries_total", "state" => terminal_label(terminal))
            .increment(1);

        if terminal == TerminalState::Done {
            if let (Some(id), Some(answer)) = (conversation_id, answer) {
                sessions.record(&id, &question, &answer.text);
            }
        }
    });

    rx
}

/// `POST /chat/stream` — server-sent event stream.
async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = spawn_query(&state, request);

    let stream = ReceiverStream::new(rx).map(|event| {
        let name = event.event_name();
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(name).data(data))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// `POST /chat` — the non-streaming variant; same payload as the aggregated
/// stream.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<serde_json::Value>)> {
    let mut rx = spawn_query(&state, request);

    let mut answer = String::new();
    let mut sources = Vec::new();
    let mut actions = Vec::new();
    let mut evaluation = None;
    let mut terminal = None;

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Token { content } => answer.push_str(&content),
            StreamEvent::Source { source } => sources.push(source),
            StreamEvent::Action { action } => actions.push(action),
            StreamEvent::Done { state, evaluation: record } => {
                terminal = Some(state);
                evaluation = Some(record);
            }
            StreamEvent::Error { kind, message } => {
                return Err((
                    StatusCode::BAD_GATEWAY,
                    Json(serde_json::json!({ "error": kind, "message": message })),
                ));
            }
        }
    }

    let state = terminal.ok_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "internal", "message": "stream closed without done" })),
        )
    })?;

    Ok(Json(ChatResponse { state, answer, sources, actions, evaluation }))
}

/// `GET /health` — per-collection reachability.
///
/// `degraded` means at least one collection is reachable but not all.
async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let mut components = serde_json::Map::new();
    let mut reachable = 0usize;
    let mut total = 0usize;

    for tag in &state.settings.domains.priority {
        let collection = state.settings.domains.collection(*tag);
        total += 1;
        match state.store.count(collection).await {
            Ok(count) => {
                reachable += 1;
                components.insert(
                    collection.to_string(),
                    serde_json::json!({ "status": "ok", "chunks": count }),
                );
            }
            Err(error) => {
                components.insert(
                    collection.to_string(),
                    serde_json::json!({ "status": "unreachable", "error": error.to_string() }),
                );
            }
        }
    }

    let (status, code) = if reachable == total {
        ("healthy", StatusCode::OK)
    } else if reachable > 0 {
        ("degraded", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        code,
        Json(serde_json::json!({ "status": status, "components": components })),
    )
}
