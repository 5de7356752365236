//! HTTP server for the sodam advisory engine
//!
//! Exposes the streaming chat endpoint, its non-streaming variant, health,
//! and Prometheus metrics. All engine wiring lives in `state`; handlers are
//! thin adapters between HTTP and the orchestrator's event stream.

pub mod http;
pub mod metrics;
pub mod session;
pub mod state;

pub use http::create_router;
pub use metrics::init_metrics;
pub use session::SessionManager;
pub use state::AppState;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("engine initialization failed: {0}")]
    Init(String),

    #[error("configuration error: {0}")]
    Config(String),
}
