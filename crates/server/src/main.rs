//! sodam server entry point

use std::net::SocketAddr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use sodam_config::{load_settings, RuntimeEnvironment, Settings};
use sodam_server::{create_router, init_metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("SODAM_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(error) => {
            // Missing secrets outside development are a startup failure, not
            // something to degrade around.
            if env.as_deref().map_or(false, |e| e != "development") {
                anyhow::bail!("failed to load configuration: {error}");
            }
            eprintln!("warning: failed to load config: {error}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        config = env.as_deref().unwrap_or("default"),
        "starting sodam server"
    );

    init_metrics();

    let state = if settings.environment == RuntimeEnvironment::Development
        && settings.llm.api_key.is_empty()
    {
        // No credentials at all: run fully in-process so the engine can be
        // exercised without external services.
        tracing::warn!("no LLM credentials; using the in-memory development profile");
        AppState::build_in_memory(settings.clone())?
    } else {
        AppState::build(settings.clone()).await?
    };

    state.sessions.start_sweeper(Duration::from_secs(60));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server address: {e}"))?;

    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sodam=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
