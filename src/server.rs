//! HTTP front end: WebSocket upgrades and the health probe.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::adapter;
use crate::config::{ScribeConfig, ServerConfig};
use crate::error::{Result, ScribeError};
use crate::health::{HealthResponse, HealthStatus};
use crate::registry::SessionRegistry;
use crate::shutdown::Shutdown;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
struct AppState {
    registry: Arc<SessionRegistry>,
    shutdown: Shutdown,
    outbound_queue: usize,
    started: Instant,
}

/// Build the application router.
fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve WebSocket and health endpoints until shutdown.
pub async fn run_server(
    server_config: ServerConfig,
    config: &ScribeConfig,
    registry: Arc<SessionRegistry>,
    shutdown: Shutdown,
) -> Result<()> {
    let state = AppState {
        registry,
        shutdown: shutdown.clone(),
        outbound_queue: config.session.outbound_queue,
        started: Instant::now(),
    };

    let listener = TcpListener::bind(server_config.bind_addr).await?;
    info!(addr = %server_config.bind_addr, "Scribe server listening");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await
        .map_err(|e| ScribeError::Network(e.to_string()))?;

    Ok(())
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.in_progress() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let registry = state.registry.clone();
    let outbound_queue = state.outbound_queue;
    ws.on_upgrade(move |socket| adapter::handle_socket(socket, registry, outbound_queue))
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let status = if state.shutdown.in_progress() {
        HealthStatus::ShuttingDown
    } else {
        HealthStatus::Healthy
    };
    let sessions = state.registry.stats().await.sessions;
    let response = HealthResponse::new(status, state.started, sessions);

    let code = StatusCode::from_u16(status.to_status_code()).unwrap_or(StatusCode::OK);
    (code, Json(response)).into_response()
}
