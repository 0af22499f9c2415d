//! # Metrics and Probe Server
//!
//! Small axum server shared by both daemons:
//!
//! - `GET /metrics` - Prometheus text format
//! - `GET /healthz` - liveness, 200 while the process serves HTTP
//! - `GET /readyz` - readiness, 200 once the component reported ready

use crate::observability::metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared server state for health checks
#[derive(Debug, Default)]
pub struct ServerState {
    /// Set once the HTTP listener is bound
    pub is_ready: Arc<AtomicBool>,
    /// Set once the component (informer synced, gRPC listening) can do work
    pub is_serving: Arc<AtomicBool>,
}

impl ServerState {
    pub fn mark_serving(&self) {
        self.is_serving.store(true, Ordering::Relaxed);
    }

    pub fn mark_not_serving(&self) {
        self.is_serving.store(false, Ordering::Relaxed);
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        }
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_serving.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Routes of the metrics and probe server
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Serve on an already bound listener, marking the state ready first
///
/// # Errors
///
/// Returns an error if the server stops with an I/O failure.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    state.is_ready.store(true, Ordering::Relaxed);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Bind `0.0.0.0:<port>` and serve metrics and probes
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn start_server(port: u16, state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics and probe server listening on {}", addr);
    serve_on(listener, state).await
}
