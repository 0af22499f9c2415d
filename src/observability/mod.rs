//! # Observability
//!
//! Prometheus metrics and the HTTP server exposing them together with the
//! liveness and readiness probes.

pub mod metrics;
pub mod server;

pub use server::{start_server, ServerState};

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` wins when set; otherwise `default_directive` (for example
/// `heimdall=info`) applies.
pub fn init_tracing(default_directive: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .init();
}
