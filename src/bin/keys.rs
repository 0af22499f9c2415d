//! # Heimdall Key Service
//!
//! Serves per-namespace RSA key pairs over gRPC (`heimdall.keys.v1`).
//! Key pairs are stored as `heimdall` secrets in their namespace and created
//! on the first public key request.

use anyhow::{Context, Result};
use heimdall::cluster::KubeCluster;
use heimdall::config::{KeysConfig, ServerConfig};
use heimdall::constants::DEFAULT_KEYS_METRICS_PORT;
use heimdall::keys::{serve, KeyManager, KeysGrpcService};
use heimdall::observability::{metrics, ServerState};
use heimdall::runtime::{init_process, shutdown_signal, start_probe_server};
use kube::Client;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_process("Heimdall key service", "heimdall=info")?;

    let config = KeysConfig::from_env()?;
    info!(
        listen_address = %config.listen_address,
        key_bits = config.key_bits,
        "Loaded key service configuration"
    );

    metrics::register_keys_metrics()?;

    let server_state = Arc::new(ServerState::default());
    start_probe_server(&ServerConfig::from_env(DEFAULT_KEYS_METRICS_PORT), &server_state).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let manager = KeyManager::new(Arc::new(KubeCluster::new(client)), config.key_bits);
    let service = KeysGrpcService::new(Arc::new(manager));

    server_state.mark_serving();
    serve(config.listen_address, service, shutdown_signal())
        .await
        .context("Key service failed")?;
    server_state.mark_not_serving();
    Ok(())
}
