//! # Initialization
//!
//! Process startup shared by both daemons (rustls provider, tracing, build
//! info, probe server) and the wiring of the injection controller.

use crate::cluster::KubeCluster;
use crate::config::{InjectorConfig, ServerConfig};
use crate::constants::DEFAULT_METRICS_PORT;
use crate::controller::{EventHandler, FibonacciBackoff, Informer, Injector, Reconciler};
use crate::keys::GrpcKeyStore;
use crate::materializer::Materializer;
use crate::observability::{self, start_server, ServerState};
use crate::source::{HttpGitTransport, Resolver};
use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Everything the injector's watch loop needs
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Injector settings
    pub config: InjectorConfig,
    /// Reflector backed deployment cache
    pub informer: Informer,
    /// Turns watch events into reconcile and cleanup requests
    pub handler: EventHandler,
    /// Reconcile context handed to the applier
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

/// Steps every binary performs before doing real work
///
/// Installs the rustls crypto provider, sets up tracing and logs build info.
///
/// # Errors
///
/// Fails if a crypto provider was already installed.
pub fn init_process(component: &str, default_directive: &str) -> Result<()> {
    // Required for rustls 0.23+ before any TLS connection to the API server
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    observability::init_tracing(default_directive);

    info!("Starting {}", component);
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    Ok(())
}

/// Start the metrics and probe server and wait until it accepts connections
///
/// # Errors
///
/// Fails if the server task dies or does not become ready in time.
pub async fn start_probe_server(
    config: &ServerConfig,
    server_state: &Arc<ServerState>,
) -> Result<JoinHandle<()>> {
    let state = Arc::clone(server_state);
    let port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, state).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(config, server_state, &server_handle).await?;
    Ok(server_handle)
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    config: &ServerConfig,
    server_state: &Arc<ServerState>,
    server_handle: &JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Wire the controller against the cluster and the key service
///
/// # Errors
///
/// Fails if the HTTP client cannot be built or the key service address is
/// invalid.
pub fn build_controller(
    client: &Client,
    config: &InjectorConfig,
) -> Result<(Arc<Reconciler>, EventHandler, Informer)> {
    let cluster = Arc::new(KubeCluster::new(client.clone()));

    let key_store = GrpcKeyStore::connect_lazy(&config.keys_address, config.keys_connect_timeout)
        .context("Invalid HEIMDALL_KEYS_ADDRESS")?;
    let transport = HttpGitTransport::new(config.git_timeout)
        .context("Failed to set up the repository transport")?;

    let materializer = Materializer::new(Arc::new(key_store), Arc::clone(&cluster) as _);
    let injector = Injector::new(
        Arc::new(Resolver::new(Arc::new(transport))),
        materializer,
        Arc::clone(&cluster) as _,
        Arc::clone(&cluster) as _,
        cluster,
    )
    .with_credentials(
        config.git_credentials.clone(),
        config.git_credential_hosts.clone(),
    );

    let reconciler = Reconciler::new(
        injector,
        FibonacciBackoff::new(config.retry_min, config.retry_max),
    );
    let handler = EventHandler::new(config.configmap_cleanup);

    Ok((Arc::new(reconciler), handler, Informer::new()))
}

/// Initialize the injector runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Controller wiring
///
/// # Errors
///
/// Fails on invalid configuration, an unreachable cluster or a failed
/// server startup.
pub async fn initialize() -> Result<InitializationResult> {
    init_process("Heimdall injector", "heimdall=info")?;

    let config = InjectorConfig::from_env()?;
    info!(
        keys_address = %config.keys_address,
        workers = config.workers,
        configmap_cleanup = config.configmap_cleanup,
        authenticated_fetch = config.git_credentials.is_some(),
        credential_hosts = %config.git_credential_hosts,
        "Loaded injector configuration"
    );

    observability::metrics::register_injector_metrics()?;

    let server_state = Arc::new(ServerState::default());
    start_probe_server(&ServerConfig::from_env(DEFAULT_METRICS_PORT), &server_state).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let (reconciler, handler, informer) = build_controller(&client, &config)?;

    info!("Injector initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        config,
        informer,
        handler,
        reconciler,
        server_state,
    })
}
