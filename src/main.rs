//! # Heimdall Injector
//!
//! Watches deployments in all namespaces and injects the configuration their
//! annotations point at.
//!
//! See [`heimdall::runtime`] for the startup sequence and
//! [`heimdall::controller`] for the injection pipeline.

use anyhow::Result;
use heimdall::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.client,
        init.informer,
        init.handler,
        init.reconciler,
        init.server_state,
        init.config.workers,
    )
    .await
}
