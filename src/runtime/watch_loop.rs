//! # Watch Loop
//!
//! Feeds the deployment watch through the informer into `kube_runtime`'s
//! applier, runs config map cleanups beside it and handles shutdown.
//!
//! Readiness is reported once the reflector store holds its first complete
//! list; the applier itself holds reconciles back until then. On
//! SIGINT/SIGTERM the watch stream ends, reconciles already running finish,
//! then the process exits.

use super::error_policy::{handle_injection_error, handle_watch_stream_error};
use super::shutdown::shutdown_signal;
use crate::cluster::ObjectKey;
use crate::constants::{DEFAULT_RETRY_MIN_MS, DEFAULT_WATCH_MAX_BACKOFF_MS};
use crate::controller::{reconcile, EventHandler, InjectionError, Informer, QueueKey, Reconciler};
use crate::observability::ServerState;
use anyhow::Result;
use futures::channel::mpsc;
use futures::{future, stream, Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use kube_runtime::controller::{self, applier, Action};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::watcher;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type ReconcileResult =
    Result<(ObjectRef<Deployment>, Action), controller::Error<InjectionError, Infallible>>;

fn log_reconcile_result(result: ReconcileResult) -> future::Ready<()> {
    match result {
        Ok((obj, _)) => debug!(deployment = %obj, "Reconciled"),
        Err(controller::Error::ObjectNotFound(obj)) => {
            debug!(deployment = %obj, "Deployment no longer exists, skipping");
        }
        // Already logged by the error policy.
        Err(controller::Error::ReconcilerFailed(_, obj)) => {
            debug!(deployment = %obj, "Reconcile failed");
        }
        Err(e) => warn!(error = %e, "Controller error"),
    }
    future::ready(())
}

/// Drive injections from a stream of deployment watch events
///
/// Returns once `events` has ended and every reconcile and cleanup it caused
/// has finished. Requeues that are still waiting at that point are dropped.
pub async fn run_controller<S>(
    events: S,
    mut informer: Informer,
    handler: EventHandler,
    reconciler: Arc<Reconciler>,
    concurrency: u16,
) where
    S: Stream<Item = watcher::Event<Deployment>> + Send + 'static,
{
    let store = informer.store();
    let (cleanup_tx, cleanup_rx) = mpsc::unbounded::<ObjectKey>();

    let triggers = events
        .flat_map(move |event| stream::iter(informer.apply(&event)))
        .filter_map(move |event| {
            let request = match handler.handle(&event) {
                Some(QueueKey::Workload(key)) => Some(Ok::<_, Infallible>(
                    ObjectRef::<Deployment>::new(&key.name).within(&key.namespace),
                )),
                Some(QueueKey::Cleanup(target)) => {
                    if cleanup_tx.unbounded_send(target).is_err() {
                        warn!("Cleanup channel closed, config map left behind");
                    }
                    None
                }
                None => None,
            };
            future::ready(request)
        });

    let injections = applier(
        |deployment, ctx| Box::pin(reconcile(deployment, ctx)),
        handle_injection_error,
        Arc::clone(&reconciler),
        store,
        triggers,
        controller::Config::default().concurrency(concurrency),
    )
    .for_each(log_reconcile_result);

    let cleanups = cleanup_rx.for_each_concurrent(usize::from(concurrency.max(1)), |target| {
        let reconciler = Arc::clone(&reconciler);
        async move { reconciler.cleanup(target).await }
    });

    future::join(injections, cleanups).await;
}

/// Watch deployments in all namespaces, restarting the watch after errors
fn watch_deployments(client: Client) -> impl Stream<Item = watcher::Event<Deployment>> + Send {
    let deployments: Api<Deployment> = Api::all(client);
    let backoff = Arc::new(AtomicU64::new(DEFAULT_RETRY_MIN_MS));

    watcher(deployments, watcher::Config::default()).filter_map(move |item| {
        let backoff = Arc::clone(&backoff);
        async move {
            match item {
                Ok(event) => {
                    backoff.store(DEFAULT_RETRY_MIN_MS, Ordering::Relaxed);
                    Some(event)
                }
                Err(e) => {
                    // The watcher relists on its own after an error.
                    let error_string = e.to_string();
                    handle_watch_stream_error(&error_string, &backoff, DEFAULT_WATCH_MAX_BACKOFF_MS)
                        .await;
                    None
                }
            }
        }
    })
}

/// Run the injector until a shutdown signal arrives
#[allow(
    clippy::missing_errors_doc,
    reason = "Shares the Result signature with the other runtime entry points"
)]
pub async fn run_watch_loop(
    client: Client,
    informer: Informer,
    handler: EventHandler,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    workers: usize,
) -> Result<()> {
    let store = informer.store();
    let readiness = {
        let server_state = Arc::clone(&server_state);
        tokio::spawn(async move {
            info!("Waiting for the deployment store to sync...");
            match store.wait_until_ready().await {
                Ok(()) => {
                    info!(
                        deployments = store.len(),
                        "✅ Deployment store synced, injector is ready"
                    );
                    server_state.mark_serving();
                }
                Err(e) => error!(error = %e, "Deployment store was dropped before it synced"),
            }
        })
    };

    let events = watch_deployments(client).take_until(shutdown_signal());
    let concurrency = u16::try_from(workers.max(1)).unwrap_or(u16::MAX);
    info!(concurrency, "Starting injection controller");
    run_controller(events, informer, handler, reconciler, concurrency).await;

    server_state.mark_not_serving();
    readiness.abort();
    info!("Injection controller stopped");
    Ok(())
}
