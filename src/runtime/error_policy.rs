//! # Error Policy
//!
//! Classification of watch stream errors and the matching restart strategy,
//! plus the requeue policy applied to failed injections.

use crate::cluster::ObjectKey;
use crate::constants::{self, MAX_PIPELINE_REQUEUES};
use crate::controller::reconciler::{report_drop, report_retry};
use crate::controller::{InjectionError, Reconciler};
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::controller::Action;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Decide what happens to a deployment whose injection failed
///
/// Retryable failures are requeued after a Fibonacci delay until the
/// deployment has spent its retry budget. Everything else is logged with a
/// remediation hint and left alone until the deployment changes again.
pub fn handle_injection_error(
    deployment: Arc<Deployment>,
    error: &InjectionError,
    ctx: Arc<Reconciler>,
) -> Action {
    let class = error.class();
    metrics::increment_injection_errors(class.as_str());

    let Some(key) = ObjectKey::from_meta(&deployment.metadata) else {
        report_drop(error, 0);
        return Action::await_change();
    };

    let retries = ctx.retry_count(&key);
    if class.is_retryable() && retries < MAX_PIPELINE_REQUEUES {
        let delay = ctx.record_retry(&key);
        report_retry(error, retries + 1, delay);
        return Action::requeue(delay);
    }

    report_drop(error, retries);
    ctx.forget(&key);
    Action::await_change()
}

/// What went wrong with the watch, judged from its error text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// 401: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old, a relist fixes it
    Expired,
    /// 429: API server storage (re)initializing
    Throttled,
    /// 404: object vanished between list and watch
    NotFound,
    Other,
}

impl WatchErrorKind {
    pub fn classify(error_string: &str) -> Self {
        let is_401 = error_string.contains("401")
            || error_string.contains("Unauthorized")
            || error_string.contains("WatchFailed");
        let is_410 = error_string.contains("410")
            || error_string.contains("too old resource version")
            || error_string.contains("Expired")
            || error_string.contains("Gone");
        let is_429 = error_string.contains("429")
            || error_string.contains("storage is (re)initializing")
            || error_string.contains("TooManyRequests");
        let is_not_found = error_string.contains("ObjectNotFound")
            || (error_string.contains("404") && error_string.contains("not found"));

        if is_401 {
            Self::Unauthorized
        } else if is_410 {
            Self::Expired
        } else if is_429 {
            Self::Throttled
        } else if is_not_found {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}

/// Handle a watch stream error
///
/// Sleeps as appropriate for the error kind. Returns `None` when the watch
/// should be restarted and `Some(())` when the stream can keep going.
/// `backoff` holds the current throttling delay in milliseconds and doubles
/// (up to `max_backoff_ms`) on every consecutive 429.
pub async fn handle_watch_stream_error(
    error_string: &str,
    backoff: &Arc<AtomicU64>,
    max_backoff_ms: u64,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match WatchErrorKind::classify(error_string) {
        WatchErrorKind::Unauthorized => {
            error!("❌ Watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired");
            error!("🔍 SRE Diagnostics:");
            error!("   1. Verify the ClusterRole still grants list/watch on deployments:");
            error!("      kubectl auth can-i watch deployments --as=system:serviceaccount:heimdall:heimdall-injector --all-namespaces");
            error!("   2. Verify the ServiceAccount still exists:");
            error!("      kubectl get sa heimdall-injector -n heimdall");
            error!("   3. If RBAC was recently changed, restart the injector pod");
            warn!(
                "⏳ Waiting {}s before retrying watch (RBAC may need time to propagate)...",
                constants::DEFAULT_WATCH_RESTART_DELAY_SECS
            );
            tokio::time::sleep(Duration::from_secs(constants::DEFAULT_WATCH_RESTART_DELAY_SECS))
                .await;
            None
        }
        WatchErrorKind::Expired => {
            warn!("Watch resource version expired (410) - this is normal during pod restarts, watch will restart");
            None
        }
        WatchErrorKind::Throttled => {
            let current_backoff = backoff.load(Ordering::Relaxed);
            warn!(
                "API server storage reinitializing (429), backing off for {}ms before restart...",
                current_backoff
            );
            tokio::time::sleep(Duration::from_millis(current_backoff)).await;
            let new_backoff = current_backoff.saturating_mul(2).min(max_backoff_ms);
            backoff.store(new_backoff, Ordering::Relaxed);
            None
        }
        WatchErrorKind::NotFound => {
            warn!("Resource not found (likely deleted), continuing watch...");
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Watch stream error: {}", error_string);
            tokio::time::sleep(Duration::from_secs(constants::DEFAULT_WATCH_RESTART_DELAY_SECS))
                .await;
            None
        }
    }
}
