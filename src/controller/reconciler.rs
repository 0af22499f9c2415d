//! # Reconciler
//!
//! Context and reconcile function handed to `kube_runtime`'s applier, plus
//! the config map cleanup that runs beside it.
//!
//! Retry policy:
//!
//! - pipeline failures of a retryable class are requeued up to
//!   [`MAX_PIPELINE_REQUEUES`] times with a [`FibonacciBackoff`] delay
//! - anything else, or a spent budget, is dropped with an error log and the
//!   deployment stays pending until its injection marker changes
//!
//! Retry counts live here, keyed by deployment, so one failing deployment
//! does not slow down the others.

use super::backoff::FibonacciBackoff;
use super::error::InjectionError;
use super::injector::Injector;
use super::state::InjectionState;
use crate::cluster::ObjectKey;
use crate::constants::MAX_PIPELINE_REQUEUES;
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info_span, warn, Instrument};

/// Shared state of every reconcile call
pub struct Reconciler {
    injector: Injector,
    backoff: FibonacciBackoff,
    retries: Mutex<HashMap<ObjectKey, u32>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("injector", &self.injector)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(injector: Injector, backoff: FibonacciBackoff) -> Self {
        Self {
            injector,
            backoff,
            retries: Mutex::new(HashMap::new()),
        }
    }

    fn retries(&self) -> MutexGuard<'_, HashMap<ObjectKey, u32>> {
        // The map only holds counters, a panic elsewhere cannot leave it torn.
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retries already spent on `key`
    pub fn retry_count(&self, key: &ObjectKey) -> u32 {
        self.retries().get(key).copied().unwrap_or(0)
    }

    /// Count one more retry of `key` and return the delay before it
    pub fn record_retry(&self, key: &ObjectKey) -> Duration {
        let mut retries = self.retries();
        let count = retries.entry(key.clone()).or_insert(0);
        let delay = self.backoff.delay_for(*count);
        *count = count.saturating_add(1);
        delay
    }

    /// Reset the retry budget of `key`
    pub fn forget(&self, key: &ObjectKey) {
        self.retries().remove(key);
    }

    /// Delete the config map left behind by a deleted deployment
    ///
    /// Retryable failures are retried in place with the same budget and
    /// backoff as injections.
    pub async fn cleanup(&self, target: ObjectKey) {
        let span = info_span!("controller.cleanup", config_map = %target);
        async {
            let mut attempt = 0;
            loop {
                let Err(err) = self.injector.cleanup(&target).await else {
                    return;
                };
                let class = err.class();
                metrics::increment_injection_errors(class.as_str());
                if class.is_retryable() && attempt < MAX_PIPELINE_REQUEUES {
                    let delay = self.backoff.delay_for(attempt);
                    attempt += 1;
                    report_retry(&err, attempt, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                report_drop(&err, attempt);
                return;
            }
        }
        .instrument(span)
        .await;
    }
}

/// Log and count a failure that will be retried after `delay`
pub(crate) fn report_retry(err: &InjectionError, attempt: u32, delay: Duration) {
    let class = err.class();
    let next_attempt = chrono::TimeDelta::from_std(delay)
        .map(|d| (chrono::Utc::now() + d).to_rfc3339())
        .unwrap_or_default();
    warn!(
        error = %err,
        class = class.as_str(),
        attempt,
        ?delay,
        next_attempt = %next_attempt,
        "🔄 Injection failed, requeueing"
    );
    metrics::increment_requeues_total(class.as_str());
}

/// Log and count a failure that will not be retried
pub(crate) fn report_drop(err: &InjectionError, retries: u32) {
    let class = err.class();
    error!(
        error = %err,
        class = class.as_str(),
        retries,
        "❌ Injection failed, dropping key"
    );
    error!("🔍 Remediation: {}", class.remediation());
    metrics::increment_dropped_keys(class.as_str());
}

/// Inject the configuration of a pending deployment
///
/// Deployments in any other state are left alone. Failures are returned to
/// the applier, which hands them to the error policy.
///
/// # Errors
///
/// Returns the [`InjectionError`] of the failed pipeline step.
pub async fn reconcile(
    deployment: Arc<Deployment>,
    ctx: Arc<Reconciler>,
) -> Result<Action, InjectionError> {
    let key = ObjectKey::from_meta(&deployment.metadata)
        .ok_or(InjectionError::InvalidWorkload("a name and namespace"))?;
    let span = info_span!("controller.inject", deployment = %key);

    async move {
        let reference = match InjectionState::of(&deployment) {
            InjectionState::PendingInjection(reference) => reference,
            state => {
                debug!(state = state.as_str(), "Nothing to inject");
                ctx.forget(&key);
                return Ok(Action::await_change());
            }
        };

        let start = Instant::now();
        let result = ctx.injector.inject(&deployment, &reference).await;
        metrics::observe_injection_duration(start.elapsed().as_secs_f64());
        result?;

        metrics::increment_injections();
        ctx.forget(&key);
        Ok(Action::await_change())
    }
    .instrument(span)
    .await
}
