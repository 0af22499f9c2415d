//! # Controller Metrics
//!
//! Metrics for the injection controller: injections, requeues, dropped keys,
//! config map writes and the deployment cache.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge};
use std::sync::LazyLock;

// Injection metrics
static INJECTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "heimdall_injections_total",
        "Total number of deployments successfully injected",
    )
    .expect("Failed to create INJECTIONS_TOTAL metric - this should never happen")
});

static INJECTION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "heimdall_injection_errors_total",
            "Total number of failed injection attempts by error class",
        ),
        &["class"],
    )
    .expect("Failed to create INJECTION_ERRORS_TOTAL metric - this should never happen")
});

static INJECTION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "heimdall_injection_duration_seconds",
            "Duration of one injection pipeline run in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create INJECTION_DURATION metric - this should never happen")
});

// Config map metrics
static CONFIGMAP_WRITES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "heimdall_configmap_writes_total",
            "Total number of materialized config map writes by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create CONFIGMAP_WRITES_TOTAL metric - this should never happen")
});

static CONFIGMAP_CLEANUPS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "heimdall_configmap_cleanups_total",
        "Total number of materialized config maps deleted after their deployment was removed",
    )
    .expect("Failed to create CONFIGMAP_CLEANUPS_TOTAL metric - this should never happen")
});

// Retry metrics
static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "heimdall_requeues_total",
            "Total number of reconcile requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static DROPPED_KEYS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "heimdall_dropped_keys_total",
            "Total number of deployments given up on without success by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create DROPPED_KEYS_TOTAL metric - this should never happen")
});

static WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "heimdall_watch_events_total",
            "Total number of deployment events observed by type",
        ),
        &["event"],
    )
    .expect("Failed to create WATCH_EVENTS_TOTAL metric - this should never happen")
});

static CACHED_DEPLOYMENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "heimdall_cached_deployments",
        "Current number of deployments held in the reflector store",
    )
    .expect("Failed to create CACHED_DEPLOYMENTS metric - this should never happen")
});

/// Register controller metrics with the registry
pub(crate) fn register_controller_metrics() -> Result<()> {
    REGISTRY.register(Box::new(INJECTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INJECTION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INJECTION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CONFIGMAP_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONFIGMAP_CLEANUPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DROPPED_KEYS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WATCH_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CACHED_DEPLOYMENTS.clone()))?;
    Ok(())
}

// Public functions for controller metrics

pub fn increment_injections() {
    INJECTIONS_TOTAL.inc();
}

pub fn increment_injection_errors(class: &str) {
    INJECTION_ERRORS_TOTAL.with_label_values(&[class]).inc();
}

pub fn observe_injection_duration(duration: f64) {
    INJECTION_DURATION.observe(duration);
}

pub fn increment_configmap_writes(operation: &str) {
    CONFIGMAP_WRITES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_configmap_cleanups() {
    CONFIGMAP_CLEANUPS_TOTAL.inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_dropped_keys(reason: &str) {
    DROPPED_KEYS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_watch_events(event: &str) {
    WATCH_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

pub fn set_cached_deployments(count: usize) {
    CACHED_DEPLOYMENTS.set(i64::try_from(count).unwrap_or(i64::MAX));
}
