//! # Key Service Metrics
//!
//! Metrics for the key service: requests by operation and outcome, key pair
//! creation and generation latency.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec};
use std::sync::LazyLock;

static KEY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "heimdall_key_requests_total",
            "Total number of key requests by operation and outcome",
        ),
        &["operation", "outcome"],
    )
    .expect("Failed to create KEY_REQUESTS_TOTAL metric - this should never happen")
});

static KEY_PAIRS_CREATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "heimdall_key_pairs_created_total",
        "Total number of namespace key pairs created",
    )
    .expect("Failed to create KEY_PAIRS_CREATED_TOTAL metric - this should never happen")
});

static KEY_CREATE_RACES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "heimdall_key_create_races_total",
        "Total number of key pair creations that lost a concurrent create and re-read the stored pair",
    )
    .expect("Failed to create KEY_CREATE_RACES_TOTAL metric - this should never happen")
});

static KEYGEN_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "heimdall_keygen_duration_seconds",
            "Duration of RSA key pair generation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create KEYGEN_DURATION metric - this should never happen")
});

/// Register key service metrics with the registry
pub(crate) fn register_key_service_metrics() -> Result<()> {
    REGISTRY.register(Box::new(KEY_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEY_PAIRS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEY_CREATE_RACES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEYGEN_DURATION.clone()))?;
    Ok(())
}

pub fn increment_key_requests(operation: &str, outcome: &str) {
    KEY_REQUESTS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn increment_key_pairs_created() {
    KEY_PAIRS_CREATED_TOTAL.inc();
}

pub fn increment_key_create_races() {
    KEY_CREATE_RACES_TOTAL.inc();
}

pub fn observe_keygen_duration(duration: f64) {
    KEYGEN_DURATION.observe(duration);
}
