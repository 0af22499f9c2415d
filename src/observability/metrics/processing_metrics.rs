//! # Processing Metrics
//!
//! Metrics for pipeline stages: repository fetches and value decryption.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec};
use std::sync::LazyLock;

// Repository fetch metrics
static SOURCE_FETCH_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "heimdall_source_fetch_total",
        "Total number of configuration repository fetches (attempts)",
    )
    .expect("Failed to create SOURCE_FETCH_TOTAL metric - this should never happen")
});

static SOURCE_FETCH_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "heimdall_source_fetch_errors_total",
            "Total number of failed configuration fetches by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create SOURCE_FETCH_ERRORS_TOTAL metric - this should never happen")
});

static SOURCE_FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "heimdall_source_fetch_duration_seconds",
            "Duration of configuration repository fetches in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("Failed to create SOURCE_FETCH_DURATION metric - this should never happen")
});

// Decryption metrics
static VALUES_DECRYPTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "heimdall_values_decrypted_total",
        "Total number of configuration values decrypted",
    )
    .expect("Failed to create VALUES_DECRYPTED_TOTAL metric - this should never happen")
});

static DECRYPTION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "heimdall_decryption_errors_total",
        "Total number of configuration values that failed to decrypt",
    )
    .expect("Failed to create DECRYPTION_ERRORS_TOTAL metric - this should never happen")
});

/// Register processing metrics with the registry
pub(crate) fn register_processing_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SOURCE_FETCH_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOURCE_FETCH_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOURCE_FETCH_DURATION.clone()))?;
    REGISTRY.register(Box::new(VALUES_DECRYPTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DECRYPTION_ERRORS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_source_fetch_total() {
    SOURCE_FETCH_TOTAL.inc();
}

pub fn increment_source_fetch_errors(reason: &str) {
    SOURCE_FETCH_ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn observe_source_fetch_duration(duration: f64) {
    SOURCE_FETCH_DURATION.observe(duration);
}

pub fn increment_values_decrypted(count: usize) {
    VALUES_DECRYPTED_TOTAL.inc_by(u64::try_from(count).unwrap_or(u64::MAX));
}

pub fn increment_decryption_errors() {
    DECRYPTION_ERRORS_TOTAL.inc();
}
