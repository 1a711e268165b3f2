//! Prometheus metrics for ldap-sync-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for bulk sync passes by outcome.
pub static SYNC_PASSES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ldap_sync_passes_total",
        "Total number of bulk sync passes",
        &["status"]
    )
    .expect("Failed to register SYNC_PASSES")
});

/// Counter for bulk sync item writes by action and outcome.
pub static SYNC_ITEMS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ldap_sync_items_total",
        "Total number of identity records created or deleted by bulk sync",
        &["action", "status"]
    )
    .expect("Failed to register SYNC_ITEMS")
});

/// Counter for per-identity reconcile passes by outcome.
pub static RECONCILES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ldap_sync_reconciles_total",
        "Total number of per-identity reconcile passes",
        &["outcome"]
    )
    .expect("Failed to register RECONCILES")
});

/// Histogram for directory query duration by operation.
pub static DIRECTORY_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "ldap_sync_directory_query_duration_seconds",
        "Directory query duration in seconds",
        &["operation"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register DIRECTORY_QUERY_DURATION")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "ldap_sync_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SYNC_PASSES);
    Lazy::force(&SYNC_ITEMS);
    Lazy::force(&RECONCILES);
    Lazy::force(&DIRECTORY_QUERY_DURATION);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a bulk sync pass.
pub fn record_sync_pass(status: &str) {
    SYNC_PASSES.with_label_values(&[status]).inc();
}

/// Record one bulk sync item write.
pub fn record_sync_item(action: &str, status: &str) {
    SYNC_ITEMS.with_label_values(&[action, status]).inc();
}

/// Record a reconcile pass.
pub fn record_reconcile(outcome: &str) {
    RECONCILES.with_label_values(&[outcome]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
