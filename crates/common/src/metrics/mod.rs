//! Metrics and observability utilities
//!
//! Prometheus-style metrics with standardized naming conventions.
//! Recording is a no-op until a recorder is installed by the binary.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all compliance loader metrics
pub const METRICS_PREFIX: &str = "compliance";

/// Register all metric descriptions
pub fn register_metrics() {
    // Reconciliation metrics
    describe_counter!(
        format!("{}_records_reconciled_total", METRICS_PREFIX),
        Unit::Count,
        "Harvested records processed, by outcome"
    );

    describe_histogram!(
        format!("{}_reconcile_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Time to reconcile one harvested record"
    );

    describe_counter!(
        format!("{}_entity_writes_total", METRICS_PREFIX),
        Unit::Count,
        "Entities created or updated in the repository"
    );

    // Gateway metrics
    describe_counter!(
        format!("{}_gateway_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Repository gateway calls, by operation and status"
    );

    describe_histogram!(
        format!("{}_gateway_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Repository gateway call latency in seconds"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

/// Helper to record one gateway call
pub fn record_gateway(operation: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_gateway_requests_total", METRICS_PREFIX),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_gateway_duration_seconds", METRICS_PREFIX),
        "operation" => operation.to_string()
    )
    .record(duration_secs);
}

/// Helper to record an entity create/update
pub fn record_write(entity: &str, action: &str) {
    counter!(
        format!("{}_entity_writes_total", METRICS_PREFIX),
        "entity" => entity.to_string(),
        "action" => action.to_string()
    )
    .increment(1);
}

/// Helper to record a finished reconciliation
pub fn record_reconcile(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_records_reconciled_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_reconcile_duration_seconds", METRICS_PREFIX)
    )
    .record(duration_secs);
}
