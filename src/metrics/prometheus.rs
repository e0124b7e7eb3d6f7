//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by visit-fleet and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all visit-fleet metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Finished tasks, labeled by strategy and outcome.
pub static VISITS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Direct retries after a proxy connectivity failure.
pub static DIRECT_RETRIES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Device rotations, labeled by result (changed, unchanged, failed).
pub static ROTATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock duration of device rotations in seconds.
pub static ROTATION_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Jobs that reached a terminal state, labeled by status.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of tasks waiting in the queue.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Number of workers currently running a visit.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once; later calls leave the first registry in
/// place.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let visits_total = CounterVec::new(
        Opts::new("visit_fleet_visits_total", "Total number of finished tasks"),
        &["strategy", "outcome"],
    )?;

    let direct_retries_total = Counter::new(
        "visit_fleet_direct_retries_total",
        "Direct retries after a proxy connectivity failure",
    )?;

    let rotations_total = CounterVec::new(
        Opts::new("visit_fleet_rotations_total", "Total device rotations"),
        &["result"],
    )?;

    let rotation_duration = Histogram::with_opts(
        HistogramOpts::new(
            "visit_fleet_rotation_duration_seconds",
            "Device rotation duration in seconds",
        )
        .buckets(vec![5.0, 10.0, 15.0, 20.0, 30.0, 60.0]),
    )?;

    let jobs_total = CounterVec::new(
        Opts::new("visit_fleet_jobs_total", "Jobs that reached a terminal state"),
        &["status"],
    )?;

    let queue_depth = Gauge::new("visit_fleet_queue_depth", "Number of queued tasks")?;
    let active_workers = Gauge::new("visit_fleet_active_workers", "Number of active workers")?;

    registry.register(Box::new(visits_total.clone()))?;
    registry.register(Box::new(direct_retries_total.clone()))?;
    registry.register(Box::new(rotations_total.clone()))?;
    registry.register(Box::new(rotation_duration.clone()))?;
    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = VISITS_TOTAL.set(visits_total);
    let _ = DIRECT_RETRIES_TOTAL.set(direct_retries_total);
    let _ = ROTATIONS_TOTAL.set(rotations_total);
    let _ = ROTATION_DURATION.set(rotation_duration);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics();
        let second = init_metrics();
        assert!(first.is_ok() || REGISTRY.get().is_some());
        assert!(second.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_init() {
        let _ = init_metrics();
        if let Some(visits) = VISITS_TOTAL.get() {
            visits.with_label_values(&["proxy_pool", "success"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("visit_fleet_visits_total"));
    }
}
