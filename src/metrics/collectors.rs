//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library code
//! and tests can record unconditionally.

use std::time::Duration;

use super::prometheus::{
    ACTIVE_WORKERS, DIRECT_RETRIES_TOTAL, JOBS_TOTAL, QUEUE_DEPTH, ROTATIONS_TOTAL,
    ROTATION_DURATION, VISITS_TOTAL,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one finished task.
    ///
    /// # Arguments
    ///
    /// * `strategy` - Strategy name (e.g., "proxy_pool", "multi_device")
    /// * `outcome` - Outcome label (e.g., "success", "retryable")
    pub fn record_visit(&self, strategy: &str, outcome: &str) {
        if let Some(visits) = VISITS_TOTAL.get() {
            visits.with_label_values(&[strategy, outcome]).inc();
        }

        tracing::trace!(strategy, outcome, "Recorded visit metric");
    }

    pub fn record_direct_retry(&self) {
        if let Some(retries) = DIRECT_RETRIES_TOTAL.get() {
            retries.inc();
        }
    }

    /// Record a device rotation attempt.
    ///
    /// `changed` is `None` for a failed rotation.
    pub fn record_rotation(&self, changed: Option<bool>, duration: Duration) {
        let result = match changed {
            Some(true) => "changed",
            Some(false) => "unchanged",
            None => "failed",
        };

        if let Some(rotations) = ROTATIONS_TOTAL.get() {
            rotations.with_label_values(&[result]).inc();
        }
        if let Some(histogram) = ROTATION_DURATION.get() {
            histogram.observe(duration.as_secs_f64());
        }
    }

    /// Record a job reaching a terminal state.
    pub fn record_job_finished(&self, status: &str) {
        if let Some(jobs) = JOBS_TOTAL.get() {
            jobs.with_label_values(&[status]).inc();
        }
    }

    pub fn update_queue_depth(&self, depth: usize) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.set(depth as f64);
        }
    }

    pub fn update_workers(&self, count: usize) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.set(count as f64);
        }
    }
}
