//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks finished visits by strategy and outcome, device rotations, job
//! terminations, queue depth, and active workers.
//!
//! # Example
//!
//! ```ignore
//! use visit_fleet::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_visit("proxy_pool", "success");
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics};

pub use self::prometheus::{
    ACTIVE_WORKERS, DIRECT_RETRIES_TOTAL, JOBS_TOTAL, QUEUE_DEPTH, REGISTRY, ROTATIONS_TOTAL,
    ROTATION_DURATION, VISITS_TOTAL,
};
