//! Job events and the sinks that receive them.
//!
//! The orchestrator emits a [`JobEvent::Status`] on every lifecycle change
//! and a [`JobEvent::Progress`] after every finished task or wave. Sinks are
//! fire-and-forget: a sink that cannot deliver drops the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use super::job::JobPhase;
use crate::identity::StrategyStatus;

/// Lifecycle milestones reported in status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Started,
    Stopping,
    Stopped,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Stopping => "stopping",
            JobStatus::Stopped => "stopped",
            JobStatus::Completed => "completed",
        }
    }
}

/// Counters and identity stats after a finished task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub job_id: Uuid,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub active_workers: usize,
    pub queued: usize,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    /// Human-readable line describing the task that just finished.
    pub log: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<StrategyStatus>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Status {
        job_id: Uuid,
        status: JobStatus,
        phase: JobPhase,
        message: String,
        progress: f64,
        timestamp: DateTime<Utc>,
    },
    Progress(ProgressReport),
}

impl JobEvent {
    pub fn status(
        job_id: Uuid,
        status: JobStatus,
        phase: JobPhase,
        message: impl Into<String>,
        progress: f64,
    ) -> Self {
        JobEvent::Status {
            job_id,
            status,
            phase,
            message: message.into(),
            progress,
            timestamp: Utc::now(),
        }
    }

    /// Event name as used by transport layers.
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Status { .. } => "status",
            JobEvent::Progress(_) => "progress",
        }
    }
}

/// Receives job events. Must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<JobEvent>) -> Self {
        Self { tx }
    }

    /// A sink and the receiver it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: JobEvent) {
        // Ignore send errors - receiver may have been dropped
        let _ = self.tx.send(event);
    }
}

/// Logs every event; status at `info`, progress at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: JobEvent) {
        match &event {
            JobEvent::Status {
                job_id,
                status,
                message,
                progress,
                ..
            } => {
                info!(
                    job_id = %job_id,
                    status = status.as_str(),
                    progress = *progress,
                    "{}",
                    message
                );
            }
            JobEvent::Progress(report) => {
                debug!(
                    job_id = %report.job_id,
                    processed = report.processed,
                    active = report.active_workers,
                    queued = report.queued,
                    progress = report.progress,
                    "{}",
                    report.log
                );
            }
        }
    }
}

/// `processed / (processed + queued + active) × 100`; 0 for an empty job.
pub fn compute_progress(processed: usize, queued: usize, active: usize) -> f64 {
    let total = processed + queued + active;
    if total == 0 {
        return 0.0;
    }
    (processed as f64 / total as f64) * 100.0
}
