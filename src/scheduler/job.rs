//! Batch and task definitions.
//!
//! - `Task`: one visit of one target in one cycle
//! - `BatchSpec`: validated target list × cycle count
//! - `JobPhase`: the orchestrator lifecycle state

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::JobError;

/// A single page visit to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub target: String,
    /// 1-based cycle number.
    pub cycle_index: u32,
}

impl Task {
    pub fn new(target: impl Into<String>, cycle_index: u32) -> Self {
        Self {
            target: target.into(),
            cycle_index,
        }
    }
}

/// Lifecycle of the orchestrator's single job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Idle => "idle",
            JobPhase::Running => "running",
            JobPhase::Stopping => "stopping",
        };
        write!(f, "{}", s)
    }
}

/// A validated batch: every target repeated `cycles` times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpec {
    targets: Vec<String>,
    cycles: u32,
}

impl BatchSpec {
    /// Validates the batch.
    ///
    /// # Errors
    ///
    /// Returns `JobError::MalformedBatch` for an empty target list, zero
    /// cycles, or any target that is not an absolute http(s) URL.
    pub fn new(targets: Vec<String>, cycles: u32) -> Result<Self, JobError> {
        if targets.is_empty() {
            return Err(JobError::MalformedBatch("target list is empty".to_string()));
        }
        if cycles == 0 {
            return Err(JobError::MalformedBatch(
                "cycles must be at least 1".to_string(),
            ));
        }
        if let Some(bad) = targets.iter().find(|t| !is_http_url(t)) {
            return Err(JobError::MalformedBatch(format!(
                "'{}' is not an absolute http(s) URL",
                bad
            )));
        }
        Ok(Self { targets, cycles })
    }

    /// Reads targets from a text or CSV file, one per line, first column.
    ///
    /// Rows that are not absolute http(s) URLs (such as a CSV header) are
    /// skipped with a warning.
    pub fn from_file(path: impl AsRef<Path>, cycles: u32) -> Result<Self, JobError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            JobError::MalformedBatch(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::new(parse_targets(&raw), cycles)
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn len(&self) -> usize {
        self.targets.len() * self.cycles as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The task queue: all cycle-1 tasks in target order, then cycle 2, ...
    pub fn build_queue(&self) -> VecDeque<Task> {
        (1..=self.cycles)
            .flat_map(|cycle| self.targets.iter().map(move |t| Task::new(t.clone(), cycle)))
            .collect()
    }
}

/// Extracts targets from text/CSV content. Invalid rows are skipped.
pub fn parse_targets(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| {
            let first = line.split(',').next()?.trim().trim_matches('"').trim();
            if first.is_empty() {
                return None;
            }
            if is_http_url(first) {
                Some(first.to_string())
            } else {
                warn!(row = %line.trim(), "Skipping row without a valid URL");
                None
            }
        })
        .collect()
}

fn is_http_url(target: &str) -> bool {
    Url::parse(target)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}
