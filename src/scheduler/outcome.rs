//! Classification of visit results.

use serde::{Deserialize, Serialize};

use crate::net::VisitResult;

/// Error text fragments that mark a connectivity failure of the identity
/// rather than of the target. Matched case-insensitively.
const RETRYABLE_MARKERS: [&str; 5] = ["proxy", "timeout", "timed out", "connection", "refused"];

/// How a finished task is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitOutcome {
    Success,
    /// No identity was available; the task was dropped without a visit.
    Abandoned,
    /// Connectivity failure attributed to the identity.
    Retryable,
    NonRetryable,
}

impl VisitOutcome {
    pub fn classify(result: &VisitResult) -> Self {
        if result.success {
            return VisitOutcome::Success;
        }
        match result.error.as_deref() {
            Some(error) if is_retryable(error) => VisitOutcome::Retryable,
            _ => VisitOutcome::NonRetryable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisitOutcome::Success => "success",
            VisitOutcome::Abandoned => "abandoned",
            VisitOutcome::Retryable => "retryable",
            VisitOutcome::NonRetryable => "non_retryable",
        }
    }
}

fn is_retryable(error: &str) -> bool {
    let lower = error.to_lowercase();
    RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
}
