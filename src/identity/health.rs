//! Per-identity failure tracking with a fixed-window circuit breaker.
//!
//! A record is created on the first classified-retryable failure of an
//! identity. Once its failure count reaches the threshold the identity is
//! ineligible until the cooldown has elapsed since its last failure. A single
//! success deletes the record outright.
//!
//! The tracker is plain bookkeeping: no I/O, no clock of its own beyond the
//! `*_at` variants that take an explicit `Instant`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Consecutive failures after which an identity is quarantined.
pub const DEFAULT_FAIL_THRESHOLD: u32 = 3;

/// How long a quarantined identity stays out of rotation.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Failure history for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRecord {
    pub failure_count: u32,
    pub last_failure: Instant,
}

/// Health records keyed by identity key.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    records: HashMap<String, HealthRecord>,
    fail_threshold: u32,
    cooldown: Duration,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::with_policy(DEFAULT_FAIL_THRESHOLD, DEFAULT_COOLDOWN)
    }

    pub fn with_policy(fail_threshold: u32, cooldown: Duration) -> Self {
        Self {
            records: HashMap::new(),
            fail_threshold,
            cooldown,
        }
    }

    pub fn fail_threshold(&self) -> u32 {
        self.fail_threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Records a failure now. Returns the new failure count.
    pub fn record_failure(&mut self, key: &str) -> u32 {
        self.record_failure_at(key, Instant::now())
    }

    /// Records a failure at `now`. Returns the new failure count.
    pub fn record_failure_at(&mut self, key: &str, now: Instant) -> u32 {
        let record = self
            .records
            .entry(key.to_string())
            .or_insert(HealthRecord {
                failure_count: 0,
                last_failure: now,
            });
        record.failure_count += 1;
        record.last_failure = now;

        if record.failure_count == self.fail_threshold {
            warn!(
                identity = key,
                failures = record.failure_count,
                cooldown_secs = self.cooldown.as_secs(),
                "Identity quarantined"
            );
        } else {
            debug!(identity = key, failures = record.failure_count, "Identity failure recorded");
        }

        record.failure_count
    }

    /// Clears the identity's record entirely.
    pub fn record_success(&mut self, key: &str) {
        if self.records.remove(key).is_some() {
            debug!(identity = key, "Identity health reset after success");
        }
    }

    /// Whether the identity may be selected at `now`.
    ///
    /// An expired record is deleted as a side effect.
    pub fn is_eligible(&mut self, key: &str, now: Instant) -> bool {
        let Some(record) = self.records.get(key) else {
            return true;
        };

        if now.saturating_duration_since(record.last_failure) > self.cooldown {
            self.records.remove(key);
            return true;
        }

        record.failure_count < self.fail_threshold
    }

    /// Drops every record.
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Number of identities currently at or over the threshold.
    pub fn failing_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.failure_count >= self.fail_threshold)
            .count()
    }

    pub fn record(&self, key: &str) -> Option<&HealthRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
