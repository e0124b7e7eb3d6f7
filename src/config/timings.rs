//! Fixed delays used by the scheduler and the device rotation controller.
//!
//! Stored as milliseconds so settings files stay readable; accessors return
//! [`Duration`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delays that shape the dispatch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerTimings {
    /// Pause between two worker launches.
    pub stagger_ms: u64,
    /// Pause before the dispatch loop runs again after a worker finishes.
    pub reentry_delay_ms: u64,
    /// Grace period between a stop request and strategy shutdown.
    pub stop_grace_ms: u64,
    /// Pause between two waves in wave mode.
    pub wave_cooldown_ms: u64,
}

impl Default for SchedulerTimings {
    fn default() -> Self {
        Self {
            stagger_ms: 500,
            reentry_delay_ms: 1_000,
            stop_grace_ms: 1_000,
            wave_cooldown_ms: 2_000,
        }
    }
}

impl SchedulerTimings {
    /// All delays zero. Used by tests.
    pub fn immediate() -> Self {
        Self {
            stagger_ms: 0,
            reentry_delay_ms: 0,
            stop_grace_ms: 0,
            wave_cooldown_ms: 0,
        }
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn reentry_delay(&self) -> Duration {
        Duration::from_millis(self.reentry_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn wave_cooldown(&self) -> Duration {
        Duration::from_millis(self.wave_cooldown_ms)
    }
}

/// Delays for one connectivity toggle cycle on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationTimings {
    /// Wait after disabling connectivity.
    pub settle_ms: u64,
    /// Wait after re-enabling connectivity, before probing.
    pub reconnect_ms: u64,
    /// Number of public IP probes before giving up.
    pub probe_attempts: u32,
    /// Wait before each probe.
    pub probe_interval_ms: u64,
}

impl Default for RotationTimings {
    fn default() -> Self {
        Self {
            settle_ms: 3_000,
            reconnect_ms: 5_000,
            probe_attempts: 5,
            probe_interval_ms: 2_000,
        }
    }
}

impl RotationTimings {
    /// All delays zero, default attempt count. Used by tests.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            reconnect_ms: 0,
            probe_interval_ms: 0,
            ..Self::default()
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_defaults() {
        let t = SchedulerTimings::default();
        assert_eq!(t.stagger(), Duration::from_millis(500));
        assert_eq!(t.reentry_delay(), Duration::from_secs(1));
        assert_eq!(t.wave_cooldown(), Duration::from_secs(2));
    }

    #[test]
    fn test_rotation_defaults() {
        let t = RotationTimings::default();
        assert_eq!(t.settle(), Duration::from_secs(3));
        assert_eq!(t.reconnect(), Duration::from_secs(5));
        assert_eq!(t.probe_attempts, 5);
        assert_eq!(t.probe_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_immediate_keeps_attempts() {
        let t = RotationTimings::immediate();
        assert_eq!(t.settle(), Duration::ZERO);
        assert_eq!(t.probe_attempts, 5);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let t: SchedulerTimings = serde_yaml::from_str("stagger_ms: 10").expect("valid yaml");
        assert_eq!(t.stagger_ms, 10);
        assert_eq!(t.reentry_delay_ms, 1_000);
    }
}
