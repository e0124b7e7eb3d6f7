//! Relay services assigned to (browser, tab) slots in fixed-size waves.
//!
//! Within a wave, tab slot `t` uses relay `(offset + t) % relays.len()`, so
//! every browser instance fans its tabs out over different relays. The
//! offset advances by one relay every `rotate_every` visits.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::types::{Identity, RelayService, RelaySlot};
use crate::error::InitError;

#[derive(Debug, Default)]
struct RelayState {
    offset: usize,
    visits: u32,
    waves: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatus {
    pub relays: usize,
    pub browsers: usize,
    pub tabs: usize,
    pub offset: usize,
    pub waves: u64,
    pub visits_since_rotation: u32,
}

#[derive(Debug)]
pub struct RelayWave {
    relays: Vec<RelayService>,
    browsers: usize,
    tabs: usize,
    rotate_every: u32,
    state: Mutex<RelayState>,
}

impl RelayWave {
    pub fn new(
        relays: Vec<RelayService>,
        browsers: usize,
        tabs: usize,
        rotate_every: u32,
    ) -> Result<Self, InitError> {
        if relays.is_empty() {
            return Err(InitError::EmptyIdentityList {
                strategy: "relay_wave".to_string(),
            });
        }
        if browsers == 0 || tabs == 0 {
            return Err(InitError::InvalidConfig(
                "relay waves need at least one browser and one tab".to_string(),
            ));
        }
        if rotate_every == 0 {
            return Err(InitError::InvalidConfig(
                "relay rotate_every must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            relays,
            browsers,
            tabs,
            rotate_every,
            state: Mutex::new(RelayState::default()),
        })
    }

    /// Tasks per wave.
    pub fn capacity(&self) -> usize {
        self.browsers * self.tabs
    }

    fn slot(&self, offset: usize, index: usize) -> Identity {
        let tab = index % self.tabs;
        Identity::Relay(RelaySlot {
            relay: self.relays[(offset + tab) % self.relays.len()].clone(),
            browser: (index / self.tabs) % self.browsers,
            tab,
        })
    }

    /// Identities for the next wave of `count` tasks.
    pub async fn assign_wave(&self, count: usize) -> Vec<Identity> {
        let mut state = self.state.lock().await;
        state.waves += 1;
        debug!(wave = state.waves, tasks = count, offset = state.offset, "Assigning relay wave");
        (0..count).map(|i| self.slot(state.offset, i)).collect()
    }

    /// Counts finished visits and advances the relay offset when due.
    pub async fn record_visits(&self, count: u32) {
        let mut state = self.state.lock().await;
        state.visits += count;
        while state.visits >= self.rotate_every {
            state.visits -= self.rotate_every;
            state.offset = (state.offset + 1) % self.relays.len();
        }
    }

    pub async fn status(&self) -> RelayStatus {
        let state = self.state.lock().await;
        RelayStatus {
            relays: self.relays.len(),
            browsers: self.browsers,
            tabs: self.tabs,
            offset: state.offset,
            waves: state.waves,
            visits_since_rotation: state.visits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relays(names: &[&str]) -> Vec<RelayService> {
        names
            .iter()
            .map(|n| RelayService::new(*n, format!("https://{}.example/?u={{url}}", n)))
            .collect()
    }

    fn relay_name(identity: &Identity) -> &str {
        match identity {
            Identity::Relay(slot) => &slot.relay.name,
            _ => "",
        }
    }

    #[test]
    fn test_requires_relays() {
        assert!(RelayWave::new(Vec::new(), 3, 5, 10).is_err());
        assert!(RelayWave::new(relays(&["a"]), 0, 5, 10).is_err());
    }

    #[test]
    fn test_rejects_zero_rotate_every() {
        let err = RelayWave::new(relays(&["a", "b"]), 1, 2, 0).expect_err("zero interval");
        assert!(matches!(err, InitError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_wave_slots_spread_over_relays() {
        let wave = RelayWave::new(relays(&["a", "b", "c"]), 2, 3, 100).expect("wave");
        assert_eq!(wave.capacity(), 6);

        let slots = wave.assign_wave(6).await;
        let names: Vec<&str> = slots.iter().map(relay_name).collect();
        assert_eq!(names, vec!["a", "b", "c", "a", "b", "c"]);

        let keys: Vec<String> = slots.iter().map(Identity::key).collect();
        assert_eq!(keys[0], "a#b1t1");
        assert_eq!(keys[4], "b#b2t2");
    }

    #[tokio::test]
    async fn test_offset_advances_every_n_visits() {
        let wave = RelayWave::new(relays(&["a", "b"]), 1, 2, 2).expect("wave");

        wave.record_visits(2).await;
        let slots = wave.assign_wave(2).await;
        let names: Vec<&str> = slots.iter().map(relay_name).collect();
        assert_eq!(names, vec!["b", "a"]);

        wave.record_visits(3).await;
        let status = wave.status().await;
        assert_eq!(status.offset, 0);
        assert_eq!(status.visits_since_rotation, 1);
        assert_eq!(status.waves, 1);
    }
}
