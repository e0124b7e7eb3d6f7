//! One tunnel endpoint at a time, cycled round-robin every N visits.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use super::types::{Identity, TunnelEndpoint};
use crate::error::InitError;

#[derive(Debug, Default)]
struct TunnelState {
    index: usize,
    visits: u32,
    rotations: u32,
}

/// Status of the tunnel rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub current: String,
    pub index: usize,
    pub endpoints: usize,
    pub visits_since_rotation: u32,
    pub rotation_count: u32,
}

#[derive(Debug)]
pub struct TunnelRotation {
    endpoints: Vec<TunnelEndpoint>,
    rotate_every: u32,
    state: Mutex<TunnelState>,
}

impl TunnelRotation {
    pub fn new(endpoints: Vec<TunnelEndpoint>, rotate_every: u32) -> Result<Self, InitError> {
        if endpoints.is_empty() {
            return Err(InitError::EmptyIdentityList {
                strategy: "tunnel".to_string(),
            });
        }
        Ok(Self {
            endpoints,
            rotate_every,
            state: Mutex::new(TunnelState::default()),
        })
    }

    pub async fn current(&self) -> Identity {
        let state = self.state.lock().await;
        Identity::Tunnel(self.endpoints[state.index].clone())
    }

    /// Advances to the next endpoint once `rotate_every` visits have been
    /// made on the current one, and returns the endpoint to use.
    pub async fn rotate_if_due(&self) -> Identity {
        let mut state = self.state.lock().await;
        if state.visits >= self.rotate_every {
            let previous = state.index;
            state.index = (state.index + 1) % self.endpoints.len();
            state.visits = 0;
            state.rotations += 1;
            info!(
                from = %self.endpoints[previous].name,
                to = %self.endpoints[state.index].name,
                "Switching tunnel endpoint"
            );
        }
        Identity::Tunnel(self.endpoints[state.index].clone())
    }

    pub async fn record_visit(&self) {
        self.state.lock().await.visits += 1;
    }

    pub async fn status(&self) -> TunnelStatus {
        let state = self.state.lock().await;
        TunnelStatus {
            current: self.endpoints[state.index].name.clone(),
            index: state.index,
            endpoints: self.endpoints.len(),
            visits_since_rotation: state.visits,
            rotation_count: state.rotations,
        }
    }
}
