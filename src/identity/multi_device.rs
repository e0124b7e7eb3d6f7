//! A fleet of tethered devices, used round-robin or all at once.

use std::sync::Arc;

use tracing::{info, warn};

use super::types::Identity;
use crate::config::{RotationTimings, ToggleMethod};
use crate::device::{DeviceCommandBridge, MultiDeviceRegistry, RegistryStatus};
use crate::error::{BridgeError, InitError};
use crate::net::PublicIpProbe;

pub struct MultiDeviceRotation {
    registry: MultiDeviceRegistry,
    parallel: bool,
}

impl MultiDeviceRotation {
    pub async fn initialize(
        bridge: Arc<dyn DeviceCommandBridge>,
        probe: Arc<dyn PublicIpProbe>,
        timings: RotationTimings,
        rotate_every: u32,
        parallel: bool,
        toggle: ToggleMethod,
    ) -> Result<Self, InitError> {
        let registry =
            MultiDeviceRegistry::new(bridge, probe, timings, rotate_every).with_toggle(toggle);
        let count = registry.scan().await.map_err(|e| match e {
            BridgeError::Unavailable(msg) => InitError::BridgeUnavailable(msg),
            other => InitError::BridgeUnavailable(other.to_string()),
        })?;
        if count == 0 {
            return Err(InitError::NoDevices);
        }

        info!(devices = count, parallel, "Device fleet ready");
        Ok(Self { registry, parallel })
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub async fn device_count(&self) -> usize {
        self.registry.len().await
    }

    /// Next device in the cycle, or an idle one in parallel mode. `None`
    /// when every device is busy.
    pub async fn acquire(&self) -> Option<Identity> {
        let device = if self.parallel {
            self.registry.acquire_idle().await
        } else {
            self.registry.next_device().await
        };
        device.map(Identity::Device)
    }

    pub async fn rotate_if_due(&self, identity: Identity) -> Identity {
        let Identity::Device(device) = &identity else {
            return identity;
        };

        match self.registry.rotate_if_due(&device.device_id).await {
            Ok(Some(_)) => match self.registry.identity(&device.device_id).await {
                Some(updated) => Identity::Device(updated),
                None => identity,
            },
            Ok(None) => identity,
            Err(e) => {
                warn!(device_id = %device.device_id, error = %e, "Rotation failed, keeping current IP");
                identity
            }
        }
    }

    pub async fn record_visit(&self, device_id: &str) {
        self.registry.increment_visits(device_id).await;
    }

    pub async fn release(&self, device_id: &str) {
        if self.parallel {
            self.registry.release(device_id).await;
        }
    }

    pub async fn status(&self) -> RegistryStatus {
        self.registry.status().await
    }
}
