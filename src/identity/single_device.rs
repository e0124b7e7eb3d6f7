//! One tethered device, rotated every N visits.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::types::{DeviceIdentity, Identity};
use crate::config::{RotationTimings, ToggleMethod};
use crate::device::{DeviceCommandBridge, DeviceRotationController};
use crate::error::{BridgeError, InitError};
use crate::net::PublicIpProbe;

pub struct SingleDeviceRotation {
    controller: DeviceRotationController,
    rotate_every: u32,
    state: Mutex<DeviceIdentity>,
    /// Held for the whole rotation so visits wait for the new IP.
    rotating: Mutex<()>,
}

impl SingleDeviceRotation {
    /// Finds the device (the configured one, or the first online one) and
    /// records its metadata and current IP.
    pub async fn initialize(
        bridge: Arc<dyn DeviceCommandBridge>,
        probe: Arc<dyn PublicIpProbe>,
        timings: RotationTimings,
        device_id: Option<&str>,
        rotate_every: u32,
        toggle: ToggleMethod,
    ) -> Result<Self, InitError> {
        let attached = bridge.list_devices().await.map_err(|e| match e {
            BridgeError::Unavailable(msg) => InitError::BridgeUnavailable(msg),
            other => InitError::BridgeUnavailable(other.to_string()),
        })?;

        let mut online = attached.into_iter().filter(|d| d.is_online());
        let chosen = match device_id {
            Some(id) => online
                .find(|d| d.id == id)
                .ok_or_else(|| InitError::DeviceNotFound(id.to_string()))?,
            None => online.next().ok_or(InitError::DeviceNotConnected)?,
        };

        let controller = DeviceRotationController::new(chosen.id, bridge, probe, timings)
            .with_toggle(toggle);
        let device = controller.device_info().await;
        let mut identity = DeviceIdentity::from_device(&device);
        identity.current_ip = controller.current_ip().await;

        info!(
            device_id = %identity.device_id,
            model = %identity.model,
            carrier = %identity.carrier,
            ip = identity.current_ip.as_deref().unwrap_or("unknown"),
            "Device connected"
        );

        Ok(Self {
            controller,
            rotate_every,
            state: Mutex::new(identity),
            rotating: Mutex::new(()),
        })
    }

    pub async fn current(&self) -> Identity {
        Identity::Device(self.state.lock().await.clone())
    }

    /// Rotates once the visit threshold is reached.
    ///
    /// A failed rotation is logged and the device keeps its pre-rotation
    /// identity; the visit counter still restarts.
    pub async fn rotate_if_due(&self) -> Identity {
        let _rotating = self.rotating.lock().await;
        {
            let mut state = self.state.lock().await;
            if state.visits_since_rotation < self.rotate_every {
                return Identity::Device(state.clone());
            }
            state.visits_since_rotation = 0;
        }

        match self.controller.rotate().await {
            Ok(outcome) => {
                let mut state = self.state.lock().await;
                state.current_ip = Some(outcome.new_ip);
                state.rotation_count += 1;
            }
            Err(e) => {
                warn!(device_id = %self.controller.device_id(), error = %e, "Rotation failed, keeping current IP");
            }
        }

        self.current().await
    }

    pub async fn record_visit(&self) {
        self.state.lock().await.visits_since_rotation += 1;
    }

    pub async fn snapshot(&self) -> DeviceIdentity {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AttachedDevice;
    use crate::testing::{ScriptedBridge, ScriptedProbe};

    async fn init(
        bridge: ScriptedBridge,
        probe: ScriptedProbe,
        device_id: Option<&str>,
        rotate_every: u32,
    ) -> Result<SingleDeviceRotation, InitError> {
        SingleDeviceRotation::initialize(
            Arc::new(bridge),
            Arc::new(probe),
            RotationTimings::immediate(),
            device_id,
            rotate_every,
            ToggleMethod::AirplaneMode,
        )
        .await
    }

    #[tokio::test]
    async fn test_no_device_is_not_connected() {
        let err = init(ScriptedBridge::with_devices(&[]), ScriptedProbe::new(vec![]), None, 10)
            .await
            .err()
            .expect("no device");
        assert!(matches!(err, InitError::DeviceNotConnected));
    }

    #[tokio::test]
    async fn test_offline_device_is_skipped() {
        let bridge = ScriptedBridge::with_attached(vec![
            AttachedDevice::new("off", "offline"),
            AttachedDevice::new("on", "device"),
        ]);
        let strategy = init(bridge, ScriptedProbe::new(vec![Some("1.1.1.1")]), None, 10)
            .await
            .expect("online device");
        let identity = strategy.snapshot().await;
        assert_eq!(identity.device_id, "on");
        assert_eq!(identity.current_ip.as_deref(), Some("1.1.1.1"));
    }

    #[tokio::test]
    async fn test_configured_device_must_exist() {
        let err = init(
            ScriptedBridge::with_devices(&["a"]),
            ScriptedProbe::new(vec![]),
            Some("b"),
            10,
        )
        .await
        .err()
        .expect("unknown device");
        assert!(matches!(err, InitError::DeviceNotFound(id) if id == "b"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_bridge_unavailable() {
        let err = init(ScriptedBridge::unavailable(), ScriptedProbe::new(vec![]), None, 10)
            .await
            .err()
            .expect("tool missing");
        assert!(matches!(err, InitError::BridgeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_rotates_after_n_visits() {
        let probe = ScriptedProbe::new(vec![Some("1.1.1.1"), Some("1.1.1.1"), Some("2.2.2.2")]);
        let strategy = init(ScriptedBridge::with_devices(&["a"]), probe, None, 2)
            .await
            .expect("device");

        strategy.record_visit().await;
        strategy.rotate_if_due().await;
        assert_eq!(strategy.snapshot().await.rotation_count, 0);

        strategy.record_visit().await;
        let Identity::Device(identity) = strategy.rotate_if_due().await else {
            panic!("device identity expected");
        };
        assert_eq!(identity.rotation_count, 1);
        assert_eq!(identity.visits_since_rotation, 0);
        assert_eq!(identity.current_ip.as_deref(), Some("2.2.2.2"));
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_identity() {
        let probe = ScriptedProbe::new(vec![Some("1.1.1.1"), Some("1.1.1.1")]).then_none();
        let strategy = init(ScriptedBridge::with_devices(&["a"]), probe, None, 1)
            .await
            .expect("device");

        strategy.record_visit().await;
        let Identity::Device(identity) = strategy.rotate_if_due().await else {
            panic!("device identity expected");
        };
        assert_eq!(identity.current_ip.as_deref(), Some("1.1.1.1"));
        assert_eq!(identity.rotation_count, 0);
    }
}
