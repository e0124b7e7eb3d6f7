//! Connectivity toggling for one device, verified by a public IP probe.
//!
//! The external tools are slow and unreliable about reporting state, so the
//! controller never trusts the toggle command's own answer. It waits fixed
//! settle/reconnect delays and then polls the probe until an address shows
//! up. Receiving the same address again is a successful rotation with
//! `changed == false`; carriers may legitimately hand the same IP back.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::bridge::DeviceCommandBridge;
use super::Device;
use crate::config::{RotationTimings, ToggleMethod};
use crate::error::{BridgeError, RotationError};
use crate::metrics::MetricsCollector;
use crate::net::PublicIpProbe;

/// Broadcast that makes older platforms pick up a changed airplane setting.
const AIRPLANE_BROADCAST: [&str; 5] = [
    "shell",
    "am",
    "broadcast",
    "-a",
    "android.intent.action.AIRPLANE_MODE",
];

/// Result of a successful rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationOutcome {
    pub old_ip: Option<String>,
    pub new_ip: String,
    pub changed: bool,
}

/// Drives one external device.
pub struct DeviceRotationController {
    device_id: String,
    bridge: Arc<dyn DeviceCommandBridge>,
    probe: Arc<dyn PublicIpProbe>,
    timings: RotationTimings,
    toggle: ToggleMethod,
}

impl DeviceRotationController {
    pub fn new(
        device_id: impl Into<String>,
        bridge: Arc<dyn DeviceCommandBridge>,
        probe: Arc<dyn PublicIpProbe>,
        timings: RotationTimings,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            bridge,
            probe,
            timings,
            toggle: ToggleMethod::default(),
        }
    }

    pub fn with_toggle(mut self, toggle: ToggleMethod) -> Self {
        self.toggle = toggle;
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Whether the device is attached and online.
    ///
    /// This is the precondition check done before any rotation; an absent
    /// device is `Ok(false)`, an absent tool is `Err`.
    pub async fn check_connection(&self) -> Result<bool, BridgeError> {
        let devices = self.bridge.list_devices().await?;
        Ok(devices
            .iter()
            .any(|d| d.id == self.device_id && d.is_online()))
    }

    /// Queries the device's metadata.
    pub async fn device_info(&self) -> Device {
        Device::query(self.bridge.as_ref(), &self.device_id).await
    }

    /// The public IP as seen right now.
    pub async fn current_ip(&self) -> Option<String> {
        self.probe.current_ip().await
    }

    /// Toggles connectivity off and on, then waits for a public IP.
    ///
    /// # Errors
    ///
    /// - `RotationError::NotConnected` if the device is absent or offline; no
    ///   command is sent
    /// - `RotationError::ToolUnreachable` if the command tool cannot be run
    /// - `RotationError::ToggleFailed` if both command forms fail
    /// - `RotationError::NoIpObserved` if every probe attempt comes back empty
    pub async fn rotate(&self) -> Result<RotationOutcome, RotationError> {
        let started = Instant::now();
        let result = self.perform_rotation().await;
        MetricsCollector::new()
            .record_rotation(result.as_ref().ok().map(|o| o.changed), started.elapsed());
        result
    }

    async fn perform_rotation(&self) -> Result<RotationOutcome, RotationError> {
        if !self.check_connection().await? {
            warn!(device_id = %self.device_id, "Device not connected, skipping rotation");
            return Err(RotationError::NotConnected(self.device_id.clone()));
        }

        let old_ip = self.probe.current_ip().await;
        info!(
            device_id = %self.device_id,
            old_ip = old_ip.as_deref().unwrap_or("unknown"),
            method = ?self.toggle,
            "Rotating device IP"
        );

        self.set_connectivity(false).await?;
        tokio::time::sleep(self.timings.settle()).await;

        self.set_connectivity(true).await?;
        debug!(device_id = %self.device_id, "Waiting for network reconnection");
        tokio::time::sleep(self.timings.reconnect()).await;

        let new_ip = self.wait_for_ip().await?;
        let changed = old_ip.as_deref() != Some(new_ip.as_str());

        if changed {
            info!(device_id = %self.device_id, new_ip = %new_ip, "Device IP changed");
        } else {
            warn!(device_id = %self.device_id, new_ip = %new_ip, "Device kept the same IP");
        }

        Ok(RotationOutcome {
            old_ip,
            new_ip,
            changed,
        })
    }

    async fn wait_for_ip(&self) -> Result<String, RotationError> {
        let attempts = self.timings.probe_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.timings.probe_interval()).await;
            if let Some(ip) = self.probe.current_ip().await {
                return Ok(ip);
            }
            debug!(device_id = %self.device_id, attempt, "No public IP yet");
        }
        Err(RotationError::NoIpObserved { attempts })
    }

    async fn set_connectivity(&self, enabled: bool) -> Result<(), RotationError> {
        match self.toggle {
            ToggleMethod::AirplaneMode => self.set_airplane_mode(!enabled).await,
            ToggleMethod::MobileData => {
                let action = if enabled { "enable" } else { "disable" };
                self.bridge
                    .invoke(&self.device_id, &["shell", "svc", "data", action])
                    .await?;
                Ok(())
            }
        }
    }

    /// Modern `cmd connectivity` form first, legacy settings + broadcast on
    /// failure. A missing tool is not retried with the legacy form.
    async fn set_airplane_mode(&self, on: bool) -> Result<(), RotationError> {
        let action = if on { "enable" } else { "disable" };
        let modern = self
            .bridge
            .invoke(
                &self.device_id,
                &["shell", "cmd", "connectivity", "airplane-mode", action],
            )
            .await;

        match modern {
            Ok(output) if !reports_unknown_command(&output) => {
                debug!(device_id = %self.device_id, airplane = on, "Airplane mode toggled");
                return Ok(());
            }
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Ok(output) => {
                debug!(device_id = %self.device_id, output = %output, "Modern toggle rejected");
            }
            Err(e) => {
                debug!(device_id = %self.device_id, error = %e, "Modern toggle failed");
            }
        }

        let value = if on { "1" } else { "0" };
        self.bridge
            .invoke(
                &self.device_id,
                &["shell", "settings", "put", "global", "airplane_mode_on", value],
            )
            .await?;
        self.bridge
            .invoke(&self.device_id, &AIRPLANE_BROADCAST)
            .await?;
        debug!(device_id = %self.device_id, airplane = on, "Airplane mode toggled (legacy)");
        Ok(())
    }
}

/// Older shells exit 0 but print an error for unknown `cmd` services.
fn reports_unknown_command(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("unknown command") || lower.contains("can't find service")
}
