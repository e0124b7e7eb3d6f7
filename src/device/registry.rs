//! Fleet of tethered devices with per-device visit and rotation counters.
//!
//! Devices are handed out either round-robin (one logical worker, devices
//! take turns) or exclusively (parallel mode, one worker per device). The
//! registry lock is never held while a rotation runs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::bridge::DeviceCommandBridge;
use super::rotation::{DeviceRotationController, RotationOutcome};
use super::Device;
use crate::config::{RotationTimings, ToggleMethod};
use crate::error::{BridgeError, RotationError};
use crate::identity::DeviceIdentity;
use crate::net::PublicIpProbe;

#[derive(Debug, Clone)]
struct DeviceSlot {
    device: Device,
    visits: u32,
    rotations: u32,
    current_ip: Option<String>,
    busy: bool,
}

impl DeviceSlot {
    fn new(device: Device) -> Self {
        Self {
            device,
            visits: 0,
            rotations: 0,
            current_ip: None,
            busy: false,
        }
    }

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            current_ip: self.current_ip.clone(),
            visits_since_rotation: self.visits,
            rotation_count: self.rotations,
            ..DeviceIdentity::from_device(&self.device)
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    slots: Vec<DeviceSlot>,
    cursor: usize,
}

impl RegistryState {
    fn slot_mut(&mut self, device_id: &str) -> Option<&mut DeviceSlot> {
        self.slots.iter_mut().find(|s| s.device.id == device_id)
    }
}

/// Per-device entry of [`RegistryStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub id: String,
    pub model: String,
    pub carrier: String,
    pub platform_version: String,
    pub current_ip: Option<String>,
    pub visits_since_rotation: u32,
    pub rotation_count: u32,
    pub needs_rotation: bool,
    pub busy: bool,
}

/// Fleet-wide status payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub total_devices: usize,
    pub cursor: usize,
    pub rotate_every: u32,
    pub devices: Vec<DeviceStatus>,
}

pub struct MultiDeviceRegistry {
    bridge: Arc<dyn DeviceCommandBridge>,
    probe: Arc<dyn PublicIpProbe>,
    timings: RotationTimings,
    toggle: ToggleMethod,
    rotate_every: u32,
    state: Mutex<RegistryState>,
}

impl MultiDeviceRegistry {
    pub fn new(
        bridge: Arc<dyn DeviceCommandBridge>,
        probe: Arc<dyn PublicIpProbe>,
        timings: RotationTimings,
        rotate_every: u32,
    ) -> Self {
        Self {
            bridge,
            probe,
            timings,
            toggle: ToggleMethod::default(),
            rotate_every,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn with_toggle(mut self, toggle: ToggleMethod) -> Self {
        self.toggle = toggle;
        self
    }

    /// Discovers online devices and replaces the registry contents.
    ///
    /// Offline and unauthorized devices are skipped. Metadata that cannot be
    /// read is recorded as `Unknown`. Returns the number of devices found.
    pub async fn scan(&self) -> Result<usize, BridgeError> {
        let attached = self.bridge.list_devices().await?;

        let mut slots = Vec::new();
        for entry in attached {
            if !entry.is_online() {
                warn!(device_id = %entry.id, state = %entry.state, "Skipping device that is not online");
                continue;
            }
            let device = Device::query(self.bridge.as_ref(), &entry.id).await;
            info!(
                device_id = %device.id,
                model = %device.model,
                carrier = %device.carrier,
                "Device registered"
            );
            slots.push(DeviceSlot::new(device));
        }

        let count = slots.len();
        let mut state = self.state.lock().await;
        state.slots = slots;
        state.cursor = 0;
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.state
            .lock()
            .await
            .slots
            .iter()
            .map(|s| s.device.clone())
            .collect()
    }

    pub fn rotate_every(&self) -> u32 {
        self.rotate_every
    }

    /// Round-robin: returns the device at the cursor and advances it.
    pub async fn next_device(&self) -> Option<DeviceIdentity> {
        let mut state = self.state.lock().await;
        if state.slots.is_empty() {
            return None;
        }
        let index = state.cursor % state.slots.len();
        state.cursor = (index + 1) % state.slots.len();
        Some(state.slots[index].identity())
    }

    /// Exclusive mode: takes the first idle device and marks it busy.
    pub async fn acquire_idle(&self) -> Option<DeviceIdentity> {
        let mut state = self.state.lock().await;
        let slot = state.slots.iter_mut().find(|s| !s.busy)?;
        slot.busy = true;
        Some(slot.identity())
    }

    /// Marks a device idle again after [`acquire_idle`](Self::acquire_idle).
    pub async fn release(&self, device_id: &str) {
        if let Some(slot) = self.state.lock().await.slot_mut(device_id) {
            slot.busy = false;
        }
    }

    /// Counts one visit; returns the new visit count.
    pub async fn increment_visits(&self, device_id: &str) -> Option<u32> {
        let mut state = self.state.lock().await;
        let slot = state.slot_mut(device_id)?;
        slot.visits += 1;
        Some(slot.visits)
    }

    pub async fn needs_rotation(&self, device_id: &str) -> bool {
        let mut state = self.state.lock().await;
        state
            .slot_mut(device_id)
            .is_some_and(|s| s.visits >= self.rotate_every)
    }

    /// Current snapshot of one device.
    pub async fn identity(&self, device_id: &str) -> Option<DeviceIdentity> {
        let mut state = self.state.lock().await;
        state.slot_mut(device_id).map(|s| s.identity())
    }

    /// A rotation controller for one device, sharing this registry's bridge
    /// and probe.
    pub fn controller(&self, device_id: &str) -> DeviceRotationController {
        DeviceRotationController::new(
            device_id,
            self.bridge.clone(),
            self.probe.clone(),
            self.timings.clone(),
        )
        .with_toggle(self.toggle)
    }

    /// Rotates one device.
    ///
    /// The visit counter resets when the attempt starts, so a failing device
    /// is retried only after another `rotate_every` visits. On success the
    /// rotation count is incremented and the new IP recorded.
    pub async fn rotate(&self, device_id: &str) -> Result<RotationOutcome, RotationError> {
        if let Some(slot) = self.state.lock().await.slot_mut(device_id) {
            slot.visits = 0;
        }
        self.run_rotation(device_id).await
    }

    /// Rotates when the device has reached its visit threshold.
    ///
    /// The threshold check and the counter reset happen under one lock, so
    /// concurrent callers on a due device rotate it once. Returns `Ok(None)`
    /// when no rotation was due.
    pub async fn rotate_if_due(
        &self,
        device_id: &str,
    ) -> Result<Option<RotationOutcome>, RotationError> {
        if !self.claim_rotation(device_id).await {
            return Ok(None);
        }
        self.run_rotation(device_id).await.map(Some)
    }

    /// Resets the visit counter if a rotation is due; returns whether it was.
    async fn claim_rotation(&self, device_id: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.slot_mut(device_id) {
            Some(slot) if slot.visits >= self.rotate_every => {
                slot.visits = 0;
                true
            }
            _ => false,
        }
    }

    async fn run_rotation(&self, device_id: &str) -> Result<RotationOutcome, RotationError> {
        let outcome = self.controller(device_id).rotate().await?;

        let mut state = self.state.lock().await;
        if let Some(slot) = state.slot_mut(device_id) {
            slot.rotations += 1;
            slot.current_ip = Some(outcome.new_ip.clone());
        }
        Ok(outcome)
    }

    /// Rotates every registered device concurrently.
    pub async fn rotate_all(&self) -> Vec<(String, Result<RotationOutcome, RotationError>)> {
        let ids: Vec<String> = self.devices().await.into_iter().map(|d| d.id).collect();
        let rotations = ids.iter().map(|id| self.rotate(id));
        let results = futures::future::join_all(rotations).await;
        ids.into_iter().zip(results).collect()
    }

    pub async fn status(&self) -> RegistryStatus {
        let state = self.state.lock().await;
        RegistryStatus {
            total_devices: state.slots.len(),
            cursor: state.cursor,
            rotate_every: self.rotate_every,
            devices: state
                .slots
                .iter()
                .map(|s| DeviceStatus {
                    id: s.device.id.clone(),
                    model: s.device.model.clone(),
                    carrier: s.device.carrier.clone(),
                    platform_version: s.device.platform_version.clone(),
                    current_ip: s.current_ip.clone(),
                    visits_since_rotation: s.visits,
                    rotation_count: s.rotations,
                    needs_rotation: s.visits >= self.rotate_every,
                    busy: s.busy,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{AttachedDevice, UNKNOWN};
    use crate::testing::{ScriptedBridge, ScriptedProbe};

    fn registry(bridge: ScriptedBridge, probe: ScriptedProbe, rotate_every: u32) -> MultiDeviceRegistry {
        MultiDeviceRegistry::new(
            Arc::new(bridge),
            Arc::new(probe),
            RotationTimings::immediate(),
            rotate_every,
        )
    }

    #[tokio::test]
    async fn test_scan_skips_offline_and_keeps_unknown_metadata() {
        let bridge = ScriptedBridge::with_attached(vec![
            AttachedDevice::new("a", "device"),
            AttachedDevice::new("b", "offline"),
            AttachedDevice::new("c", "device"),
        ])
        .with_prop("a", "ro.product.model", "Pixel 7")
        .with_prop("a", "gsm.operator.alpha", "CarrierOne");

        let reg = registry(bridge, ScriptedProbe::new(vec![]), 10);
        assert_eq!(reg.scan().await.expect("scan"), 2);

        let devices = reg.devices().await;
        assert_eq!(devices[0].model, "Pixel 7");
        assert_eq!(devices[0].carrier, "CarrierOne");
        assert_eq!(devices[0].platform_version, UNKNOWN);
        assert_eq!(devices[1].id, "c");
        assert_eq!(devices[1].model, UNKNOWN);
    }

    #[tokio::test]
    async fn test_scan_without_tool_fails() {
        let reg = registry(ScriptedBridge::unavailable(), ScriptedProbe::new(vec![]), 10);
        let err = reg.scan().await.expect_err("tool missing");
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_round_robin_order() {
        let reg = registry(
            ScriptedBridge::with_devices(&["a", "b", "c"]),
            ScriptedProbe::new(vec![]),
            10,
        );
        reg.scan().await.expect("scan");

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(reg.next_device().await.expect("device").device_id);
        }
        assert_eq!(order, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_next_device_empty_registry() {
        let reg = registry(ScriptedBridge::with_devices(&[]), ScriptedProbe::new(vec![]), 10);
        reg.scan().await.expect("scan");
        assert!(reg.next_device().await.is_none());
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn test_needs_rotation_at_threshold() {
        let reg = registry(ScriptedBridge::with_devices(&["a"]), ScriptedProbe::new(vec![]), 2);
        reg.scan().await.expect("scan");

        reg.increment_visits("a").await;
        assert!(!reg.needs_rotation("a").await);
        reg.increment_visits("a").await;
        assert!(reg.needs_rotation("a").await);
    }

    #[tokio::test]
    async fn test_rotation_resets_visits_and_counts() {
        let reg = registry(
            ScriptedBridge::with_devices(&["a"]),
            ScriptedProbe::new(vec![Some("1.1.1.1"), Some("2.2.2.2")]),
            1,
        );
        reg.scan().await.expect("scan");
        reg.increment_visits("a").await;

        let outcome = reg
            .rotate_if_due("a")
            .await
            .expect("rotation ok")
            .expect("rotation was due");
        assert!(outcome.changed);

        let identity = reg.identity("a").await.expect("registered");
        assert_eq!(identity.visits_since_rotation, 0);
        assert_eq!(identity.rotation_count, 1);
        assert_eq!(identity.current_ip.as_deref(), Some("2.2.2.2"));
    }

    #[tokio::test]
    async fn test_concurrent_rotate_if_due_rotates_once() {
        let reg = registry(
            ScriptedBridge::with_devices(&["a"]),
            ScriptedProbe::new(vec![
                Some("1.1.1.1"),
                Some("2.2.2.2"),
                Some("3.3.3.3"),
                Some("4.4.4.4"),
            ]),
            1,
        );
        reg.scan().await.expect("scan");
        reg.increment_visits("a").await;

        let (first, second) = tokio::join!(reg.rotate_if_due("a"), reg.rotate_if_due("a"));
        let first = first.expect("first rotation ok");
        let second = second.expect("second rotation ok");
        assert_eq!(
            usize::from(first.is_some()) + usize::from(second.is_some()),
            1
        );

        let identity = reg.identity("a").await.expect("registered");
        assert_eq!(identity.rotation_count, 1);
        assert_eq!(identity.visits_since_rotation, 0);
        assert!(reg.rotate_if_due("a").await.expect("not due").is_none());
    }

    #[tokio::test]
    async fn test_failed_rotation_still_resets_visits() {
        let reg = registry(
            ScriptedBridge::with_devices(&["a"]),
            ScriptedProbe::new(vec![None]).then_none(),
            1,
        );
        reg.scan().await.expect("scan");
        reg.increment_visits("a").await;

        assert!(reg.rotate("a").await.is_err());
        let identity = reg.identity("a").await.expect("registered");
        assert_eq!(identity.visits_since_rotation, 0);
        assert_eq!(identity.rotation_count, 0);
    }

    #[tokio::test]
    async fn test_exclusive_acquire_and_release() {
        let reg = registry(
            ScriptedBridge::with_devices(&["a", "b"]),
            ScriptedProbe::new(vec![]),
            10,
        );
        reg.scan().await.expect("scan");

        let first = reg.acquire_idle().await.expect("a idle");
        let second = reg.acquire_idle().await.expect("b idle");
        assert_ne!(first.device_id, second.device_id);
        assert!(reg.acquire_idle().await.is_none());

        reg.release(&first.device_id).await;
        let again = reg.acquire_idle().await.expect("released device");
        assert_eq!(again.device_id, first.device_id);
    }

    #[tokio::test]
    async fn test_rotate_all_reports_each_device() {
        let reg = registry(
            ScriptedBridge::with_devices(&["a", "b"]),
            ScriptedProbe::new(vec![Some("9.9.9.9")]),
            10,
        );
        reg.scan().await.expect("scan");

        let results = reg.rotate_all().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));

        let status = reg.status().await;
        assert_eq!(status.total_devices, 2);
        assert!(status.devices.iter().all(|d| d.rotation_count == 1));
    }
}
