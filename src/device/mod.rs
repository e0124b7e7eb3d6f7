//! Tethered device control.
//!
//! - **DeviceCommandBridge**: transport for device commands (`adb` by default)
//! - **DeviceRotationController**: toggles one device's connectivity and
//!   verifies the outcome with a public IP probe
//! - **MultiDeviceRegistry**: discovers a fleet of devices and tracks their
//!   visit and rotation counters
//!
//! # Rotation cycle
//!
//! ```text
//!   probe IP ──► disable ──► settle ──► enable ──► reconnect ──► probe ×N
//!                  │                      │
//!            modern form, then legacy form on failure
//! ```

pub mod bridge;
pub mod registry;
pub mod rotation;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use bridge::{AdbBridge, AttachedDevice, DeviceCommandBridge};
pub use registry::{DeviceStatus, MultiDeviceRegistry, RegistryStatus};
pub use rotation::{DeviceRotationController, RotationOutcome};

/// Placeholder for metadata a device would not report.
pub const UNKNOWN: &str = "Unknown";

/// Metadata for one attached device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub model: String,
    pub carrier: String,
    pub platform_version: String,
}

impl Device {
    /// A device with every metadata field set to [`UNKNOWN`].
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: UNKNOWN.to_string(),
            carrier: UNKNOWN.to_string(),
            platform_version: UNKNOWN.to_string(),
        }
    }

    /// Queries model, carrier and platform version.
    ///
    /// Failed or empty answers become [`UNKNOWN`]; the device is never
    /// dropped because of them.
    pub async fn query(bridge: &dyn DeviceCommandBridge, id: &str) -> Self {
        Self {
            id: id.to_string(),
            model: query_prop(bridge, id, "ro.product.model").await,
            carrier: query_prop(bridge, id, "gsm.operator.alpha").await,
            platform_version: query_prop(bridge, id, "ro.build.version.release").await,
        }
    }
}

async fn query_prop(bridge: &dyn DeviceCommandBridge, id: &str, prop: &str) -> String {
    match bridge.invoke(id, &["shell", "getprop", prop]).await {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        Ok(_) => UNKNOWN.to_string(),
        Err(e) => {
            debug!(device_id = id, prop, error = %e, "Metadata query failed");
            UNKNOWN.to_string()
        }
    }
}
