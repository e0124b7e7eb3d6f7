//! Command bridge to tethered devices.
//!
//! The bridge is the only place that knows how device commands are
//! transported. [`AdbBridge`] shells out to `adb`; tests substitute scripted
//! bridges.

use std::io::ErrorKind;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::BridgeError;

/// A device as listed by the bridge, before metadata is queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedDevice {
    pub id: String,
    /// Raw bridge state, e.g. `device`, `offline`, `unauthorized`.
    pub state: String,
}

impl AttachedDevice {
    pub fn new(id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
        }
    }

    /// Only devices in the `device` state accept commands.
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

/// Runs commands on attached devices.
#[async_trait]
pub trait DeviceCommandBridge: Send + Sync {
    /// Lists every attached device, online or not.
    async fn list_devices(&self) -> Result<Vec<AttachedDevice>, BridgeError>;

    /// Runs `args` on `device_id` and returns trimmed stdout.
    async fn invoke(&self, device_id: &str, args: &[&str]) -> Result<String, BridgeError>;
}

/// Bridge backed by the Android Debug Bridge executable.
pub struct AdbBridge {
    program: String,
}

impl AdbBridge {
    pub fn new() -> Self {
        Self::with_program("adb")
    }

    /// Uses a custom `adb` path.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, BridgeError> {
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => BridgeError::Unavailable(format!(
                    "'{}' not found; install Android platform tools",
                    self.program
                )),
                _ => BridgeError::Io(e),
            })
    }
}

impl Default for AdbBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceCommandBridge for AdbBridge {
    async fn list_devices(&self) -> Result<Vec<AttachedDevice>, BridgeError> {
        let output = self.run(&["devices"]).await?;
        if !output.status.success() {
            return Err(BridgeError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn invoke(&self, device_id: &str, args: &[&str]) -> Result<String, BridgeError> {
        let mut full = vec!["-s", device_id];
        full.extend_from_slice(args);
        debug!(device_id, command = %args.join(" "), "Running device command");

        let output = self.run(&full).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BridgeError::CommandFailed {
                device_id: device_id.to_string(),
                command: args.join(" "),
                message: if stderr.is_empty() {
                    format!("exit status {}", output.status)
                } else {
                    stderr
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Parses `adb devices` output.
///
/// The header line and daemon notices (`* daemon started ...`) are skipped.
pub fn parse_device_list(stdout: &str) -> Vec<AttachedDevice> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let state = parts.next()?;
            Some(AttachedDevice::new(id, state))
        })
        .collect()
}
