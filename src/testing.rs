//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::device::{AttachedDevice, DeviceCommandBridge};
use crate::error::BridgeError;
use crate::identity::Identity;
use crate::net::{PageVisitDriver, PublicIpProbe, VisitResult};

/// Probe that replays a fixed list of answers.
pub struct ScriptedProbe {
    answers: Mutex<VecDeque<Option<String>>>,
    exhausted: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    /// Once `answers` run out the probe keeps returning the last one.
    pub fn new(answers: Vec<Option<&str>>) -> Self {
        let exhausted = answers.last().cloned().flatten().map(str::to_string);
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(str::to_string)).collect()),
            exhausted,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns `None` once the scripted answers run out.
    pub fn then_none(mut self) -> Self {
        self.exhausted = None;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublicIpProbe for ScriptedProbe {
    async fn current_ip(&self) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut answers = self.answers.lock().expect("probe lock");
        match answers.pop_front() {
            Some(answer) => answer,
            None => self.exhausted.clone(),
        }
    }
}

/// Bridge that records every command and answers from a property table.
pub struct ScriptedBridge {
    devices: Vec<AttachedDevice>,
    props: HashMap<(String, String), String>,
    reject_modern: bool,
    unavailable: bool,
    commands: Mutex<Vec<String>>,
}

impl ScriptedBridge {
    pub fn with_devices(ids: &[&str]) -> Self {
        Self::with_attached(ids.iter().map(|id| AttachedDevice::new(*id, "device")).collect())
    }

    pub fn with_attached(devices: Vec<AttachedDevice>) -> Self {
        Self {
            devices,
            props: HashMap::new(),
            reject_modern: false,
            unavailable: false,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// A bridge whose tool cannot be run at all.
    pub fn unavailable() -> Self {
        let mut bridge = Self::with_devices(&[]);
        bridge.unavailable = true;
        bridge
    }

    pub fn with_prop(mut self, device_id: &str, prop: &str, value: &str) -> Self {
        self.props
            .insert((device_id.to_string(), prop.to_string()), value.to_string());
        self
    }

    /// Fails the `cmd connectivity` form so the legacy form is used.
    pub fn rejecting_modern_toggle(mut self) -> Self {
        self.reject_modern = true;
        self
    }

    /// Non-metadata commands, formatted as `"<device>: <args>"`.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("bridge lock").clone()
    }
}

#[async_trait]
impl DeviceCommandBridge for ScriptedBridge {
    async fn list_devices(&self) -> Result<Vec<AttachedDevice>, BridgeError> {
        if self.unavailable {
            return Err(BridgeError::Unavailable("adb not found".to_string()));
        }
        Ok(self.devices.clone())
    }

    async fn invoke(&self, device_id: &str, args: &[&str]) -> Result<String, BridgeError> {
        if self.unavailable {
            return Err(BridgeError::Unavailable("adb not found".to_string()));
        }

        if let ["shell", "getprop", prop] = args {
            return self
                .props
                .get(&(device_id.to_string(), prop.to_string()))
                .cloned()
                .ok_or_else(|| BridgeError::CommandFailed {
                    device_id: device_id.to_string(),
                    command: args.join(" "),
                    message: "no such property".to_string(),
                });
        }

        self.commands
            .lock()
            .expect("bridge lock")
            .push(format!("{}: {}", device_id, args.join(" ")));

        if self.reject_modern && args.starts_with(&["shell", "cmd", "connectivity"]) {
            return Ok("cmd: Can't find service: connectivity".to_string());
        }
        Ok(String::new())
    }
}

/// Driver that records visits and fails targets listed in `failures`.
pub struct ScriptedDriver {
    failures: HashMap<String, String>,
    delay: Duration,
    visits: Mutex<Vec<(String, Identity)>>,
    shutdowns: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self {
            failures: HashMap::new(),
            delay: Duration::ZERO,
            visits: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Visits whose identity key equals `key` fail with `error`.
    pub fn failing(mut self, key: &str, error: &str) -> Self {
        self.failures.insert(key.to_string(), error.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn visits(&self) -> Vec<(String, Identity)> {
        self.visits.lock().expect("driver lock").clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageVisitDriver for ScriptedDriver {
    async fn visit(&self, url: &str, identity: &Identity) -> VisitResult {
        self.visits
            .lock()
            .expect("driver lock")
            .push((url.to_string(), identity.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.failures.get(&identity.key()) {
            Some(error) => VisitResult::failed(error.clone()),
            None => VisitResult::ok(),
        }
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
