//! Error types for visit-fleet operations.
//!
//! Defines the error types for every fallible subsystem:
//! - Job admission (start/stop lifecycle)
//! - Identity strategy initialisation
//! - Device bridge commands and device rotation
//! - Public IP probing
//! - Proxy list loading
//!
//! Per-visit failures are deliberately absent: they are captured as
//! [`VisitOutcome`](crate::scheduler::VisitOutcome) values and never
//! propagate as `Err`.

use thiserror::Error;

/// Errors returned synchronously by `start_job`.
///
/// Any of these leaves the orchestrator in `Idle` (or untouched when a job is
/// already running).
#[derive(Debug, Error)]
pub enum JobError {
    #[error("A job is already running")]
    AlreadyRunning,

    #[error("Malformed batch: {0}")]
    MalformedBatch(String),

    #[error("Strategy initialisation failed: {0}")]
    Init(#[from] InitError),
}

/// Errors raised while preparing an identity strategy for a job.
///
/// These are fatal to job start.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("No device connected")]
    DeviceNotConnected,

    #[error("Device '{0}' is not attached or is offline")]
    DeviceNotFound(String),

    #[error("Device bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("No devices discovered")]
    NoDevices,

    #[error("Strategy '{strategy}' has no identities configured")]
    EmptyIdentityList { strategy: String },

    #[error("Proxy list error: {0}")]
    ProxyList(#[from] ProxyListError),

    #[error("Invalid strategy configuration: {0}")]
    InvalidConfig(String),
}

/// Errors from the external device command tool.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Device command tool unavailable: {0}")]
    Unavailable(String),

    #[error("Command '{command}' failed on device '{device_id}': {message}")]
    CommandFailed {
        device_id: String,
        command: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns true when the tool itself could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BridgeError::Unavailable(_))
    }
}

/// Errors that can occur while rotating a device's network identity.
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("Device '{0}' is not connected")]
    NotConnected(String),

    #[error("Device command tool unreachable: {0}")]
    ToolUnreachable(String),

    #[error("Connectivity toggle failed on '{device_id}': {message}")]
    ToggleFailed { device_id: String, message: String },

    #[error("No public IP observed after {attempts} attempts")]
    NoIpObserved { attempts: u32 },
}

impl From<BridgeError> for RotationError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Unavailable(msg) => RotationError::ToolUnreachable(msg),
            BridgeError::CommandFailed {
                device_id, message, ..
            } => RotationError::ToggleFailed { device_id, message },
            BridgeError::Io(e) => RotationError::ToolUnreachable(e.to_string()),
        }
    }
}

/// Errors that can occur while looking up the public IP.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse probe response: {0}")]
    ParseError(String),
}

/// Errors that can occur while loading a proxy list.
#[derive(Debug, Error)]
pub enum ProxyListError {
    #[error("Proxy file '{0}' not found")]
    NotFound(String),

    #[error("Invalid proxy line {line}: '{content}'")]
    InvalidLine { line: usize, content: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
