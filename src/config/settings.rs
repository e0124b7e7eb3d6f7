//! Job settings and strategy selection.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::timings::{RotationTimings, SchedulerTimings};
use crate::identity::{RelayService, TunnelEndpoint};

/// Default number of visits between identity rotations.
const DEFAULT_ROTATE_EVERY: u32 = 10;

/// Default browser instance count for relay waves.
const DEFAULT_RELAY_BROWSERS: usize = 3;

/// Default tab count per browser for relay waves.
const DEFAULT_RELAY_TABS: usize = 5;

/// Tunnel endpoints used when none are configured.
const DEFAULT_TUNNEL_ENDPOINTS: [&str; 5] = ["Germany", "Netherlands", "USA", "UK", "France"];

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Settings file could not be parsed.
    #[error("Failed to parse settings file '{path}': {message}")]
    Parse { path: String, message: String },

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a device toggles its connectivity to obtain a new address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleMethod {
    /// Airplane mode on, then off. Resets every radio.
    #[default]
    AirplaneMode,
    /// Mobile data off, then on. Leaves Wi-Fi and calls alone.
    MobileData,
}

/// Which identity strategy a job uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    ProxyPool,
    Tunnel,
    SingleDevice,
    MultiDevice,
    RelayWave,
}

impl StrategyKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ProxyPool => "proxy_pool",
            StrategyKind::Tunnel => "tunnel",
            StrategyKind::SingleDevice => "single_device",
            StrategyKind::MultiDevice => "multi_device",
            StrategyKind::RelayWave => "relay_wave",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy-specific settings, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySettings {
    ProxyPool {
        /// Proxy list to (re)load at job start. The pool keeps its current
        /// list when absent.
        #[serde(default)]
        proxy_file: Option<PathBuf>,
    },
    Tunnel {
        #[serde(default = "default_tunnel_endpoints")]
        endpoints: Vec<TunnelEndpoint>,
        #[serde(default = "default_rotate_every")]
        rotate_every: u32,
    },
    SingleDevice {
        /// Use this device instead of the first one attached.
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default = "default_rotate_every")]
        rotate_every: u32,
        #[serde(default)]
        toggle: ToggleMethod,
    },
    MultiDevice {
        #[serde(default = "default_rotate_every")]
        rotate_every: u32,
        /// Use every device at once instead of round-robin.
        #[serde(default)]
        parallel: bool,
        #[serde(default)]
        toggle: ToggleMethod,
    },
    RelayWave {
        #[serde(default)]
        relays: Vec<RelayService>,
        #[serde(default = "default_relay_browsers")]
        browsers: usize,
        #[serde(default = "default_relay_tabs")]
        tabs: usize,
        #[serde(default = "default_rotate_every")]
        rotate_every: u32,
    },
}

impl Default for StrategySettings {
    fn default() -> Self {
        StrategySettings::ProxyPool { proxy_file: None }
    }
}

impl StrategySettings {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategySettings::ProxyPool { .. } => StrategyKind::ProxyPool,
            StrategySettings::Tunnel { .. } => StrategyKind::Tunnel,
            StrategySettings::SingleDevice { .. } => StrategyKind::SingleDevice,
            StrategySettings::MultiDevice { .. } => StrategyKind::MultiDevice,
            StrategySettings::RelayWave { .. } => StrategyKind::RelayWave,
        }
    }

    /// Rotation interval, for strategies that rotate.
    pub fn rotate_every(&self) -> Option<u32> {
        match self {
            StrategySettings::ProxyPool { .. } => None,
            StrategySettings::Tunnel { rotate_every, .. }
            | StrategySettings::SingleDevice { rotate_every, .. }
            | StrategySettings::MultiDevice { rotate_every, .. }
            | StrategySettings::RelayWave { rotate_every, .. } => Some(*rotate_every),
        }
    }

    /// Overrides the rotation interval. No-op for the proxy pool.
    pub fn set_rotate_every(&mut self, value: u32) {
        match self {
            StrategySettings::ProxyPool { .. } => {}
            StrategySettings::Tunnel { rotate_every, .. }
            | StrategySettings::SingleDevice { rotate_every, .. }
            | StrategySettings::MultiDevice { rotate_every, .. }
            | StrategySettings::RelayWave { rotate_every, .. } => *rotate_every = value,
        }
    }

    pub fn tunnel_defaults() -> Self {
        StrategySettings::Tunnel {
            endpoints: default_tunnel_endpoints(),
            rotate_every: DEFAULT_ROTATE_EVERY,
        }
    }

    pub fn single_device_defaults() -> Self {
        StrategySettings::SingleDevice {
            device_id: None,
            rotate_every: DEFAULT_ROTATE_EVERY,
            toggle: ToggleMethod::default(),
        }
    }

    pub fn multi_device_defaults(parallel: bool) -> Self {
        StrategySettings::MultiDevice {
            rotate_every: DEFAULT_ROTATE_EVERY,
            parallel,
            toggle: ToggleMethod::default(),
        }
    }

    pub fn relay_wave_defaults(relays: Vec<RelayService>) -> Self {
        StrategySettings::RelayWave {
            relays,
            browsers: DEFAULT_RELAY_BROWSERS,
            tabs: DEFAULT_RELAY_TABS,
            rotate_every: DEFAULT_ROTATE_EVERY,
        }
    }
}

/// Settings for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Concurrency limit. Strategies may clamp or override it.
    pub threads: usize,
    pub strategy: StrategySettings,
    pub timings: SchedulerTimings,
    pub rotation: RotationTimings,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            threads: 1,
            strategy: StrategySettings::default(),
            timings: SchedulerTimings::default(),
            rotation: RotationTimings::default(),
        }
    }
}

impl JobSettings {
    pub fn new(strategy: StrategySettings) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_timings(mut self, timings: SchedulerTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_rotation(mut self, rotation: RotationTimings) -> Self {
        self.rotation = rotation;
        self
    }

    /// Loads settings from a YAML or JSON file (chosen by extension).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            serde_json::from_str(&raw).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&raw).map_err(|e| e.to_string())
        };

        parsed.map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    /// Applies environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `VISIT_FLEET_THREADS`: concurrency limit
    /// - `VISIT_FLEET_ROTATE_EVERY`: visits between rotations
    /// - `VISIT_FLEET_STAGGER_MS`: pause between worker launches
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("VISIT_FLEET_THREADS") {
            self.threads = parse_env_value(&val, "VISIT_FLEET_THREADS")?;
        }

        if let Ok(val) = std::env::var("VISIT_FLEET_ROTATE_EVERY") {
            let every = parse_env_value(&val, "VISIT_FLEET_ROTATE_EVERY")?;
            self.strategy.set_rotate_every(every);
        }

        if let Ok(val) = std::env::var("VISIT_FLEET_STAGGER_MS") {
            self.timings.stagger_ms = parse_env_value(&val, "VISIT_FLEET_STAGGER_MS")?;
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::ValidationFailed(
                "threads must be greater than 0".to_string(),
            ));
        }

        if self.strategy.rotate_every() == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "rotate_every must be greater than 0".to_string(),
            ));
        }

        if self.rotation.probe_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "probe_attempts must be greater than 0".to_string(),
            ));
        }

        match &self.strategy {
            StrategySettings::Tunnel { endpoints, .. } if endpoints.is_empty() => {
                Err(ConfigError::ValidationFailed(
                    "tunnel endpoints cannot be empty".to_string(),
                ))
            }
            StrategySettings::RelayWave {
                relays,
                browsers,
                tabs,
                ..
            } => {
                if relays.is_empty() {
                    return Err(ConfigError::ValidationFailed(
                        "relays cannot be empty".to_string(),
                    ));
                }
                if *browsers == 0 || *tabs == 0 {
                    return Err(ConfigError::ValidationFailed(
                        "browsers and tabs must be greater than 0".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn default_rotate_every() -> u32 {
    DEFAULT_ROTATE_EVERY
}

fn default_relay_browsers() -> usize {
    DEFAULT_RELAY_BROWSERS
}

fn default_relay_tabs() -> usize {
    DEFAULT_RELAY_TABS
}

fn default_tunnel_endpoints() -> Vec<TunnelEndpoint> {
    DEFAULT_TUNNEL_ENDPOINTS
        .iter()
        .map(|name| TunnelEndpoint::named(*name))
        .collect()
}

/// Parse an environment variable value.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
