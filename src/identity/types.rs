//! Identity value types shared by every strategy.
//!
//! An [`Identity`] is what a worker hands to the page-visit driver: the
//! network route a single visit should appear to originate from.

use serde::{Deserialize, Serialize};

use crate::device::Device;

/// A network identity handed to one visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    /// No intermediary; the host's own connection.
    Direct,
    /// An HTTP proxy from the pool.
    Proxy(ProxyEndpoint),
    /// A named tunnel endpoint.
    Tunnel(TunnelEndpoint),
    /// A tethered device.
    Device(DeviceIdentity),
    /// A relay service slot within a wave.
    Relay(RelaySlot),
}

impl Identity {
    /// Key used for health bookkeeping and log correlation.
    pub fn key(&self) -> String {
        match self {
            Identity::Direct => "direct".to_string(),
            Identity::Proxy(p) => p.key(),
            Identity::Tunnel(t) => t.name.clone(),
            Identity::Device(d) => d.device_id.clone(),
            Identity::Relay(r) => format!("{}#b{}t{}", r.relay.name, r.browser + 1, r.tab + 1),
        }
    }

    /// Short human-readable route description for progress log lines.
    pub fn describe(&self) -> String {
        match self {
            Identity::Direct => "Direct".to_string(),
            Identity::Proxy(p) => format!("proxy {}", p.host),
            Identity::Tunnel(t) => format!("tunnel {}", t.name),
            Identity::Device(d) => format!(
                "device {} ({})",
                d.model,
                d.current_ip.as_deref().unwrap_or("IP unknown")
            ),
            Identity::Relay(r) => format!(
                "relay {} [B{}-T{}]",
                r.relay.name,
                r.browser + 1,
                r.tab + 1
            ),
        }
    }

    /// Returns true for the direct (no intermediary) identity.
    pub fn is_direct(&self) -> bool {
        matches!(self, Identity::Direct)
    }
}

/// An HTTP proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    #[serde(alias = "ip")]
    pub host: String,
    pub port: u16,
    #[serde(default, alias = "user", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, alias = "pass", skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Health records are keyed by host, so two ports on one host share a
    /// breaker.
    pub fn key(&self) -> String {
        self.host.clone()
    }

    /// Proxy server URL in the `http://host:port` form drivers expect.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// A named tunnel endpoint such as a VPN exit location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelEndpoint {
    pub name: String,
    /// Local proxy URL that routes through this endpoint, when the tunnel
    /// client exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

impl TunnelEndpoint {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            proxy_url: None,
        }
    }
}

/// Snapshot of a tethered device as used by one visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub model: String,
    pub carrier: String,
    pub current_ip: Option<String>,
    pub visits_since_rotation: u32,
    pub rotation_count: u32,
}

impl DeviceIdentity {
    pub fn from_device(device: &Device) -> Self {
        Self {
            device_id: device.id.clone(),
            model: device.model.clone(),
            carrier: device.carrier.clone(),
            current_ip: None,
            visits_since_rotation: 0,
            rotation_count: 0,
        }
    }
}

/// A relay service: a public gateway that fetches a target on the caller's
/// behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayService {
    pub name: String,
    /// URL template; `{url}` is replaced with the url-encoded target.
    pub url_template: String,
}

impl RelayService {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
        }
    }

    /// Builds the relay URL for a target. Templates without a `{url}`
    /// placeholder get the encoded target appended.
    pub fn wrap(&self, target: &str) -> String {
        let encoded = urlencoding::encode(target);
        if self.url_template.contains("{url}") {
            self.url_template.replace("{url}", &encoded)
        } else {
            format!("{}{}", self.url_template, encoded)
        }
    }
}

/// One (relay, browser instance, tab slot) assignment inside a wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySlot {
    pub relay: RelayService,
    pub browser: usize,
    pub tab: usize,
}
