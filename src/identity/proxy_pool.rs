//! Shared HTTP proxy pool with per-host health tracking.
//!
//! The pool outlives individual jobs: it is constructed once by the caller,
//! handed to the orchestrator behind an `Arc`, and refreshed whenever a job
//! names a proxy file. Loading a list always clears the health records.

use std::path::Path;
use std::time::Instant;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::health::HealthTracker;
use super::types::{Identity, ProxyEndpoint};
use crate::error::ProxyListError;

/// Pool counters reported in status payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProxyStats {
    pub total: usize,
    /// Proxies at or over the failure threshold.
    pub failing: usize,
    /// Proxies eligible for selection right now.
    pub available: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    proxies: Vec<ProxyEndpoint>,
    health: HealthTracker,
}

#[derive(Debug, Default)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_proxies(proxies: Vec<ProxyEndpoint>) -> Self {
        Self::with_health(proxies, HealthTracker::new())
    }

    /// Uses a custom health policy.
    pub fn with_health(proxies: Vec<ProxyEndpoint>, health: HealthTracker) -> Self {
        Self {
            state: Mutex::new(PoolState { proxies, health }),
        }
    }

    /// Replaces the proxy list and clears every health record.
    pub async fn replace(&self, proxies: Vec<ProxyEndpoint>) {
        let mut state = self.state.lock().await;
        state.proxies = proxies;
        state.health.reset();
    }

    /// Loads a proxy file, JSON (by `.json` extension) or `host:port[:user:pass]`
    /// text. Returns the number of proxies loaded.
    pub async fn load_from_path(&self, path: impl AsRef<Path>) -> Result<usize, ProxyListError> {
        let path = path.as_ref();
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProxyListError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let proxies = if is_json {
            parse_json_list(&raw)?
        } else {
            parse_text_list(&raw)?
        };

        let count = proxies.len();
        self.replace(proxies).await;
        info!(path = %path.display(), count, "Proxy list loaded");
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.proxies.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Picks a proxy uniformly at random among the eligible ones.
    ///
    /// An empty pool yields [`Identity::Direct`]. When every proxy is
    /// quarantined the health records are dropped and the pick is made from
    /// the whole list.
    pub async fn acquire(&self) -> Identity {
        let mut state = self.state.lock().await;
        if state.proxies.is_empty() {
            return Identity::Direct;
        }

        let now = Instant::now();
        let PoolState { proxies, health } = &mut *state;
        let eligible: Vec<&ProxyEndpoint> = proxies
            .iter()
            .filter(|p| health.is_eligible(&p.key(), now))
            .collect();

        let mut rng = rand::rng();
        let picked = match eligible.choose(&mut rng) {
            Some(proxy) => (*proxy).clone(),
            None => {
                warn!(
                    total = proxies.len(),
                    "All proxies quarantined, resetting health records"
                );
                health.reset();
                match proxies.choose(&mut rng) {
                    Some(proxy) => proxy.clone(),
                    None => return Identity::Direct,
                }
            }
        };

        debug!(proxy = %picked.key(), "Proxy acquired");
        Identity::Proxy(picked)
    }

    pub async fn record_failure(&self, key: &str) -> u32 {
        self.state.lock().await.health.record_failure(key)
    }

    pub async fn record_success(&self, key: &str) {
        self.state.lock().await.health.record_success(key);
    }

    pub async fn stats(&self) -> ProxyStats {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let PoolState { proxies, health } = &mut *state;
        let available = proxies
            .iter()
            .filter(|p| health.is_eligible(&p.key(), now))
            .count();
        ProxyStats {
            total: proxies.len(),
            failing: health.failing_count(),
            available,
        }
    }
}

/// Parses a JSON array of proxy objects.
///
/// Both `ip`/`host`, `user`/`username` and `pass`/`password` are accepted;
/// ports may be numbers or numeric strings. Entries without a usable host or
/// port are skipped.
pub fn parse_json_list(raw: &str) -> Result<Vec<ProxyEndpoint>, ProxyListError> {
    let entries: Vec<Value> = serde_json::from_str(raw)?;
    let total = entries.len();
    let proxies: Vec<ProxyEndpoint> = entries.iter().filter_map(proxy_from_value).collect();
    if proxies.len() < total {
        warn!(skipped = total - proxies.len(), "Skipped proxy entries without host or port");
    }
    Ok(proxies)
}

fn proxy_from_value(value: &Value) -> Option<ProxyEndpoint> {
    let text = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let host = text(&["host", "ip"])?;
    let port = match value.get("port")? {
        Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };

    let mut proxy = ProxyEndpoint::new(host, port);
    proxy.username = text(&["username", "user"]);
    proxy.password = text(&["password", "pass"]);
    Some(proxy)
}

/// Parses `host:port` or `host:port:user:pass` lines. Blank lines and `#`
/// comments are ignored.
pub fn parse_text_list(raw: &str) -> Result<Vec<ProxyEndpoint>, ProxyListError> {
    let mut proxies = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let invalid = || ProxyListError::InvalidLine {
            line: index + 1,
            content: line.to_string(),
        };

        let parts: Vec<&str> = line.split(':').collect();
        let proxy = match parts.as_slice() {
            [host, port] => ProxyEndpoint::new(*host, port.parse().map_err(|_| invalid())?),
            [host, port, user, pass] => {
                ProxyEndpoint::new(*host, port.parse().map_err(|_| invalid())?)
                    .with_credentials(*user, *pass)
            }
            _ => return Err(invalid()),
        };
        proxies.push(proxy);
    }
    Ok(proxies)
}
