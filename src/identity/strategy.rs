//! The identity strategy sum type driven by the job orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::multi_device::MultiDeviceRotation;
use super::proxy_pool::{ProxyPool, ProxyStats};
use super::relay_wave::{RelayStatus, RelayWave};
use super::single_device::SingleDeviceRotation;
use super::tunnel::{TunnelRotation, TunnelStatus};
use super::types::{DeviceIdentity, Identity};
use crate::config::{JobSettings, StrategyKind, StrategySettings};
use crate::device::{DeviceCommandBridge, RegistryStatus};
use crate::error::{InitError, ProxyListError};
use crate::net::{PageVisitDriver, PublicIpProbe, VisitResult};
use crate::scheduler::Task;

/// Collaborators a strategy may need at initialisation.
#[derive(Clone)]
pub struct StrategyDeps {
    pub driver: Arc<dyn PageVisitDriver>,
    pub probe: Arc<dyn PublicIpProbe>,
    pub bridge: Arc<dyn DeviceCommandBridge>,
    /// Survives across jobs.
    pub proxy_pool: Arc<ProxyPool>,
}

/// Variant-specific state.
pub enum StrategyVariant {
    ProxyPool(Arc<ProxyPool>),
    Tunnel(TunnelRotation),
    SingleDevice(SingleDeviceRotation),
    MultiDevice(MultiDeviceRotation),
    RelayWave(RelayWave),
}

/// Read-only strategy snapshot for status payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyStatus {
    ProxyPool(ProxyStats),
    Tunnel(TunnelStatus),
    SingleDevice(DeviceIdentity),
    MultiDevice(RegistryStatus),
    RelayWave(RelayStatus),
}

impl StrategyStatus {
    /// One-line summary for progress log lines.
    pub fn summary(&self) -> String {
        match self {
            StrategyStatus::ProxyPool(s) => format!("Working: {}/{}", s.available, s.total),
            StrategyStatus::Tunnel(s) => format!("Tunnel: {} | Rotations: {}", s.current, s.rotation_count),
            StrategyStatus::SingleDevice(d) => format!(
                "IP: {} | Rotations: {}",
                d.current_ip.as_deref().unwrap_or("unknown"),
                d.rotation_count
            ),
            StrategyStatus::MultiDevice(s) => format!(
                "Devices: {} | Rotations: {}",
                s.total_devices,
                s.devices.iter().map(|d| d.rotation_count).sum::<u32>()
            ),
            StrategyStatus::RelayWave(s) => {
                format!("Relays: {} | Waves: {}", s.relays, s.waves)
            }
        }
    }
}

/// A prepared identity strategy plus the driver its visits go through.
pub struct IdentityStrategy {
    variant: StrategyVariant,
    driver: Arc<dyn PageVisitDriver>,
    shut_down: AtomicBool,
}

impl IdentityStrategy {
    pub fn new(variant: StrategyVariant, driver: Arc<dyn PageVisitDriver>) -> Self {
        Self {
            variant,
            driver,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Prepares the strategy named by `settings`.
    ///
    /// # Errors
    ///
    /// Any `InitError` is fatal to job start.
    pub async fn initialize(settings: &JobSettings, deps: &StrategyDeps) -> Result<Self, InitError> {
        let rotation = settings.rotation.clone();
        let variant = match &settings.strategy {
            StrategySettings::ProxyPool { proxy_file } => {
                if let Some(path) = proxy_file {
                    match deps.proxy_pool.load_from_path(path).await {
                        Ok(_) => {}
                        Err(ProxyListError::NotFound(path)) => {
                            warn!(path = %path, "Proxy file not found, keeping current list");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                if deps.proxy_pool.is_empty().await {
                    warn!("No proxies loaded, visits will go direct");
                }
                StrategyVariant::ProxyPool(deps.proxy_pool.clone())
            }
            StrategySettings::Tunnel {
                endpoints,
                rotate_every,
            } => StrategyVariant::Tunnel(TunnelRotation::new(endpoints.clone(), *rotate_every)?),
            StrategySettings::SingleDevice {
                device_id,
                rotate_every,
                toggle,
            } => StrategyVariant::SingleDevice(
                SingleDeviceRotation::initialize(
                    deps.bridge.clone(),
                    deps.probe.clone(),
                    rotation,
                    device_id.as_deref(),
                    *rotate_every,
                    *toggle,
                )
                .await?,
            ),
            StrategySettings::MultiDevice {
                rotate_every,
                parallel,
                toggle,
            } => StrategyVariant::MultiDevice(
                MultiDeviceRotation::initialize(
                    deps.bridge.clone(),
                    deps.probe.clone(),
                    rotation,
                    *rotate_every,
                    *parallel,
                    *toggle,
                )
                .await?,
            ),
            StrategySettings::RelayWave {
                relays,
                browsers,
                tabs,
                rotate_every,
            } => StrategyVariant::RelayWave(RelayWave::new(
                relays.clone(),
                *browsers,
                *tabs,
                *rotate_every,
            )?),
        };

        info!(strategy = %settings.strategy.kind(), "Identity strategy initialised");
        Ok(Self::new(variant, deps.driver.clone()))
    }

    pub fn kind(&self) -> StrategyKind {
        match &self.variant {
            StrategyVariant::ProxyPool(_) => StrategyKind::ProxyPool,
            StrategyVariant::Tunnel(_) => StrategyKind::Tunnel,
            StrategyVariant::SingleDevice(_) => StrategyKind::SingleDevice,
            StrategyVariant::MultiDevice(_) => StrategyKind::MultiDevice,
            StrategyVariant::RelayWave(_) => StrategyKind::RelayWave,
        }
    }

    /// Whether visit outcomes feed the health tracker. Only the proxy pool
    /// tracks health, and only it retries connectivity failures directly.
    pub fn is_health_tracked(&self) -> bool {
        matches!(self.variant, StrategyVariant::ProxyPool(_))
    }

    /// Concurrency the dispatch loop may use given the configured limit.
    pub async fn max_concurrency(&self, threads: usize) -> usize {
        let limit = match &self.variant {
            StrategyVariant::Tunnel(_) => 1,
            StrategyVariant::MultiDevice(m) if m.is_parallel() => m.device_count().await,
            StrategyVariant::RelayWave(w) => w.capacity(),
            _ => threads,
        };
        limit.max(1)
    }

    /// Fixed wave size for strategies dispatched in waves.
    pub fn wave_capacity(&self) -> Option<usize> {
        match &self.variant {
            StrategyVariant::RelayWave(w) => Some(w.capacity()),
            _ => None,
        }
    }

    /// The identity for `task`, or `None` when none is available and the
    /// task should be abandoned.
    pub async fn acquire_identity(&self, _task: &Task) -> Option<Identity> {
        match &self.variant {
            StrategyVariant::ProxyPool(pool) => Some(pool.acquire().await),
            StrategyVariant::Tunnel(t) => Some(t.current().await),
            StrategyVariant::SingleDevice(d) => Some(d.current().await),
            StrategyVariant::MultiDevice(m) => m.acquire().await,
            StrategyVariant::RelayWave(w) => w.assign_wave(1).await.into_iter().next(),
        }
    }

    /// Rotates the identity when its visit threshold is reached.
    ///
    /// Rotation failures are logged inside the variant and the pre-rotation
    /// identity is returned.
    pub async fn rotate_if_due(&self, identity: Identity) -> Identity {
        match &self.variant {
            StrategyVariant::Tunnel(t) => t.rotate_if_due().await,
            StrategyVariant::SingleDevice(d) => d.rotate_if_due().await,
            StrategyVariant::MultiDevice(m) => m.rotate_if_due(identity).await,
            StrategyVariant::ProxyPool(_) | StrategyVariant::RelayWave(_) => identity,
        }
    }

    /// Runs one visit through the driver and counts it against the
    /// identity's rotation interval.
    pub async fn run_visit(&self, task: &Task, identity: &Identity) -> VisitResult {
        let result = self.driver.visit(&task.target, identity).await;

        match (&self.variant, identity) {
            (StrategyVariant::Tunnel(t), _) => t.record_visit().await,
            (StrategyVariant::SingleDevice(d), _) => d.record_visit().await,
            (StrategyVariant::MultiDevice(m), Identity::Device(device)) => {
                m.record_visit(&device.device_id).await
            }
            (StrategyVariant::RelayWave(w), _) => w.record_visits(1).await,
            _ => {}
        }

        result
    }

    /// Retries a visit with no intermediary. Not counted against any
    /// rotation interval.
    pub async fn run_direct(&self, task: &Task) -> VisitResult {
        self.driver.visit(&task.target, &Identity::Direct).await
    }

    /// Returns an exclusively held identity to its pool.
    pub async fn release(&self, identity: &Identity) {
        if let (StrategyVariant::MultiDevice(m), Identity::Device(device)) = (&self.variant, identity) {
            m.release(&device.device_id).await;
        }
    }

    /// Runs a whole wave concurrently and waits for every result.
    ///
    /// Only strategies with a [`wave_capacity`](Self::wave_capacity) run in
    /// waves; any other strategy yields no results.
    pub async fn run_wave(&self, tasks: Vec<Task>) -> Vec<(Task, Identity, VisitResult)> {
        let StrategyVariant::RelayWave(wave) = &self.variant else {
            warn!(strategy = %self.kind(), tasks = tasks.len(), "Strategy does not run in waves");
            return Vec::new();
        };
        let identities = wave.assign_wave(tasks.len()).await;

        let visits = tasks
            .iter()
            .zip(identities.iter())
            .map(|(task, identity)| self.driver.visit(&task.target, identity));
        let results = futures::future::join_all(visits).await;

        wave.record_visits(u32::try_from(results.len()).unwrap_or(u32::MAX)).await;

        tasks
            .into_iter()
            .zip(identities)
            .zip(results)
            .map(|((task, identity), result)| (task, identity, result))
            .collect()
    }

    /// Counts a retryable failure against a health-tracked identity.
    pub async fn record_failure(&self, identity: &Identity) {
        if let (StrategyVariant::ProxyPool(pool), Identity::Proxy(proxy)) = (&self.variant, identity) {
            pool.record_failure(&proxy.key()).await;
        }
    }

    pub async fn record_success(&self, identity: &Identity) {
        if let (StrategyVariant::ProxyPool(pool), Identity::Proxy(proxy)) = (&self.variant, identity) {
            pool.record_success(&proxy.key()).await;
        }
    }

    pub async fn status(&self) -> StrategyStatus {
        match &self.variant {
            StrategyVariant::ProxyPool(pool) => StrategyStatus::ProxyPool(pool.stats().await),
            StrategyVariant::Tunnel(t) => StrategyStatus::Tunnel(t.status().await),
            StrategyVariant::SingleDevice(d) => StrategyStatus::SingleDevice(d.snapshot().await),
            StrategyVariant::MultiDevice(m) => StrategyStatus::MultiDevice(m.status().await),
            StrategyVariant::RelayWave(w) => StrategyStatus::RelayWave(w.status().await),
        }
    }

    /// Releases driver sessions. Later calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.driver.shutdown().await;
        info!(strategy = %self.kind(), "Identity strategy shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
