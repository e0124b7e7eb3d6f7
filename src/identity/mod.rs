//! Network identities and the strategies that hand them out.
//!
//! # Strategies
//!
//! | Strategy        | Identity              | Rotation trigger             |
//! |-----------------|-----------------------|------------------------------|
//! | `proxy_pool`    | random healthy proxy  | health tracker quarantine    |
//! | `tunnel`        | one named endpoint    | round-robin every N visits   |
//! | `single_device` | one tethered device   | connectivity toggle every N  |
//! | `multi_device`  | device fleet          | per-device toggle every N    |
//! | `relay_wave`    | (relay, browser, tab) | relay offset every N visits  |
//!
//! [`IdentityStrategy`] wraps the variant state and the page-visit driver and
//! is the only type the scheduler talks to.

mod health;
mod multi_device;
mod proxy_pool;
mod relay_wave;
mod single_device;
mod strategy;
mod tunnel;
mod types;

pub use health::{HealthRecord, HealthTracker, DEFAULT_COOLDOWN, DEFAULT_FAIL_THRESHOLD};
pub use multi_device::MultiDeviceRotation;
pub use proxy_pool::{parse_json_list, parse_text_list, ProxyPool, ProxyStats};
pub use relay_wave::{RelayStatus, RelayWave};
pub use single_device::SingleDeviceRotation;
pub use strategy::{IdentityStrategy, StrategyDeps, StrategyStatus, StrategyVariant};
pub use tunnel::{TunnelRotation, TunnelStatus};
pub use types::{
    DeviceIdentity, Identity, ProxyEndpoint, RelayService, RelaySlot, TunnelEndpoint,
};
