//! visit-fleet: schedule page-visit batches across rotating network identities.
//!
//! A job expands a target list into a cycle-major task queue and runs it on a
//! bounded worker pool. Every visit goes out through an identity supplied by
//! one of five strategies (proxy pool, tunnel, single device, device fleet,
//! relay wave); the scheduler only sees the common [`IdentityStrategy`]
//! surface.

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod net;
pub mod scheduler;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{JobSettings, StrategySettings};
pub use error::{BridgeError, InitError, JobError, ProbeError, ProxyListError, RotationError};
pub use identity::{Identity, IdentityStrategy, StrategyDeps};
pub use scheduler::{JobEvent, JobOrchestrator, JobPhase, JobSnapshot, ProgressSink};
