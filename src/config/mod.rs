//! Job configuration.
//!
//! Settings arrive from three places, lowest priority first: built-in
//! defaults, a YAML/JSON settings file, and `VISIT_FLEET_*` environment
//! variables. CLI flags are applied on top by the binary.

mod settings;
mod timings;

pub use settings::{ConfigError, JobSettings, StrategyKind, StrategySettings, ToggleMethod};
pub use timings::{RotationTimings, SchedulerTimings};
