//! Command-line interface for visit-fleet.
//!
//! Provides the `run` job command plus device and network maintenance
//! commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
