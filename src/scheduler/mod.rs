//! Job scheduling: batch admission, dispatch, and progress reporting.
//!
//! - **BatchSpec / Task**: a validated target list expanded into a
//!   cycle-major task queue
//! - **JobOrchestrator**: the `Idle → Running → Stopping → Idle` state
//!   machine and its dispatch loop
//! - **VisitOutcome**: classification of visit results
//! - **JobEvent / ProgressSink**: status and progress events
//!
//! # Dispatch
//!
//! ```text
//!            ┌──────────── stagger ────────────┐
//!            │                                 │
//!   queue ──►│ pop ─► spawn worker ─► (active < max?)──no──► wait on
//!            │                                 │            completion
//!            └─────────────────────────────────┘            channel
//!                                                              │
//!   worker: acquire ─► rotate_if_due ─► visit ─► classify ─► finish_task
//!                                                              │
//!                                         counters, progress, drain check
//! ```
//!
//! Strategies with a fixed wave capacity skip the stagger loop: up to
//! `capacity` tasks are run together, then the loop waits the wave cooldown.

pub mod job;
pub mod orchestrator;
pub mod outcome;
pub mod progress;

pub use job::{parse_targets, BatchSpec, JobPhase, Task};
pub use orchestrator::{JobCounters, JobOrchestrator, JobSnapshot};
pub use outcome::VisitOutcome;
pub use progress::{
    compute_progress, ChannelSink, JobEvent, JobStatus, ProgressReport, ProgressSink, TracingSink,
};
