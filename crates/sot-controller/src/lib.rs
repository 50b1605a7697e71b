//! # sot-controller
//!
//! The checkpoint/resume control loop. Drives a [`SearchStrategy`], dispatches
//! evaluations to a [`WorkerPool`], journals every state change in an
//! [`EventLog`], and persists self-consistent snapshots through a
//! [`CheckpointStore`] so a killed run can be resumed without losing
//! completed work.
//!
//! [`SearchStrategy`]: sot_strategy::SearchStrategy

mod checkpoint;
mod config;
mod controller;
mod event_log;
mod pool;

pub use checkpoint::{Checkpoint, CheckpointStore, PendingEntry, FORMAT_VERSION};
pub use config::{env_parse, ControllerConfig};
pub use controller::{ControlLoop, RunOutcome, RunStatus, StopSignal};
pub use event_log::{Event, EventLog, LogState, TerminationReason};
pub use pool::{Completion, SerialPool, ThreadPool, WorkerPool};
