//! Extension worker supervision.
//!
//! Extensions run as separate processes that speak the [`beacon_rpc`] protocol over their
//! stdin/stdout. This crate finds them ([`discover`]), starts them ([`WorkerLauncher`]) and
//! keeps each one alive under its own lifecycle task ([`SupervisorHandle`]). Failures of one
//! worker never reach another.

#![warn(missing_docs)]

mod error;
mod launcher;
mod manifest;
mod policy;
mod state;
mod supervisor;

#[doc(hidden)]
pub mod test_helpers;

pub use error::{Error, Result};
pub use launcher::{BoxReader, BoxWriter, ProcessHandle, ProcessLauncher, WorkerIo, WorkerLauncher};
pub use manifest::{ExtensionSpec, MANIFEST_FILE, discover};
pub use policy::{HealthConfig, RestartPolicy};
pub use state::WorkerState;
pub use supervisor::{ReadyWorker, StateChange, SupervisorConfig, SupervisorHandle, WorkerSnapshot, WorkerStatus};
