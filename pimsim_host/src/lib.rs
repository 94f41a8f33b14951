//! pimsim host shim
//!
//! The thin command-submission layer between a host core and the memory
//! controller: a bounded command FIFO, op-letter entry points, cycle
//! stepping and the completion sink. The `pimsim` binary drives it from a
//! configuration file and an optional trace.
//!
//! # Module Structure
//!
//! - [`sim`] - `HostSim`: the simulator facade
//! - [`trace`] - Trace-file parsing for the CLI

pub mod sim;
pub mod trace;

pub use sim::{CompletionRecord, HostSim};
