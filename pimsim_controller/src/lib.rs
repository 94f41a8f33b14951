//! pimsim memory controller
//!
//! The scheduling and state-machine core of the simulator: turns a stream
//! of host transactions into a legal, ordered stream of device commands
//! across ranks, banks and subarrays, honoring per-bank state, starvation
//! avoidance, refresh interleaving, write pausing, row-buffer management
//! and the multi-phase COMPUTE sliding-window pipeline.
//!
//! # Module Structure
//!
//! - [`state`] - Bank and subarray state tables
//! - [`queues`] - Command queue table and queue-id decode
//! - [`controller`] - `MemoryController`: admission, wakes, issue, cleanup
//! - `sched` - Selection finders (impl block on the controller)
//! - `expand` - Command builders and transaction expansion
//! - `compute` - Sliding-window iteration engine
//! - `refresh` - Deferred-refresh engine
//! - `power` - Opportunistic rank power management

pub mod controller;
pub mod queues;
pub mod state;

mod compute;
mod expand;
mod power;
mod refresh;
mod sched;

pub use controller::{CompletionRoute, MemoryController, SimCtx};
pub use sched::WriteStallScan;
