//! The controller's child contract.
//!
//! The memory controller never manipulates device timing directly; it
//! probes and drives whatever sits below it through this trait. The real
//! implementation lives in `pimsim_device`; tests substitute simpler
//! models.

use crate::events::EventQueue;
use crate::pool::{RequestId, RequestPool};
use crate::request::Request;

/// A rank/bank/subarray device model that honors per-command timing.
pub trait MemoryDevice {
    /// Can `request` be sent to the device at `now`?
    ///
    /// A `false` here is not an error: the command stays at its queue head
    /// and is retried on the next wake.
    fn is_issuable(&self, request: &Request, now: u64) -> bool;

    /// Earliest cycle at which `request` could become issuable. Used to
    /// place the next command wake; a conservative answer only costs an
    /// extra wake.
    fn next_issuable_cycle(&self, request: &Request, now: u64) -> u64;

    /// Consume the command: apply its state transitions and schedule its
    /// completion on the event queue.
    fn issue(&mut self, pool: &mut RequestPool, id: RequestId, now: u64, events: &mut EventQueue);

    /// Catch the device-local clock up by `steps` controller cycles.
    fn cycle(&mut self, steps: u64);

    /// A write burst is in progress on this subarray.
    fn is_writing(&self, rank: u64, bank: u64, subarray: u64, now: u64) -> bool;

    /// The in-progress write sits on an iteration boundary where it can be
    /// paused without losing the current pulse.
    fn between_write_iterations(&self, rank: u64, bank: u64, subarray: u64, now: u64) -> bool;

    /// No bank of the rank has an open row.
    fn rank_idle(&self, rank: u64) -> bool;
}
