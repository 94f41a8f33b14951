//! pimsim device model
//!
//! Implements the [`pimsim_common::device::MemoryDevice`] contract with a
//! rank/bank/subarray timing model: open-row discipline, per-op latencies,
//! refresh-group occupancy, pausable writes and rank power states.
//!
//! # Module Structure
//!
//! - [`timing`] - Per-op latency table derived from the configuration
//! - [`device`] - `TimingDevice`, the `MemoryDevice` implementation

pub mod device;
pub mod timing;

pub use device::{IssuedCommand, TimingDevice};
pub use timing::DeviceTiming;
