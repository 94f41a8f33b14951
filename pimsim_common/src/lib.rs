//! pimsim common library
//!
//! Shared leaf types for the pimsim workspace: the request/address model,
//! the request arena, the virtual-cycle event queue, configuration loading,
//! compute-pass parameters, statistics, and the `MemoryDevice` trait that
//! the controller drives the device model through.
//!
//! # Module Structure
//!
//! - [`address`] - Decoded address tuple and the physical-address decoder
//! - [`request`] - Request record: ops, flags, status, payloads
//! - [`pool`] - Slab arena of requests keyed by `RequestId`
//! - [`events`] - Cycle-ordered, priority-tiered event queue
//! - [`config`] - TOML configuration snapshot and validation
//! - [`compute_params`] - Convolution geometry block with in-use guard
//! - [`device`] - `MemoryDevice` trait (the controller's child contract)
//! - [`stats`] - Simulation counters and JSON dump
//! - [`error`] - Workspace-wide error type
//! - [`prelude`] - Common re-exports

pub mod address;
pub mod compute_params;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod pool;
pub mod prelude;
pub mod request;
pub mod stats;
