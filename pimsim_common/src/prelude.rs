//! Common re-exports.
//!
//! `use pimsim_common::prelude::*;` pulls in the types nearly every
//! consumer needs without listing individual paths.

// ─── Addressing ─────────────────────────────────────────────────────
pub use crate::address::{AddressDecoder, DecodedAddress, LINE_BYTES, mux_level};

// ─── Requests ───────────────────────────────────────────────────────
pub use crate::pool::{RequestId, RequestPool};
pub use crate::request::{
    ComputeFields, DataBlock, OpType, Owner, Payload, Request, RequestFlags, RequestStatus, Slide,
    TransferFields, TransferMode,
};

// ─── Events ─────────────────────────────────────────────────────────
pub use crate::events::{Event, EventPriority, EventQueue};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, PauseMode, PowerDownMode, QueueModel, SimConfig};

// ─── Compute ────────────────────────────────────────────────────────
pub use crate::compute_params::{Activation, ComputeParams, ComputeSettings, Pooling};

// ─── Device contract ────────────────────────────────────────────────
pub use crate::device::MemoryDevice;

// ─── Errors & stats ─────────────────────────────────────────────────
pub use crate::error::{DeadlockInfo, SimError};
pub use crate::stats::SimStats;
