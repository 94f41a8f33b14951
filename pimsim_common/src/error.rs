//! Workspace-wide error type.

use std::fmt;

use thiserror::Error;

use crate::address::DecodedAddress;
use crate::config::ConfigError;
use crate::request::OpType;

/// Full context of a command stuck past the deadlock timer.
#[derive(Debug, Clone)]
pub struct DeadlockInfo {
    /// Operation at the stuck queue head.
    pub op: OpType,
    /// Physical byte address.
    pub phys_addr: u64,
    /// Decoded coordinates.
    pub addr: DecodedAddress,
    /// Cycle the transaction arrived at the controller.
    pub arrival_cycle: u64,
    /// Cycle the command entered its queue.
    pub issue_cycle: u64,
    /// Cycle the timer fired.
    pub current_cycle: u64,
}

impl fmt::Display for DeadlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} at 0x{:x} (rank {} bank {} subarray {} row {} col {} channel {}) \
             queued {} issued {} now {}",
            self.op,
            self.phys_addr,
            self.addr.rank,
            self.addr.bank,
            self.addr.subarray,
            self.addr.row,
            self.addr.col,
            self.addr.channel,
            self.arrival_cycle,
            self.issue_cycle,
            self.current_cycle
        )
    }
}

/// Fatal simulator errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A command waited past the deadlock timer: a scheduling bug, not a
    /// workload property.
    #[error("command stuck past deadlock timer: {0}")]
    Deadlock(DeadlockInfo),
}
