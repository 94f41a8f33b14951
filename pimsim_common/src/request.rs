//! The universal work item.
//!
//! A `Request` is both a host transaction (READ/WRITE/LOAD_WEIGHT/COMPUTE/
//! TRANSFER) and a device command (ACTIVATE/PRECHARGE/REFRESH/compute
//! phases/...). The shared header carries the address, owner, flags and
//! timing marks; op-specific state lives in the tagged [`Payload`].

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::address::DecodedAddress;
use crate::compute_params::ComputeParams;

/// Operation carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpType {
    /// Host read.
    Read = 0,
    /// Host write.
    Write = 1,
    /// Host in-array weight load.
    LoadWeight = 2,
    /// Host compute pass trigger.
    Compute = 3,
    /// Host buffer transfer (move-in / move-out).
    Transfer = 4,
    /// Bank-group refresh.
    Refresh = 5,
    /// Open a row at the subarray sense amps.
    Activate = 6,
    /// Close the open row of one subarray.
    Precharge = 7,
    /// Close every open subarray of a bank.
    PrechargeAll = 8,
    /// Read with implicit precharge.
    ReadPrecharge = 9,
    /// Write with implicit precharge.
    WritePrecharge = 10,
    /// Read served by a cache layer, bypassing activation.
    CachedRead = 11,
    /// Write served by a cache layer, bypassing activation.
    CachedWrite = 12,
    /// Exit a rank power-down state.
    PowerUp = 13,
    /// Precharged power-down, fast exit.
    PowerDownFast = 14,
    /// Precharged power-down, slow exit.
    PowerDownSlow = 15,
    /// Active power-down (rows remain open).
    PowerDownActive = 16,
    /// Compute phase: latch the input window.
    ReadCycle = 17,
    /// Compute phase: multiply-accumulate against the array.
    RealCompute = 18,
    /// Compute phase: read back the accumulated partials.
    PostRead = 19,
    /// Compute phase: write the window result.
    WriteCycle = 20,
}

impl OpType {
    /// Parse a host op letter (case-insensitive): R/W/L/C/T.
    #[inline]
    pub fn from_char(op: char) -> Option<Self> {
        match op.to_ascii_uppercase() {
            'R' => Some(Self::Read),
            'W' => Some(Self::Write),
            'L' => Some(Self::LoadWeight),
            'C' => Some(Self::Compute),
            'T' => Some(Self::Transfer),
            _ => None,
        }
    }

    /// The implicit-precharge form of a read or write.
    #[inline]
    pub fn implicit_precharge_form(self) -> Option<Self> {
        match self {
            Self::Read => Some(Self::ReadPrecharge),
            Self::Write => Some(Self::WritePrecharge),
            _ => None,
        }
    }

    /// The cache-bypass form of a read or write.
    #[inline]
    pub fn cached_form(self) -> Self {
        match self {
            Self::Write => Self::CachedWrite,
            _ => Self::CachedRead,
        }
    }

    /// True for the four compute pipeline phases.
    #[inline]
    pub fn is_compute_phase(self) -> bool {
        matches!(
            self,
            Self::ReadCycle | Self::RealCompute | Self::PostRead | Self::WriteCycle
        )
    }

    /// True for rank power-state transitions.
    #[inline]
    pub fn is_power_op(self) -> bool {
        matches!(
            self,
            Self::PowerUp | Self::PowerDownFast | Self::PowerDownSlow | Self::PowerDownActive
        )
    }
}

/// Completion state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RequestStatus {
    /// Not yet completed by the device.
    #[default]
    Incomplete = 0,
    /// Rejected, to be retried by the issuer.
    Retry = 1,
    /// Completed; timing marks are final.
    Complete = 2,
}

bitflags! {
    /// Per-request marker flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestFlags: u8 {
        /// Sent to the device; swept from its command queue next cycle.
        const ISSUED = 0x01;
        /// No further row-buffer-hit candidate follows in the transaction
        /// queue; enables the implicit-precharge optimization.
        const LAST_REQUEST = 0x02;
        /// May preempt an in-progress pausable write.
        const PRIORITY = 0x04;
    }
}

impl Default for RequestFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Direction of a TRANSFER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferMode {
    /// Move data into the compute buffer.
    MoveIn = 0,
    /// Move data out of the compute buffer.
    MoveOut = 1,
}

impl TransferMode {
    /// Parse a transfer mode letter (case-insensitive): I/O.
    #[inline]
    pub fn from_char(mode: char) -> Option<Self> {
        match mode.to_ascii_uppercase() {
            'I' => Some(Self::MoveIn),
            'O' => Some(Self::MoveOut),
            _ => None,
        }
    }
}

/// Sliding direction of a compute pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Slide {
    /// Row-major: the window walks columns, the outer sweep walks rows.
    X = 0,
    /// Column-major: the window walks rows, the outer sweep walks columns.
    Y = 1,
}

impl Slide {
    /// Parse a slide letter (case-insensitive): X/Y.
    #[inline]
    pub fn from_char(slide: char) -> Option<Self> {
        match slide.to_ascii_uppercase() {
            'X' => Some(Self::X),
            'Y' => Some(Self::Y),
            _ => None,
        }
    }
}

/// Who created a request and is responsible for freeing it on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// The host shim; completions surface through its callback.
    Host,
    /// The controller; completions are dropped silently.
    Controller,
}

/// 64-byte opaque data payload.
///
/// Data bytes flow through the simulator unmodified; the block exists so
/// timing-accurate transfers carry a realistic burst.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DataBlock(pub [u8; 64]);

impl DataBlock {
    /// Spread a 64-bit word over the low bytes, little-endian.
    pub fn from_word(mut word: u64) -> Self {
        let mut raw = [0u8; 64];
        for byte in raw.iter_mut().take(8) {
            *byte = (word % 256) as u8;
            word /= 256;
        }
        Self(raw)
    }
}

const_assert_eq!(core::mem::size_of::<DataBlock>(), 64);

impl Default for DataBlock {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl core::fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "DataBlock({:02x?}..)", &self.0[..8])
    }
}

/// Sliding-window state of a COMPUTE pass.
///
/// The geometry snapshot is captured from the host's compute parameters at
/// issue time; the cursor fields (`row`, `col`, `buffer_*`, `*_complete`)
/// are owned by the controller's window engine.
#[derive(Debug, Clone, Copy)]
pub struct ComputeFields {
    /// Input base address (physical).
    pub input_phys: u64,
    /// Input base address, decoded.
    pub input: DecodedAddress,
    /// Output base address (physical).
    pub output_phys: u64,
    /// Output base address, decoded.
    pub output: DecodedAddress,
    /// Sliding direction.
    pub slide: Slide,
    /// Geometry snapshot for this pass.
    pub params: ComputeParams,
    /// Buffer slots of the current window.
    pub buffer_size: u64,
    /// Remaining iterations in the current window.
    pub buffer_n: u64,
    /// Sub-iteration counter inside one buffer step.
    pub cycle_n: u64,
    /// Window row cursor (1-based).
    pub row: u64,
    /// Window column cursor (1-based).
    pub col: u64,
    /// The device observes an intermediate step (true) or a window-final
    /// step (false).
    pub is_buffer: bool,
    /// The open row is logically reused from the previous window.
    pub is_reused: bool,
    /// The inner sweep of the current outer step is exhausted.
    pub col_complete: bool,
    /// The outer sweep is exhausted.
    pub row_complete: bool,
}

impl ComputeFields {
    /// Fresh compute state for a trigger at the given bases.
    pub fn new(
        input_phys: u64,
        input: DecodedAddress,
        output_phys: u64,
        output: DecodedAddress,
        slide: Slide,
        params: ComputeParams,
    ) -> Self {
        Self {
            input_phys,
            input,
            output_phys,
            output,
            slide,
            params,
            buffer_size: params.buffer_n,
            buffer_n: 0,
            cycle_n: 0,
            row: 1,
            col: 1,
            is_buffer: false,
            is_reused: false,
            col_complete: false,
            row_complete: false,
        }
    }
}

/// TRANSFER direction and size.
#[derive(Debug, Clone, Copy)]
pub struct TransferFields {
    /// Move-in or move-out.
    pub mode: TransferMode,
    /// Transfer size in bits.
    pub size: u64,
}

/// Op-specific request state.
#[derive(Debug, Clone, Copy)]
pub enum Payload {
    /// Plain memory operation.
    None,
    /// COMPUTE trigger or compute phase command.
    Compute(ComputeFields),
    /// TRANSFER operation.
    Transfer(TransferFields),
}

impl Payload {
    /// Borrow the compute state, if any.
    #[inline]
    pub fn compute(&self) -> Option<&ComputeFields> {
        match self {
            Payload::Compute(f) => Some(f),
            _ => None,
        }
    }

    /// Mutably borrow the compute state, if any.
    #[inline]
    pub fn compute_mut(&mut self) -> Option<&mut ComputeFields> {
        match self {
            Payload::Compute(f) => Some(f),
            _ => None,
        }
    }
}

/// The universal work item flowing host → controller → device.
#[derive(Debug, Clone)]
pub struct Request {
    /// Operation.
    pub op: OpType,
    /// Completion state.
    pub status: RequestStatus,
    /// Marker flags.
    pub flags: RequestFlags,
    /// Physical byte address.
    pub phys_addr: u64,
    /// Decoded device coordinates.
    pub addr: DecodedAddress,
    /// Cycle the request entered the controller.
    pub arrival_cycle: u64,
    /// Cycle the request entered a command queue (deadlock reference).
    pub issue_cycle: u64,
    /// Cycle the device completed the request.
    pub completion_cycle: u64,
    /// Responsible for freeing on completion.
    pub owner: Owner,
    /// Host thread that produced the request.
    pub thread_id: u64,
    /// Opaque data payload.
    pub data: DataBlock,
    /// Op-specific state.
    pub payload: Payload,
}

impl Request {
    /// A host-owned request with empty payload.
    pub fn host(op: OpType, phys_addr: u64, data: u64, thread_id: u64) -> Self {
        Self {
            op,
            status: RequestStatus::Incomplete,
            flags: RequestFlags::empty(),
            phys_addr,
            addr: DecodedAddress::default(),
            arrival_cycle: 0,
            issue_cycle: 0,
            completion_cycle: 0,
            owner: Owner::Host,
            thread_id,
            data: DataBlock::from_word(data),
            payload: Payload::None,
        }
    }

    /// True when the issued-sweep may remove this entry.
    #[inline]
    pub fn was_issued(&self) -> bool {
        self.flags.contains(RequestFlags::ISSUED)
    }
}
