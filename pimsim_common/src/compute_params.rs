//! Compute-pass geometry.
//!
//! The host programs the input/kernel geometry, activation, pooling and
//! buffer depth before issuing COMPUTE transactions. While any COMPUTE is
//! in flight the block is in use and every setter refuses; the trigger
//! request captures an immutable [`ComputeParams`] snapshot at issue time,
//! so the controller never reads mutable global state.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Activation function applied after accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Activation {
    /// Rectified linear unit.
    ReLU = 0,
    /// Hyperbolic tangent.
    Tanh = 1,
    /// Logistic sigmoid.
    Sigmoid = 2,
}

impl Activation {
    /// Decode the host selector; unknown values fall back to ReLU.
    #[inline]
    pub fn from_selector(n: u64) -> Option<Self> {
        match n {
            0 => Some(Self::ReLU),
            1 => Some(Self::Tanh),
            2 => Some(Self::Sigmoid),
            _ => None,
        }
    }
}

/// Pooling mode applied after activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pooling {
    /// Average pooling.
    Average = 0,
    /// Max pooling.
    Max = 1,
}

impl Pooling {
    /// Decode the host selector; unknown values fall back to Average.
    #[inline]
    pub fn from_selector(n: u64) -> Option<Self> {
        match n {
            0 => Some(Self::Average),
            1 => Some(Self::Max),
            _ => None,
        }
    }
}

/// Immutable geometry snapshot carried by every COMPUTE trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeParams {
    /// Function selector (reserved; only 0 is defined).
    pub func_n: u64,
    /// Input rows.
    pub input_row: u64,
    /// Input columns.
    pub input_col: u64,
    /// Input channels.
    pub input_channel: u64,
    /// Input element width in bits.
    pub input_width: u64,
    /// Kernel rows.
    pub k_row: u64,
    /// Kernel columns.
    pub k_col: u64,
    /// Kernel channels (always the input channel count).
    pub k_channel: u64,
    /// Number of kernels.
    pub k_num: u64,
    /// Weight element width in bits.
    pub weight_width: u64,
    /// Array cell bit width.
    pub bit_width: u64,
    /// Activation function.
    pub act: Activation,
    /// Pooling mode.
    pub pool: Pooling,
    /// Buffer depth: slots latched per sliding window.
    pub buffer_n: u64,
}

impl Default for ComputeParams {
    fn default() -> Self {
        Self {
            func_n: 0,
            input_row: 5,
            input_col: 5,
            input_channel: 3,
            input_width: 8,
            k_row: 3,
            k_col: 3,
            k_channel: 3,
            k_num: 32,
            weight_width: 8,
            bit_width: 4,
            act: Activation::ReLU,
            pool: Pooling::Max,
            buffer_n: 4,
        }
    }
}

/// Host-side parameter block with an in-use guard.
#[derive(Debug, Clone, Default)]
pub struct ComputeSettings {
    params: ComputeParams,
    in_use: u64,
}

impl ComputeSettings {
    /// Fresh block with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// True while at least one COMPUTE pass holds the block.
    #[inline]
    pub fn in_use(&self) -> bool {
        self.in_use > 0
    }

    /// Snapshot the current parameters for a new pass and mark the block
    /// in use until [`ComputeSettings::release`].
    pub fn acquire(&mut self) -> ComputeParams {
        self.in_use += 1;
        self.params
    }

    /// A pass completed; the block becomes writable again when the last
    /// pass releases it.
    pub fn release(&mut self) {
        debug_assert!(self.in_use > 0);
        self.in_use = self.in_use.saturating_sub(1);
    }

    /// Read access for probes.
    #[inline]
    pub fn params(&self) -> &ComputeParams {
        &self.params
    }

    /// Reset everything to defaults. Refuses while in use.
    pub fn set_parameters(&mut self) -> bool {
        if self.in_use() {
            warn!("set_parameters refused: compute parameters are in use");
            return false;
        }
        self.params = ComputeParams::default();
        true
    }

    /// Program the input geometry. Refuses while in use.
    pub fn set_input(&mut self, col: u64, row: u64, channels: u64, bitwidth: u64) -> bool {
        if self.in_use() {
            warn!("set_input refused: compute parameters are in use");
            return false;
        }
        self.params.input_col = col;
        self.params.input_row = row;
        self.params.input_channel = channels;
        self.params.k_channel = channels;
        self.params.input_width = bitwidth;
        true
    }

    /// Program the kernel geometry. Refuses while in use.
    pub fn set_weight(&mut self, col: u64, row: u64, nums: u64, bitwidth: u64) -> bool {
        if self.in_use() {
            warn!("set_weight refused: compute parameters are in use");
            return false;
        }
        self.params.k_col = col;
        self.params.k_row = row;
        self.params.k_num = nums;
        self.params.weight_width = bitwidth;
        self.params.k_channel = self.params.input_channel;
        true
    }

    /// Select the function slot. Refuses while in use.
    pub fn set_func(&mut self, n: u64) -> bool {
        if self.in_use() {
            warn!("set_func refused: compute parameters are in use");
            return false;
        }
        if n != 0 {
            warn!(selector = n, "unknown function selector, keeping 0");
        }
        self.params.func_n = 0;
        true
    }

    /// Select the activation function. Refuses while in use; unknown
    /// selectors fall back to ReLU.
    pub fn set_act(&mut self, n: u64) -> bool {
        if self.in_use() {
            warn!("set_act refused: compute parameters are in use");
            return false;
        }
        self.params.act = Activation::from_selector(n).unwrap_or_else(|| {
            warn!(selector = n, "unknown activation selector, using ReLU");
            Activation::ReLU
        });
        true
    }

    /// Select the pooling mode. Refuses while in use; unknown selectors
    /// fall back to Average.
    pub fn set_pool(&mut self, n: u64) -> bool {
        if self.in_use() {
            warn!("set_pool refused: compute parameters are in use");
            return false;
        }
        self.params.pool = Pooling::from_selector(n).unwrap_or_else(|| {
            warn!(selector = n, "unknown pooling selector, using Average");
            Pooling::Average
        });
        true
    }
}
