//! Physical-address decoding.
//!
//! A request addresses one 64-byte line. Above the line offset the fields
//! are sliced LSB to MSB as column, row, bank, rank, channel; the subarray
//! index is derived from the row (`row / mat_height`). `reverse()`
//! reassembles the same layout, so `translate` and `reverse` are inverses
//! for in-range tuples.

use serde::{Deserialize, Serialize};

/// Bytes covered by one request (one burst of the data bus).
pub const LINE_BYTES: u64 = 64;

/// A fully decoded device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecodedAddress {
    /// Row index inside the bank.
    pub row: u64,
    /// Column index inside the row.
    pub col: u64,
    /// Bank index inside the rank.
    pub bank: u64,
    /// Rank index inside the channel.
    pub rank: u64,
    /// Channel index.
    pub channel: u64,
    /// Subarray index (`row / mat_height`).
    pub subarray: u64,
}

/// Slices physical addresses into device coordinates and back.
#[derive(Debug, Clone, Copy)]
pub struct AddressDecoder {
    rows: u64,
    cols: u64,
    banks: u64,
    ranks: u64,
    channels: u64,
    mat_height: u64,
}

impl AddressDecoder {
    /// Build a decoder for the given geometry.
    ///
    /// `mat_height` is the number of rows per subarray; pass the full row
    /// count for a device without subarray partitioning.
    pub fn new(rows: u64, cols: u64, banks: u64, ranks: u64, channels: u64, mat_height: u64) -> Self {
        debug_assert!(rows > 0 && cols > 0 && banks > 0 && ranks > 0 && channels > 0);
        debug_assert!(mat_height > 0 && rows % mat_height == 0);
        Self {
            rows,
            cols,
            banks,
            ranks,
            channels,
            mat_height,
        }
    }

    /// Number of subarrays per bank.
    #[inline]
    pub fn subarray_count(&self) -> u64 {
        self.rows / self.mat_height
    }

    /// Decode a physical byte address.
    pub fn translate(&self, phys: u64) -> DecodedAddress {
        let line = phys / LINE_BYTES;
        let col = line % self.cols;
        let line = line / self.cols;
        let row = line % self.rows;
        let line = line / self.rows;
        let bank = line % self.banks;
        let line = line / self.banks;
        let rank = line % self.ranks;
        let channel = (line / self.ranks) % self.channels;
        DecodedAddress {
            row,
            col,
            bank,
            rank,
            channel,
            subarray: row / self.mat_height,
        }
    }

    /// Reassemble a physical byte address from device coordinates.
    ///
    /// The subarray field is ignored; it is a function of the row.
    pub fn reverse(&self, addr: &DecodedAddress) -> u64 {
        let line = (((addr.channel * self.ranks + addr.rank) * self.banks + addr.bank) * self.rows
            + addr.row)
            * self.cols
            + addr.col;
        line * LINE_BYTES
    }

    /// Recompute the subarray field after a row change.
    #[inline]
    pub fn subarray_of_row(&self, row: u64) -> u64 {
        row / self.mat_height
    }
}

/// Which column subset of a wide row is at the I/O sense amps.
#[inline]
pub fn mux_level(col: u64, rb_size: u64) -> u64 {
    col / rb_size
}
