//! Bank and subarray state tables.
//!
//! The controller's view of the device: which banks have an activate in
//! flight or a refresh pending, and which row each subarray holds at its
//! sense amps. An inactive subarray carries the row sentinel (one past the
//! last valid row).

/// Per-(rank, bank) controller state.
#[derive(Debug, Clone, Copy, Default)]
pub struct BankState {
    /// An ACTIVATE is in flight or a row is open in some subarray.
    pub activate_queued: bool,
    /// A REFRESH sits in the bank group's queue.
    pub refresh_queued: bool,
    /// The deferred-refresh threshold has been reached.
    pub need_refresh: bool,
}

/// Per-(rank, bank, subarray) controller state.
#[derive(Debug, Clone, Copy)]
pub struct SubarrayState {
    /// A row is resident at the sense amps.
    pub active: bool,
    /// The resident row, or the sentinel when inactive.
    pub effective_row: u64,
    /// The resident mux level, or the sentinel when inactive.
    pub effective_muxed_row: u64,
    /// Row-hit streak; crossing the threshold allows eviction.
    pub starvation: u64,
}

/// Both tables, indexed by rank/bank/subarray.
#[derive(Debug)]
pub struct StateTable {
    banks_per_rank: u64,
    subarrays_per_bank: u64,
    row_sentinel: u64,
    banks: Vec<BankState>,
    subarrays: Vec<SubarrayState>,
}

impl StateTable {
    /// Fresh table with every bank closed; `rows` becomes the sentinel.
    pub fn new(ranks: u64, banks: u64, subarrays: u64, rows: u64) -> Self {
        Self {
            banks_per_rank: banks,
            subarrays_per_bank: subarrays,
            row_sentinel: rows,
            banks: vec![BankState::default(); (ranks * banks) as usize],
            subarrays: vec![
                SubarrayState {
                    active: false,
                    effective_row: rows,
                    effective_muxed_row: rows,
                    starvation: 0,
                };
                (ranks * banks * subarrays) as usize
            ],
        }
    }

    /// The invalid-row sentinel.
    #[inline]
    pub fn row_sentinel(&self) -> u64 {
        self.row_sentinel
    }

    #[inline]
    fn bank_idx(&self, rank: u64, bank: u64) -> usize {
        (rank * self.banks_per_rank + bank) as usize
    }

    #[inline]
    fn sub_idx(&self, rank: u64, bank: u64, subarray: u64) -> usize {
        ((rank * self.banks_per_rank + bank) * self.subarrays_per_bank + subarray) as usize
    }

    /// Bank entry.
    #[inline]
    pub fn bank(&self, rank: u64, bank: u64) -> &BankState {
        &self.banks[self.bank_idx(rank, bank)]
    }

    /// Mutable bank entry.
    #[inline]
    pub fn bank_mut(&mut self, rank: u64, bank: u64) -> &mut BankState {
        let idx = self.bank_idx(rank, bank);
        &mut self.banks[idx]
    }

    /// Subarray entry.
    #[inline]
    pub fn sub(&self, rank: u64, bank: u64, subarray: u64) -> &SubarrayState {
        &self.subarrays[self.sub_idx(rank, bank, subarray)]
    }

    /// Mutable subarray entry.
    #[inline]
    pub fn sub_mut(&mut self, rank: u64, bank: u64, subarray: u64) -> &mut SubarrayState {
        let idx = self.sub_idx(rank, bank, subarray);
        &mut self.subarrays[idx]
    }

    /// Latch `row`/`mux` as the resident content of a subarray.
    pub fn open_subarray(&mut self, rank: u64, bank: u64, subarray: u64, row: u64, mux: u64) {
        let sub = self.sub_mut(rank, bank, subarray);
        sub.active = true;
        sub.effective_row = row;
        sub.effective_muxed_row = mux;
    }

    /// Return a subarray to the closed sentinel state.
    pub fn close_subarray(&mut self, rank: u64, bank: u64, subarray: u64) {
        let sentinel = self.row_sentinel;
        let sub = self.sub_mut(rank, bank, subarray);
        sub.active = false;
        sub.effective_row = sentinel;
        sub.effective_muxed_row = sentinel;
    }

    /// Close every subarray of a bank and clear its activate flag.
    pub fn close_bank(&mut self, rank: u64, bank: u64) {
        for subarray in 0..self.subarrays_per_bank {
            self.close_subarray(rank, bank, subarray);
        }
        self.bank_mut(rank, bank).activate_queued = false;
    }

    /// Any subarray of the bank still holds a row.
    pub fn any_subarray_active(&self, rank: u64, bank: u64) -> bool {
        (0..self.subarrays_per_bank).any(|subarray| self.sub(rank, bank, subarray).active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_is_closed_with_sentinel_rows() {
        let table = StateTable::new(2, 8, 4, 8192);
        assert!(!table.bank(1, 7).activate_queued);
        let sub = table.sub(1, 7, 3);
        assert!(!sub.active);
        assert_eq!(sub.effective_row, 8192);
        assert_eq!(sub.effective_muxed_row, 8192);
    }

    #[test]
    fn open_close_roundtrip() {
        let mut table = StateTable::new(1, 2, 2, 64);
        table.bank_mut(0, 1).activate_queued = true;
        table.open_subarray(0, 1, 0, 17, 2);
        assert!(table.any_subarray_active(0, 1));
        assert_eq!(table.sub(0, 1, 0).effective_row, 17);

        table.close_subarray(0, 1, 0);
        assert!(!table.any_subarray_active(0, 1));
        assert_eq!(table.sub(0, 1, 0).effective_row, 64);
        assert!(table.bank(0, 1).activate_queued);

        table.open_subarray(0, 1, 1, 3, 0);
        table.close_bank(0, 1);
        assert!(!table.bank(0, 1).activate_queued);
        assert!(!table.sub(0, 1, 1).active);
    }
}
