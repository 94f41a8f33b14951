//! Selection finders.
//!
//! Each finder scans one transaction queue for the first request matching
//! its condition, erases it from the queue and hands it back. All finders
//! share the admission preconditions: the destination command queue is
//! empty, the request did not arrive this cycle, the bank is not waiting
//! on a refresh, and the caller's predicate accepts it.

use pimsim_common::address::mux_level;
use pimsim_common::pool::{RequestId, RequestPool};
use pimsim_common::request::{OpType, Request, RequestFlags};

use crate::controller::{MemoryController, SimCtx};

/// Result of scanning for a write-stalled read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStallScan {
    /// Nothing found; try the next finder.
    Miss,
    /// A read could pause a write but the write is mid-iteration: stall
    /// the scheduler this cycle.
    Stall,
    /// This read preempts a pausable write.
    Hit(RequestId),
}

impl MemoryController {
    /// The §-common preconditions every finder applies to a candidate.
    fn admissible(&self, request: &Request, now: u64) -> bool {
        let qid = self.queues.id_of(&request.addr);
        self.queues.queue(qid).is_empty() && request.arrival_cycle != now
    }

    fn bank_refresh_clear(&self, rank: u64, bank: u64) -> bool {
        let state = self.state.bank(rank, bank);
        !state.need_refresh && !state.refresh_queued
    }

    /// Erase position `pos` from queue `tq`, tagging the extracted request
    /// with LAST_REQUEST when no row-buffer-hit candidate remains.
    fn extract(&mut self, tq: usize, pos: usize, pool: &mut RequestPool) -> RequestId {
        let id = self.transaction_queues[tq]
            .remove(pos)
            .expect("finder position in range");
        if self.is_last_request(tq, id, pool) {
            pool.get_mut(id).flags |= RequestFlags::LAST_REQUEST;
        }
        id
    }

    /// Under relaxed close-page, a request is last when no further
    /// transaction targets the same (rank, bank, row, subarray).
    pub(crate) fn is_last_request(&self, tq: usize, id: RequestId, pool: &RequestPool) -> bool {
        match self.config.close_page {
            0 => false,
            1 => {
                let addr = pool.get(id).addr;
                !self.transaction_queues[tq].iter().any(|&other| {
                    let o = pool.get(other).addr;
                    o.rank == addr.rank
                        && o.bank == addr.bank
                        && o.row == addr.row
                        && o.subarray == addr.subarray
                })
            }
            _ => true,
        }
    }

    /// A request to an activated bank whose subarray lingers on another
    /// (row, mux) past the starvation threshold.
    pub fn find_starved_request(
        &mut self,
        tq: usize,
        ctx: &mut SimCtx<'_>,
        pred: &mut dyn FnMut(&Request) -> bool,
    ) -> Option<RequestId> {
        let now = ctx.events.current_cycle();
        let pos = self.transaction_queues[tq].iter().position(|&id| {
            let request = ctx.pool.get(id);
            let a = request.addr;
            let mux = mux_level(a.col, self.config.rb_size);
            let bank = self.state.bank(a.rank, a.bank);
            let sub = self.state.sub(a.rank, a.bank, a.subarray);
            bank.activate_queued
                && (!sub.active || sub.effective_row != a.row || sub.effective_muxed_row != mux)
                && self.bank_refresh_clear(a.rank, a.bank)
                && sub.starvation >= self.starvation_threshold
                && self.admissible(request, now)
                && pred(request)
        })?;
        Some(self.extract(tq, pos, ctx.pool))
    }

    /// A request the device can serve in its synthetic cached form.
    pub fn find_cached_request(
        &mut self,
        tq: usize,
        ctx: &mut SimCtx<'_>,
        pred: &mut dyn FnMut(&Request) -> bool,
    ) -> Option<RequestId> {
        let now = ctx.events.current_cycle();
        let pos = self.transaction_queues[tq].iter().position(|&id| {
            let request = ctx.pool.get(id);
            let probe = self.make_cached_probe(request);
            self.admissible(request, now)
                && ctx.device.is_issuable(&probe, now)
                && pred(request)
        })?;
        Some(self.extract(tq, pos, ctx.pool))
    }

    /// A read that may preempt an in-progress pausable write.
    pub fn find_write_stalled_read(
        &mut self,
        tq: usize,
        ctx: &mut SimCtx<'_>,
        pred: &mut dyn FnMut(&Request) -> bool,
    ) -> WriteStallScan {
        if !self.config.write_pausing {
            return WriteStallScan::Miss;
        }
        let now = ctx.events.current_cycle();

        let mut found: Option<(usize, bool)> = None;
        for (pos, &id) in self.transaction_queues[tq].iter().enumerate() {
            let request = ctx.pool.get(id);
            if request.op != OpType::Read {
                continue;
            }
            let a = request.addr;
            if !ctx.device.is_writing(a.rank, a.bank, a.subarray, now) {
                continue;
            }
            let mut probe = self.make_activate(request, now);
            probe.flags |= RequestFlags::PRIORITY;

            if self.bank_refresh_clear(a.rank, a.bank)
                && (ctx.device.is_issuable(request, now) || ctx.device.is_issuable(&probe, now))
                && self.admissible(request, now)
                && pred(request)
            {
                let pausable = ctx
                    .device
                    .between_write_iterations(a.rank, a.bank, a.subarray, now);
                found = Some((pos, pausable));
                break;
            }
        }

        match found {
            None => WriteStallScan::Miss,
            Some((_, false))
                if self.config.pause_mode == pimsim_common::config::PauseMode::Normal =>
            {
                WriteStallScan::Stall
            }
            Some((pos, _)) => WriteStallScan::Hit(self.extract(tq, pos, ctx.pool)),
        }
    }

    /// The cheapest path: bank activated and the subarray already holds
    /// the request's (row, mux).
    pub fn find_row_buffer_hit(
        &mut self,
        tq: usize,
        ctx: &mut SimCtx<'_>,
        pred: &mut dyn FnMut(&Request) -> bool,
    ) -> Option<RequestId> {
        let now = ctx.events.current_cycle();
        let pos = self.transaction_queues[tq].iter().position(|&id| {
            let request = ctx.pool.get(id);
            let a = request.addr;
            let mux = mux_level(a.col, self.config.rb_size);
            let bank = self.state.bank(a.rank, a.bank);
            let sub = self.state.sub(a.rank, a.bank, a.subarray);
            bank.activate_queued
                && sub.active
                && sub.effective_row == a.row
                && sub.effective_muxed_row == mux
                && self.bank_refresh_clear(a.rank, a.bank)
                && self.admissible(request, now)
                && pred(request)
        })?;
        Some(self.extract(tq, pos, ctx.pool))
    }

    /// Fallback on an activated bank, any resident row.
    pub fn find_oldest_ready_request(
        &mut self,
        tq: usize,
        ctx: &mut SimCtx<'_>,
        pred: &mut dyn FnMut(&Request) -> bool,
    ) -> Option<RequestId> {
        let now = ctx.events.current_cycle();
        let pos = self.transaction_queues[tq].iter().position(|&id| {
            let request = ctx.pool.get(id);
            let a = request.addr;
            self.state.bank(a.rank, a.bank).activate_queued
                && self.bank_refresh_clear(a.rank, a.bank)
                && self.admissible(request, now)
                && pred(request)
        })?;
        Some(self.extract(tq, pos, ctx.pool))
    }

    /// Fallback on a closed bank.
    pub fn find_closed_bank_request(
        &mut self,
        tq: usize,
        ctx: &mut SimCtx<'_>,
        pred: &mut dyn FnMut(&Request) -> bool,
    ) -> Option<RequestId> {
        let now = ctx.events.current_cycle();
        let pos = self.transaction_queues[tq].iter().position(|&id| {
            let request = ctx.pool.get(id);
            let a = request.addr;
            !self.state.bank(a.rank, a.bank).activate_queued
                && self.bank_refresh_clear(a.rank, a.bank)
                && self.admissible(request, now)
                && pred(request)
        })?;
        Some(self.extract(tq, pos, ctx.pool))
    }

    /// A COMPUTE trigger on an inactive bank.
    pub fn find_compute_request(&mut self, tq: usize, ctx: &mut SimCtx<'_>) -> Option<RequestId> {
        let now = ctx.events.current_cycle();
        let pos = self.transaction_queues[tq].iter().position(|&id| {
            let request = ctx.pool.get(id);
            let a = request.addr;
            request.op == OpType::Compute
                && !self.state.bank(a.rank, a.bank).activate_queued
                && self.bank_refresh_clear(a.rank, a.bank)
                && self.admissible(request, now)
        })?;
        Some(self.extract(tq, pos, ctx.pool))
    }

    /// A TRANSFER; no bank-state requirement.
    pub fn find_transfer_request(&mut self, tq: usize, ctx: &mut SimCtx<'_>) -> Option<RequestId> {
        let now = ctx.events.current_cycle();
        let pos = self.transaction_queues[tq].iter().position(|&id| {
            let request = ctx.pool.get(id);
            request.op == OpType::Transfer && self.admissible(request, now)
        })?;
        Some(self.extract(tq, pos, ctx.pool))
    }

    /// A LOAD_WEIGHT; no bank-state requirement.
    pub fn find_load_request(&mut self, tq: usize, ctx: &mut SimCtx<'_>) -> Option<RequestId> {
        let now = ctx.events.current_cycle();
        let pos = self.transaction_queues[tq].iter().position(|&id| {
            let request = ctx.pool.get(id);
            request.op == OpType::LoadWeight && self.admissible(request, now)
        })?;
        Some(self.extract(tq, pos, ctx.pool))
    }
}
