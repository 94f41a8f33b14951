//! Command expansion.
//!
//! `issue_memory_commands` turns one selected transaction into the device
//! command sequence its bank state requires, by exactly one of four
//! disjoint paths: cached bypass, closed bank, row miss on an active
//! bank, or row hit. The `make_*` builders produce the controller-owned
//! commands those paths append.

use pimsim_common::address::{DecodedAddress, mux_level};
use pimsim_common::pool::RequestId;
use pimsim_common::request::{OpType, Owner, Payload, Request, RequestFlags, RequestStatus};

use crate::controller::{MemoryController, SimCtx};

impl MemoryController {
    fn blank_command(&self, op: OpType, addr: DecodedAddress, now: u64) -> Request {
        Request {
            op,
            status: RequestStatus::Incomplete,
            flags: RequestFlags::empty(),
            phys_addr: self.decoder.reverse(&addr),
            addr,
            arrival_cycle: now,
            issue_cycle: now,
            completion_cycle: 0,
            owner: Owner::Controller,
            thread_id: 0,
            data: Default::default(),
            payload: Payload::None,
        }
    }

    /// ACTIVATE opening the trigger's row.
    pub(crate) fn make_activate(&self, trigger: &Request, now: u64) -> Request {
        self.blank_command(OpType::Activate, trigger.addr, now)
    }

    /// Explicit PRECHARGE for given coordinates.
    pub(crate) fn make_precharge_at(
        &self,
        row: u64,
        bank: u64,
        rank: u64,
        subarray: u64,
        now: u64,
    ) -> Request {
        let addr = DecodedAddress {
            row,
            col: 0,
            bank,
            rank,
            channel: self.channel,
            subarray,
        };
        self.blank_command(OpType::Precharge, addr, now)
    }

    /// PRECHARGE_ALL closing every subarray of a bank.
    pub(crate) fn make_precharge_all(&self, bank: u64, rank: u64, now: u64) -> Request {
        let addr = DecodedAddress {
            row: 0,
            col: 0,
            bank,
            rank,
            channel: self.channel,
            subarray: 0,
        };
        self.blank_command(OpType::PrechargeAll, addr, now)
    }

    /// REFRESH addressed at a bank-group head.
    pub(crate) fn make_refresh(&self, bank: u64, rank: u64, now: u64) -> Request {
        let addr = DecodedAddress {
            row: 0,
            col: 0,
            bank,
            rank,
            channel: self.channel,
            subarray: 0,
        };
        self.blank_command(OpType::Refresh, addr, now)
    }

    /// Rank-addressed power transition.
    pub(crate) fn make_power_op(&self, op: OpType, rank: u64, now: u64) -> Request {
        debug_assert!(op.is_power_op());
        let addr = DecodedAddress {
            rank,
            channel: self.channel,
            ..Default::default()
        };
        self.blank_command(op, addr, now)
    }

    /// Synthetic cached form of a transaction, for issuability probes.
    pub(crate) fn make_cached_probe(&self, trigger: &Request) -> Request {
        let mut probe = trigger.clone();
        probe.op = trigger.op.cached_form();
        probe.owner = Owner::Controller;
        probe
    }

    /// Compute phase command cloning the trigger's window state.
    pub(crate) fn make_compute_phase(&self, trigger: &Request, op: OpType, now: u64) -> Request {
        debug_assert!(op.is_compute_phase() || op == OpType::Compute);
        let mut phase = self.blank_command(op, trigger.addr, now);
        phase.phys_addr = trigger.phys_addr;
        phase.payload = trigger.payload;
        phase
    }

    /// Retype a read/write into its implicit-precharge form in place.
    pub(crate) fn retype_implicit_precharge(request: &mut Request, now: u64) {
        if let Some(op) = request.op.implicit_precharge_form() {
            request.op = op;
        }
        request.issue_cycle = now;
    }

    /// Expand one selected transaction into device commands.
    ///
    /// Returns false when no path applies; the caller re-queues the
    /// transaction and retries on a later wake.
    pub fn issue_memory_commands(&mut self, id: RequestId, ctx: &mut SimCtx<'_>) -> bool {
        let now = ctx.events.current_cycle();
        let (addr, op, last_request) = {
            let request = ctx.pool.get(id);
            (
                request.addr,
                request.op,
                request.flags.contains(RequestFlags::LAST_REQUEST),
            )
        };
        let mux = mux_level(addr.col, self.config.rb_size);
        let qid = self.queues.id_of(&addr);
        let queue_empty = self.queues.queue(qid).is_empty();
        let writing = ctx
            .device
            .is_writing(addr.rank, addr.bank, addr.subarray, now);

        let bank_activated = self.state.bank(addr.rank, addr.bank).activate_queued;
        let sub = *self.state.sub(addr.rank, addr.bank, addr.subarray);
        let aligned = bank_activated
            && sub.active
            && sub.effective_row == addr.row
            && sub.effective_muxed_row == mux;

        // (a) Cached-accessible path: the device can serve the request
        // without activation and the bank state is not already aligned.
        let probe = self.make_cached_probe(ctx.pool.get(id));
        if ctx.device.is_issuable(&probe, now) && !aligned {
            ctx.pool.get_mut(id).issue_cycle = now;
            self.queues.push_back(qid, id);
            self.schedule_command_wake(ctx);
            return true;
        }

        if !bank_activated && queue_empty {
            // (b) Closed-bank path.
            self.state.bank_mut(addr.rank, addr.bank).activate_queued = true;
            self.state
                .open_subarray(addr.rank, addr.bank, addr.subarray, addr.row, mux);
            self.state
                .sub_mut(addr.rank, addr.bank, addr.subarray)
                .starvation = 0;
            ctx.pool.get_mut(id).issue_cycle = now;

            let mut activate = self.make_activate(ctx.pool.get(id), now);
            if writing {
                activate.flags |= RequestFlags::PRIORITY;
            }
            let activate_id = ctx.pool.alloc(activate);
            self.queues.push_back(qid, activate_id);

            if last_request && self.config.use_precharge && op != OpType::Compute {
                Self::retype_implicit_precharge(ctx.pool.get_mut(id), now);
                self.queues.push_back(qid, id);
                self.state.close_subarray(addr.rank, addr.bank, addr.subarray);
                self.state.bank_mut(addr.rank, addr.bank).activate_queued = false;
            } else {
                if op == OpType::Compute {
                    // The window engine emits its own activates and leaves
                    // the bank logically closed for the next transaction.
                    self.state.close_subarray(addr.rank, addr.bank, addr.subarray);
                    self.state.bank_mut(addr.rank, addr.bank).activate_queued = false;
                    self.expand_compute_trigger(id, qid, ctx);
                }
                self.queues.push_back(qid, id);
            }
        } else if bank_activated && !aligned && queue_empty {
            // (c) Row miss on an active bank.
            self.state
                .sub_mut(addr.rank, addr.bank, addr.subarray)
                .starvation = 0;
            ctx.pool.get_mut(id).issue_cycle = now;

            if sub.active && self.config.use_precharge {
                let precharge = self.make_precharge_at(
                    sub.effective_row,
                    addr.bank,
                    addr.rank,
                    addr.subarray,
                    now,
                );
                let precharge_id = ctx.pool.alloc(precharge);
                self.queues.push_back(qid, precharge_id);
            }

            let mut activate = self.make_activate(ctx.pool.get(id), now);
            if writing {
                activate.flags |= RequestFlags::PRIORITY;
            }
            let activate_id = ctx.pool.alloc(activate);
            self.queues.push_back(qid, activate_id);

            if op == OpType::Compute {
                self.expand_compute_trigger(id, qid, ctx);
            }
            self.queues.push_back(qid, id);
            self.state
                .open_subarray(addr.rank, addr.bank, addr.subarray, addr.row, mux);
        } else if aligned {
            // (d) Row hit.
            self.state
                .sub_mut(addr.rank, addr.bank, addr.subarray)
                .starvation += 1;
            ctx.pool.get_mut(id).issue_cycle = now;

            if last_request && self.config.use_precharge && op != OpType::Compute {
                // Restricted close-page never reaches the row-hit path.
                debug_assert!(self.config.close_page != 2);
                Self::retype_implicit_precharge(ctx.pool.get_mut(id), now);
                self.queues.push_back(qid, id);
                self.state.close_subarray(addr.rank, addr.bank, addr.subarray);
                if !self.state.any_subarray_active(addr.rank, addr.bank) {
                    self.state.bank_mut(addr.rank, addr.bank).activate_queued = false;
                }
            } else {
                if op == OpType::Compute {
                    self.expand_compute_trigger(id, qid, ctx);
                }
                self.queues.push_back(qid, id);
            }
        } else {
            return false;
        }

        self.schedule_command_wake(ctx);
        true
    }
}
