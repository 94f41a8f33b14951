//! The memory controller.
//!
//! Admission, wake scheduling, command issue and completion routing. The
//! controller owns the transaction queues, the command queue table and
//! the bank/subarray state tables; the request arena, event queue, device
//! and statistics are borrowed per call through [`SimCtx`], so ownership
//! stays with the simulator and no component holds a back-pointer.

use std::collections::VecDeque;

use tracing::{debug, error};

use pimsim_common::address::AddressDecoder;
use pimsim_common::config::SimConfig;
use pimsim_common::device::MemoryDevice;
use pimsim_common::error::{DeadlockInfo, SimError};
use pimsim_common::events::{Event, EventQueue};
use pimsim_common::pool::{RequestId, RequestPool};
use pimsim_common::request::{OpType, Owner, Payload, RequestFlags};
use pimsim_common::stats::SimStats;

use crate::queues::CommandQueues;
use crate::state::{BankState, StateTable, SubarrayState};

/// Requests hitting the starvation threshold may evict an open row.
pub const STARVATION_THRESHOLD: u64 = 4;

/// Borrowed simulator context for one controller call.
pub struct SimCtx<'a> {
    /// Request arena.
    pub pool: &'a mut RequestPool,
    /// Virtual-cycle timer queue.
    pub events: &'a mut EventQueue,
    /// The device below the controller.
    pub device: &'a mut dyn MemoryDevice,
    /// Simulation counters.
    pub stats: &'a mut SimStats,
}

/// Outcome of routing a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRoute {
    /// Controller-owned; already freed.
    Consumed,
    /// Host-owned; the caller forwards it upward.
    Upstream(RequestId),
}

/// The scheduling and state-machine core.
pub struct MemoryController {
    pub(crate) config: SimConfig,
    pub(crate) decoder: AddressDecoder,
    pub(crate) channel: u64,
    pub(crate) transaction_queues: Vec<VecDeque<RequestId>>,
    pub(crate) queues: CommandQueues,
    pub(crate) state: StateTable,
    pub(crate) rank_power_down: Vec<bool>,
    pub(crate) starvation_threshold: u64,
    // Refresh engine.
    pub(crate) delayed_refresh_counter: Vec<Vec<u64>>,
    pub(crate) next_refresh_rank: u64,
    pub(crate) next_refresh_bank: u64,
    pub(crate) t_refi: u64,
    // Issue bookkeeping.
    pub(crate) last_command_wake: u64,
    pub(crate) last_issue_cycle: u64,
    pub(crate) handled_refresh: u64,
    pub(crate) cur_queue: usize,
}

impl MemoryController {
    /// Build the controller and start the refresh countdown pulses.
    pub fn new(config: SimConfig, pool: &mut RequestPool, events: &mut EventQueue) -> Self {
        let decoder = AddressDecoder::new(
            config.rows,
            config.cols,
            config.banks,
            config.ranks,
            1,
            config.mat_height_or_rows(),
        );
        let subarrays = config.subarray_count();
        let powered_down = config.use_low_power && config.init_pd;
        let group_count = if config.use_refresh {
            config.refresh_group_count()
        } else {
            0
        };

        let mut controller = Self {
            decoder,
            channel: 0,
            transaction_queues: vec![VecDeque::new()],
            queues: CommandQueues::new(&config),
            state: StateTable::new(config.ranks, config.banks, subarrays, config.rows),
            rank_power_down: vec![powered_down; config.ranks as usize],
            starvation_threshold: STARVATION_THRESHOLD,
            delayed_refresh_counter: vec![vec![0; group_count as usize]; config.ranks as usize],
            next_refresh_rank: 0,
            next_refresh_bank: 0,
            t_refi: if config.use_refresh { config.t_refi() } else { 0 },
            last_command_wake: 0,
            last_issue_cycle: 0,
            handled_refresh: u64::MAX,
            cur_queue: 0,
            config,
        };
        if controller.config.use_refresh {
            controller.schedule_refresh_pulses(pool, events);
        }
        controller
    }

    /// The configuration snapshot the controller runs under.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The controller's address decoder.
    pub fn decoder(&self) -> &AddressDecoder {
        &self.decoder
    }

    /// Admission acceptance; the transaction queues are unbounded, so the
    /// controller itself never refuses work.
    pub fn is_issuable(&self) -> bool {
        true
    }

    // ─── Admission ──────────────────────────────────────────────────

    /// Admit a transaction: retranslate for this channel, append to the
    /// chosen transaction queue, and wake the scheduler immediately if the
    /// destination command queue has nothing left to do.
    pub fn enqueue(&mut self, queue: usize, id: RequestId, ctx: &mut SimCtx<'_>) {
        let now = ctx.events.current_cycle();
        let qid = {
            let request = ctx.pool.get_mut(id);
            request.addr = self.decoder.translate(request.phys_addr);
            request.addr.channel = self.channel;
            if let Payload::Compute(fields) = &mut request.payload {
                fields.input = self.decoder.translate(fields.input_phys);
                fields.output = self.decoder.translate(fields.output_phys);
            }
            request.arrival_cycle = now;
            self.queues.id_of(&request.addr)
        };
        self.transaction_queues[queue].push_back(id);
        ctx.stats.admitted_transactions += 1;

        if self.queues.effectively_empty(qid, ctx.pool) {
            ctx.events.insert_unique(now, Event::TransactionWake);
        }
    }

    /// Front-insertion variant of [`MemoryController::enqueue`], used for
    /// internal re-ordering; the request keeps its translated address.
    pub fn prequeue(&mut self, queue: usize, id: RequestId) {
        self.transaction_queues[queue].push_front(id);
    }

    /// Any transaction queue holds a request addressed to command queue
    /// `qid`.
    pub fn transaction_available(&self, qid: usize, pool: &RequestPool) -> bool {
        self.transaction_queues.iter().any(|queue| {
            queue
                .iter()
                .any(|&id| self.queues.id_of(&pool.get(id).addr) == qid)
        })
    }

    // ─── Per-cycle tick (§ re-check) ────────────────────────────────

    /// Re-check the transaction queues for issuable work and schedule at
    /// most one scheduler wake for the next cycle.
    pub fn cycle_tick(&mut self, ctx: &mut SimCtx<'_>) {
        let next_wakeup = ctx.events.current_cycle() + 1;
        if ctx.events.find(next_wakeup, &Event::TransactionWake) {
            return;
        }
        for qid in 0..self.queues.count() {
            if self.queues.effectively_empty(qid, ctx.pool)
                && self.transaction_available(qid, ctx.pool)
            {
                ctx.events.insert(next_wakeup, Event::TransactionWake);
                break;
            }
        }
    }

    // ─── Scheduler wake ─────────────────────────────────────────────

    /// Selection policy: refresh first, then the finder ladder. At most
    /// one transaction is extracted and expanded per wake.
    pub fn transaction_wake(&mut self, ctx: &mut SimCtx<'_>) {
        if !(self.config.use_refresh && self.handle_refresh(ctx)) {
            self.pick_one_transaction(ctx);
        }
        self.cycle_tick(ctx);
    }

    fn pick_one_transaction(&mut self, ctx: &mut SimCtx<'_>) {
        for tq in 0..self.transaction_queues.len() {
            match self.find_write_stalled_read(tq, ctx, &mut |_| true) {
                crate::sched::WriteStallScan::Stall => return,
                crate::sched::WriteStallScan::Hit(id) => {
                    self.dispatch_selected(tq, id, ctx);
                    return;
                }
                crate::sched::WriteStallScan::Miss => {}
            }

            let picked = self
                .find_starved_request(tq, ctx, &mut |_| true)
                .or_else(|| self.find_cached_request(tq, ctx, &mut |_| true))
                .or_else(|| self.find_row_buffer_hit(tq, ctx, &mut |_| true))
                .or_else(|| self.find_oldest_ready_request(tq, ctx, &mut |_| true))
                .or_else(|| self.find_closed_bank_request(tq, ctx, &mut |_| true))
                .or_else(|| self.find_compute_request(tq, ctx))
                .or_else(|| self.find_transfer_request(tq, ctx))
                .or_else(|| self.find_load_request(tq, ctx));

            if let Some(id) = picked {
                self.dispatch_selected(tq, id, ctx);
                return;
            }
        }
    }

    fn dispatch_selected(&mut self, tq: usize, id: RequestId, ctx: &mut SimCtx<'_>) {
        if !self.issue_memory_commands(id, ctx) {
            // Retried on the next wake.
            self.prequeue(tq, id);
        }
    }

    // ─── Command wakes ──────────────────────────────────────────────

    /// Place the next command wake, deduplicated against pending wakes.
    pub(crate) fn schedule_command_wake(&mut self, ctx: &mut SimCtx<'_>) {
        let next_wakeup = self.next_issuable(ctx);
        if next_wakeup != u64::MAX {
            ctx.events.insert_unique(next_wakeup, Event::CommandWake);
        }
    }

    /// Command wake: account elapsed cycles, re-arm the next wake, issue
    /// from the queues, then catch the device up.
    pub fn command_queue_callback(&mut self, ctx: &mut SimCtx<'_>) -> Result<(), SimError> {
        let now = ctx.events.current_cycle();
        let real_steps = now - self.last_command_wake;
        self.last_command_wake = now;
        ctx.stats.wakeup_count += 1;

        if self.config.use_low_power {
            self.handle_low_power(ctx);
        }

        self.schedule_command_wake(ctx);
        self.cycle_command_queues(ctx)?;
        ctx.device.cycle(real_steps);
        Ok(())
    }

    /// Refresh pulse: account elapsed cycles, advance the deferred
    /// counter, try to emit a refresh, then catch the device up.
    pub fn refresh_callback(&mut self, pulse: RequestId, ctx: &mut SimCtx<'_>) {
        let now = ctx.events.current_cycle();
        let real_steps = now - self.last_command_wake;
        self.last_command_wake = now;
        ctx.stats.wakeup_count += 1;

        self.process_refresh_pulse(pulse, ctx);
        self.handle_refresh(ctx);
        ctx.device.cycle(real_steps);
    }

    /// Earliest cycle any queued command could issue. Refresh gets
    /// priority: a due refresh with an empty group is handled on the spot
    /// when no command issued this cycle yet.
    fn next_issuable(&mut self, ctx: &mut SimCtx<'_>) -> u64 {
        let now = ctx.events.current_cycle();
        let mut next_wakeup = u64::MAX;

        if self.config.use_refresh {
            for rank in 0..self.config.ranks {
                for group in 0..self.config.refresh_group_count() {
                    let bank = group * self.config.banks_per_refresh;
                    if self.need_refresh(bank, rank)
                        && self.queues.refresh_group_empty(
                            rank,
                            bank,
                            self.config.banks_per_refresh,
                            ctx.pool,
                        )
                    {
                        if self.last_issue_cycle != now {
                            self.handle_refresh(ctx);
                        } else {
                            next_wakeup = next_wakeup.min(now + 1);
                        }
                    }
                }
            }
        }

        for qid in 0..self.queues.count() {
            if let Some(head) = self.queues.head(qid) {
                next_wakeup =
                    next_wakeup.min(ctx.device.next_issuable_cycle(ctx.pool.get(head), now));
            }
        }

        if next_wakeup != u64::MAX && next_wakeup <= now {
            next_wakeup = now + 1;
        }
        next_wakeup
    }

    // ─── Command issue ──────────────────────────────────────────────

    /// Walk the queues from the rotation point and issue at most one
    /// device command; a queue head stuck past the deadlock timer aborts
    /// the simulation.
    pub fn cycle_command_queues(&mut self, ctx: &mut SimCtx<'_>) -> Result<(), SimError> {
        let now = ctx.events.current_cycle();

        // A refresh already consumed this cycle's slot.
        if self.handled_refresh == now {
            return Ok(());
        }

        for offset in 0..self.queues.count() {
            let qid = (self.cur_queue + offset) % self.queues.count();
            let Some(mut head) = self.queues.head(qid) else {
                continue;
            };

            if self.last_issue_cycle != now && ctx.device.is_issuable(ctx.pool.get(head), now) {
                if ctx.pool.get(head).op == OpType::Compute {
                    head = self.advance_compute(qid, ctx);
                }

                let (op, phys_addr, bank, rank) = {
                    let request = ctx.pool.get(head);
                    (request.op, request.phys_addr, request.addr.bank, request.addr.rank)
                };
                debug!(cycle = now, ?op, addr = phys_addr, queue = qid, "issued request");

                ctx.stats.record_issue(op);
                ctx.device.issue(ctx.pool, head, now, ctx.events);
                ctx.pool.get_mut(head).flags |= RequestFlags::ISSUED;

                if op == OpType::Refresh {
                    self.reset_refresh_queued(bank, rank);
                }
                self.last_issue_cycle = now;

                ctx.events.insert_unique(now + 1, Event::Cleanup);

                // The queue drains next cycle: admit follow-up work.
                if self.queues.queue(qid).len() == 1 && self.transaction_available(qid, ctx.pool) {
                    ctx.events.insert_unique(now + 1, Event::TransactionWake);
                }

                self.move_current_queue();
                return Ok(());
            }

            let request = ctx.pool.get(head);
            if now.saturating_sub(request.issue_cycle) > self.config.deadlock_timer {
                let info = DeadlockInfo {
                    op: request.op,
                    phys_addr: request.phys_addr,
                    addr: request.addr,
                    arrival_cycle: request.arrival_cycle,
                    issue_cycle: request.issue_cycle,
                    current_cycle: now,
                };
                error!(%info, "operation could not be sent to memory after a very long time");
                return Err(SimError::Deadlock(info));
            }
        }
        Ok(())
    }

    /// Advance the queue rotation point (fixed order keeps it pinned).
    fn move_current_queue(&mut self) {
        if self.config.schedule_scheme != 0 {
            self.cur_queue = (self.cur_queue + 1) % self.queues.count();
        }
    }

    // ─── Cleanup & completion ───────────────────────────────────────

    /// Sweep issued entries out of every command queue.
    pub fn cleanup(&mut self, pool: &RequestPool) {
        self.queues.retain_unissued(pool);
    }

    /// Ownership boundary: controller-made commands die here, host
    /// transactions surface to the caller.
    pub fn request_complete(&mut self, id: RequestId, ctx: &mut SimCtx<'_>) -> CompletionRoute {
        ctx.stats.completed_requests += 1;
        match ctx.pool.get(id).owner {
            Owner::Controller => {
                ctx.pool.free(id);
                CompletionRoute::Consumed
            }
            Owner::Host => CompletionRoute::Upstream(id),
        }
    }

    /// Sync the device to the controller clock before a stats dump.
    pub fn calculate_stats(&mut self, ctx: &mut SimCtx<'_>) {
        let now = ctx.events.current_cycle();
        let sync_cycles = now - self.last_command_wake;
        self.last_command_wake = now;
        ctx.device.cycle(sync_cycles);
        ctx.stats.simulation_cycles = now;
    }

    // ─── Introspection (tests & diagnostics) ────────────────────────

    /// Bank state entry.
    pub fn bank_state(&self, rank: u64, bank: u64) -> &BankState {
        self.state.bank(rank, bank)
    }

    /// Subarray state entry.
    pub fn subarray_state(&self, rank: u64, bank: u64, subarray: u64) -> &SubarrayState {
        self.state.sub(rank, bank, subarray)
    }

    /// Request ids currently queued on `qid`, head first.
    pub fn command_queue_ids(&self, qid: usize) -> Vec<RequestId> {
        self.queues.queue(qid).iter().copied().collect()
    }

    /// Ops currently queued on `qid`, head first.
    pub fn command_queue_ops(&self, qid: usize, pool: &RequestPool) -> Vec<OpType> {
        self.queues
            .queue(qid)
            .iter()
            .map(|&id| pool.get(id).op)
            .collect()
    }

    /// Pending transactions in queue `queue`.
    pub fn transaction_queue_len(&self, queue: usize) -> usize {
        self.transaction_queues[queue].len()
    }

    /// Number of command queues.
    pub fn command_queue_count(&self) -> usize {
        self.queues.count()
    }

    /// Queue id for a physical address.
    pub fn queue_id_of_phys(&self, phys: u64) -> usize {
        self.queues.id_of(&self.decoder.translate(phys))
    }

    /// No command queue holds an issued entry.
    pub fn no_issued_entries(&self, pool: &RequestPool) -> bool {
        self.queues.no_issued_entries(pool)
    }
}
