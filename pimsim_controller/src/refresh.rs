//! Deferred refresh.
//!
//! One countdown pulse per (rank, bank group) lives on the event queue
//! and re-arms itself every tREFI, incrementing a deferred counter. Once
//! a counter crosses the threshold the group's banks are flagged and the
//! next opportunity emits a REFRESH command to the group's head bank,
//! round-robin across ranks and groups.

use tracing::debug;

use pimsim_common::events::{Event, EventQueue};
use pimsim_common::pool::{RequestId, RequestPool};
use pimsim_common::request::Payload;

use crate::controller::{MemoryController, SimCtx};

impl MemoryController {
    /// Create the staggered countdown pulses at startup.
    pub(crate) fn schedule_refresh_pulses(
        &mut self,
        pool: &mut RequestPool,
        events: &mut EventQueue,
    ) {
        let groups = self.config.refresh_group_count();
        let slice = self.t_refi / (self.config.ranks * groups).max(1);
        for rank in 0..self.config.ranks {
            for group in 0..groups {
                let head_bank = group * self.config.banks_per_refresh;
                let pulse = self.make_refresh(head_bank, rank, events.current_cycle());
                let pulse_id = pool.alloc(pulse);
                let offset = (rank * groups + group) * slice;
                events.insert(
                    events.current_cycle() + self.t_refi + offset,
                    Event::RefreshPulse(pulse_id),
                );
            }
        }
    }

    /// The group containing `bank` has deferred past the threshold.
    pub fn need_refresh(&self, bank: u64, rank: u64) -> bool {
        self.config.use_refresh
            && self.delayed_refresh_counter[rank as usize]
                [(bank / self.config.banks_per_refresh) as usize]
                >= self.config.delayed_refresh_threshold
    }

    /// Flag every bank of the group containing `bank`.
    fn set_refresh(&mut self, bank: u64, rank: u64) {
        let head = (bank / self.config.banks_per_refresh) * self.config.banks_per_refresh;
        for i in 0..self.config.banks_per_refresh {
            self.state.bank_mut(rank, head + i).need_refresh = true;
        }
    }

    /// Clear the group's flags once the backlog is below threshold.
    fn reset_refresh(&mut self, bank: u64, rank: u64) {
        let head = (bank / self.config.banks_per_refresh) * self.config.banks_per_refresh;
        for i in 0..self.config.banks_per_refresh {
            self.state.bank_mut(rank, head + i).need_refresh = false;
        }
    }

    /// A REFRESH went to the device: the group's queues accept commands
    /// again.
    pub(crate) fn reset_refresh_queued(&mut self, bank: u64, rank: u64) {
        let head = (bank / self.config.banks_per_refresh) * self.config.banks_per_refresh;
        for i in 0..self.config.banks_per_refresh {
            let state = self.state.bank_mut(rank, head + i);
            debug_assert!(state.refresh_queued);
            state.refresh_queued = false;
        }
    }

    /// Countdown pulse: bump the deferred counter, flag the group when it
    /// crosses the threshold, re-arm the pulse at +tREFI.
    pub fn process_refresh_pulse(&mut self, pulse: RequestId, ctx: &mut SimCtx<'_>) {
        let (bank, rank) = {
            let request = ctx.pool.get(pulse);
            debug_assert!(matches!(request.payload, Payload::None));
            (request.addr.bank, request.addr.rank)
        };

        let group = (bank / self.config.banks_per_refresh) as usize;
        self.delayed_refresh_counter[rank as usize][group] += 1;

        if self.need_refresh(bank, rank) {
            self.set_refresh(bank, rank);
        }

        let next = ctx.events.current_cycle() + self.t_refi;
        ctx.events.insert(next, Event::RefreshPulse(pulse));
    }

    /// Emit at most one REFRESH, round-robin from the rotation point.
    ///
    /// When precharging is enabled, every active bank of the group gets a
    /// PRECHARGE_ALL first and its subarray state is closed.
    pub fn handle_refresh(&mut self, ctx: &mut SimCtx<'_>) -> bool {
        let now = ctx.events.current_cycle();
        let ranks = self.config.ranks;
        let groups = self.config.refresh_group_count();
        let stride = self.config.banks_per_refresh;

        for rank_step in 0..ranks {
            let rank = (self.next_refresh_rank + rank_step) % ranks;
            for group_step in 0..groups {
                let bank = (self.next_refresh_bank + group_step * stride) % self.config.banks;
                if !self.need_refresh(bank, rank) {
                    continue;
                }

                if self.config.use_precharge {
                    for i in 0..stride {
                        let target = (bank + i) % self.config.banks;
                        if self.state.bank(rank, target).activate_queued {
                            let qid = self.queues.id_for(rank, target, 0);
                            let precharge = self.make_precharge_all(target, rank, now);
                            let precharge_id = ctx.pool.alloc(precharge);
                            self.queues.push_back(qid, precharge_id);
                            self.state.close_bank(rank, target);
                        }
                    }
                }

                let qid = self.queues.id_for(rank, bank, 0);
                let refresh = self.make_refresh(bank, rank, now);
                let refresh_id = ctx.pool.alloc(refresh);
                self.queues.push_back(qid, refresh_id);
                debug!(cycle = now, rank, bank, "refresh queued for bank group");

                for i in 0..stride {
                    let target = (bank + i) % self.config.banks;
                    self.state.bank_mut(rank, target).refresh_queued = true;
                }

                let group = (bank / stride) as usize;
                self.delayed_refresh_counter[rank as usize][group] -= 1;
                if !self.need_refresh(bank, rank) {
                    self.reset_refresh(bank, rank);
                }

                self.next_refresh_bank += stride;
                if self.next_refresh_bank >= self.config.banks {
                    self.next_refresh_bank = 0;
                    self.next_refresh_rank = (self.next_refresh_rank + 1) % ranks;
                }

                self.handled_refresh = now;
                self.schedule_command_wake(ctx);
                return true;
            }
        }
        false
    }
}
