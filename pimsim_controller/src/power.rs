//! Opportunistic rank power management.
//!
//! A rank with pending refresh work is kept powered; an idle rank with
//! empty queues is powered down (active power-down when rows are open);
//! a powered-down rank with waiting work is brought back up. Transitions
//! only happen when the device currently accepts the power op.

use tracing::debug;

use pimsim_common::config::PowerDownMode;
use pimsim_common::request::OpType;

use crate::controller::{MemoryController, SimCtx};

impl MemoryController {
    /// One power pass over all ranks.
    pub(crate) fn handle_low_power(&mut self, ctx: &mut SimCtx<'_>) {
        for rank in 0..self.config.ranks {
            let mut refresh_pending = false;
            if self.config.use_refresh {
                for group in 0..self.config.refresh_group_count() {
                    if self.need_refresh(group * self.config.banks_per_refresh, rank) {
                        refresh_pending = true;
                        break;
                    }
                }
            }

            if refresh_pending {
                // Refresh outranks power saving: make sure the rank is up.
                if self.rank_power_down[rank as usize] {
                    self.try_power_up(rank, ctx);
                }
            } else if self.rank_power_down[rank as usize] {
                self.power_up(rank, ctx);
            } else {
                self.power_down(rank, ctx);
            }
        }
    }

    /// Enter power-down when the rank has nothing queued; open rows
    /// promote the request to active power-down.
    fn power_down(&mut self, rank: u64, ctx: &mut SimCtx<'_>) {
        let now = ctx.events.current_cycle();
        let mut op = match self.config.power_down_mode {
            PowerDownMode::FastExit => OpType::PowerDownFast,
            PowerDownMode::SlowExit => OpType::PowerDownSlow,
        };
        if !ctx.device.rank_idle(rank) {
            op = OpType::PowerDownActive;
        }

        let probe = self.make_power_op(op, rank, now);
        if self.queues.rank_queue_empty(rank) && ctx.device.is_issuable(&probe, now) {
            let id = ctx.pool.alloc(probe);
            ctx.stats.record_issue(op);
            ctx.device.issue(ctx.pool, id, now, ctx.events);
            self.rank_power_down[rank as usize] = true;
            debug!(cycle = now, rank, ?op, "rank powered down");
        }
    }

    /// Exit power-down when work is waiting for the rank.
    fn power_up(&mut self, rank: u64, ctx: &mut SimCtx<'_>) {
        if !self.queues.rank_queue_empty(rank) {
            self.try_power_up(rank, ctx);
        }
    }

    fn try_power_up(&mut self, rank: u64, ctx: &mut SimCtx<'_>) {
        let now = ctx.events.current_cycle();
        let probe = self.make_power_op(OpType::PowerUp, rank, now);
        if ctx.device.is_issuable(&probe, now) {
            let id = ctx.pool.alloc(probe);
            ctx.stats.record_issue(OpType::PowerUp);
            ctx.device.issue(ctx.pool, id, now, ctx.events);
            self.rank_power_down[rank as usize] = false;
            debug!(cycle = now, rank, "rank powered up");
        }
    }
}
