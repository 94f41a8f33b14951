//! The timing device.
//!
//! One open row per (bank, subarray), one command in flight per bank, one
//! power state per rank. Issuing a command applies its state transitions
//! immediately and schedules a `Complete` event at `now + latency`; the
//! controller observes everything else through `is_issuable` /
//! `next_issuable_cycle`.

use tracing::debug;

use pimsim_common::config::SimConfig;
use pimsim_common::device::MemoryDevice;
use pimsim_common::events::{Event, EventQueue};
use pimsim_common::pool::{RequestId, RequestPool};
use pimsim_common::request::{OpType, Request, RequestFlags};

use crate::timing::DeviceTiming;

/// One issued command, for the optional issue trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedCommand {
    /// Cycle the command was accepted.
    pub cycle: u64,
    /// Operation.
    pub op: OpType,
    /// Physical byte address.
    pub phys_addr: u64,
    /// Target rank.
    pub rank: u64,
    /// Target bank.
    pub bank: u64,
    /// Target row.
    pub row: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RankState {
    powered_down: bool,
    slow_exit: bool,
    ready: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BankState {
    ready: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct SubarrayState {
    open_row: Option<u64>,
    write_start: u64,
    write_until: u64,
}

/// Rank/bank/subarray timing model.
#[derive(Debug)]
pub struct TimingDevice {
    timing: DeviceTiming,
    ranks: u64,
    banks: u64,
    subarrays: u64,
    banks_per_refresh: u64,
    rank_state: Vec<RankState>,
    bank_state: Vec<BankState>,
    subarray_state: Vec<SubarrayState>,
    device_cycle: u64,
    record_issues: bool,
    issue_log: Vec<IssuedCommand>,
}

impl TimingDevice {
    /// Build the device for a configuration snapshot.
    pub fn new(config: &SimConfig) -> Self {
        let ranks = config.ranks;
        let banks = config.banks;
        let subarrays = config.subarray_count();
        let mut rank_state = vec![RankState::default(); ranks as usize];
        if config.use_low_power && config.init_pd {
            for rank in rank_state.iter_mut() {
                rank.powered_down = true;
            }
        }
        Self {
            timing: DeviceTiming::from_config(config),
            ranks,
            banks,
            subarrays,
            banks_per_refresh: config.banks_per_refresh.max(1),
            rank_state,
            bank_state: vec![BankState::default(); (ranks * banks) as usize],
            subarray_state: vec![SubarrayState::default(); (ranks * banks * subarrays) as usize],
            device_cycle: 0,
            record_issues: false,
            issue_log: Vec::new(),
        }
    }

    /// The latency table in use.
    pub fn timing(&self) -> &DeviceTiming {
        &self.timing
    }

    /// Device-local cycle count (catch-up accounting).
    pub fn device_cycle(&self) -> u64 {
        self.device_cycle
    }

    /// Record every accepted command into [`TimingDevice::issue_log`].
    pub fn set_record_issues(&mut self, record: bool) {
        self.record_issues = record;
    }

    /// Commands accepted so far, oldest first (empty unless recording).
    pub fn issue_log(&self) -> &[IssuedCommand] {
        &self.issue_log
    }

    #[inline]
    fn bank_idx(&self, rank: u64, bank: u64) -> usize {
        (rank * self.banks + bank) as usize
    }

    #[inline]
    fn sub_idx(&self, rank: u64, bank: u64, subarray: u64) -> usize {
        ((rank * self.banks + bank) * self.subarrays + subarray) as usize
    }

    fn sub(&self, rank: u64, bank: u64, subarray: u64) -> &SubarrayState {
        &self.subarray_state[self.sub_idx(rank, bank, subarray)]
    }

    fn write_active(&self, state: &SubarrayState, now: u64) -> bool {
        now >= state.write_start && now < state.write_until
    }

    fn refresh_group_ready(&self, rank: u64, head_bank: u64, now: u64) -> bool {
        (0..self.banks_per_refresh).all(|i| {
            let bank = (head_bank + i) % self.banks;
            let bank_ready = self.bank_state[self.bank_idx(rank, bank)].ready <= now;
            let closed = (0..self.subarrays)
                .all(|sub| self.sub(rank, bank, sub).open_row.is_none());
            bank_ready && closed
        })
    }

    fn latency(&self, request: &Request) -> u64 {
        let t = &self.timing;
        match request.op {
            OpType::Activate => t.t_rcd,
            OpType::Precharge | OpType::PrechargeAll => t.t_rp,
            OpType::Read | OpType::CachedRead => t.t_cas + t.t_burst,
            OpType::ReadPrecharge => t.t_cas + t.t_burst + t.t_rp,
            OpType::Write | OpType::CachedWrite | OpType::LoadWeight => t.t_wp,
            OpType::WritePrecharge => t.t_wp + t.t_rp,
            OpType::Refresh => t.t_rfc,
            OpType::Compute => t.t_compute_step,
            OpType::ReadCycle => t.t_read_cycle,
            OpType::RealCompute => t.t_real_compute,
            OpType::PostRead => t.t_post_read,
            OpType::WriteCycle => t.t_write_cycle,
            OpType::Transfer => match &request.payload {
                pimsim_common::request::Payload::Transfer(f) => t.transfer_cycles(f.size),
                _ => t.t_burst,
            },
            OpType::PowerDownFast | OpType::PowerDownSlow | OpType::PowerDownActive => t.t_pd,
            OpType::PowerUp => {
                if self.rank_state[request.addr.rank as usize].slow_exit {
                    t.t_xp_slow
                } else {
                    t.t_xp_fast
                }
            }
        }
    }
}

impl MemoryDevice for TimingDevice {
    fn is_issuable(&self, request: &Request, now: u64) -> bool {
        let a = &request.addr;
        let rank = &self.rank_state[a.rank as usize];

        if rank.powered_down {
            return request.op == OpType::PowerUp && now >= rank.ready;
        }

        // Power-state exit latency gates every command on the rank.
        if rank.ready > now {
            return false;
        }

        match request.op {
            OpType::Activate => {
                let sub = self.sub(a.rank, a.bank, a.subarray);
                if request.flags.contains(RequestFlags::PRIORITY) && self.write_active(sub, now) {
                    // Pause-cancel of an in-progress write.
                    return true;
                }
                // An activate to an open subarray is a window relatch: the
                // compute pipeline re-activates without an intervening
                // precharge while sliding inside one row sweep.
                self.bank_state[self.bank_idx(a.rank, a.bank)].ready <= now
            }
            OpType::Read
            | OpType::Write
            | OpType::LoadWeight
            | OpType::ReadPrecharge
            | OpType::WritePrecharge
            | OpType::Transfer
            | OpType::Compute
            | OpType::ReadCycle
            | OpType::RealCompute
            | OpType::PostRead
            | OpType::WriteCycle => {
                let sub = self.sub(a.rank, a.bank, a.subarray);
                sub.open_row == Some(a.row)
                    && self.bank_state[self.bank_idx(a.rank, a.bank)].ready <= now
            }
            OpType::Precharge | OpType::PrechargeAll => {
                self.bank_state[self.bank_idx(a.rank, a.bank)].ready <= now
            }
            OpType::Refresh => self.refresh_group_ready(a.rank, a.bank, now),
            // No cache layer below this device.
            OpType::CachedRead | OpType::CachedWrite => false,
            OpType::PowerDownFast | OpType::PowerDownSlow => self.rank_idle(a.rank),
            OpType::PowerDownActive => true,
            OpType::PowerUp => false,
        }
    }

    fn next_issuable_cycle(&self, request: &Request, now: u64) -> u64 {
        if self.is_issuable(request, now) {
            return now;
        }
        let a = &request.addr;
        let rank = &self.rank_state[a.rank as usize];
        if rank.powered_down {
            return rank.ready.max(now + 1);
        }
        let ready = match request.op {
            OpType::Refresh => (0..self.banks_per_refresh)
                .map(|i| {
                    let bank = (a.bank + i) % self.banks;
                    self.bank_state[self.bank_idx(a.rank, bank)].ready
                })
                .max()
                .unwrap_or(now),
            OpType::PowerDownFast | OpType::PowerDownSlow | OpType::PowerDownActive
            | OpType::PowerUp => rank.ready,
            _ => self.bank_state[self.bank_idx(a.rank, a.bank)].ready,
        };
        ready.max(rank.ready).max(now + 1)
    }

    fn issue(&mut self, pool: &mut RequestPool, id: RequestId, now: u64, events: &mut EventQueue) {
        let latency = {
            let request = pool.get(id);
            debug_assert!(self.is_issuable(request, now));
            self.latency(request)
        };
        let request = pool.get(id);
        let a = request.addr;

        if self.record_issues {
            self.issue_log.push(IssuedCommand {
                cycle: now,
                op: request.op,
                phys_addr: request.phys_addr,
                rank: a.rank,
                bank: a.bank,
                row: a.row,
            });
        }
        debug!(
            cycle = now,
            op = ?request.op,
            addr = request.phys_addr,
            rank = a.rank,
            bank = a.bank,
            row = a.row,
            "device accepted command"
        );

        let bank_idx = self.bank_idx(a.rank, a.bank);
        let sub_idx = self.sub_idx(a.rank, a.bank, a.subarray);

        match request.op {
            OpType::Activate => {
                let state = &mut self.subarray_state[sub_idx];
                // A priority activate lands on a writing subarray and
                // cancels the remaining pulses.
                state.write_start = 0;
                state.write_until = 0;
                state.open_row = Some(a.row);
                self.bank_state[bank_idx].ready = now + latency;
            }
            OpType::Precharge => {
                self.subarray_state[sub_idx].open_row = None;
                self.bank_state[bank_idx].ready = now + latency;
            }
            OpType::PrechargeAll => {
                for sub in 0..self.subarrays {
                    let idx = self.sub_idx(a.rank, a.bank, sub);
                    self.subarray_state[idx].open_row = None;
                }
                self.bank_state[bank_idx].ready = now + latency;
            }
            OpType::Read | OpType::Transfer | OpType::Compute | OpType::ReadCycle
            | OpType::RealCompute | OpType::PostRead | OpType::WriteCycle => {
                self.bank_state[bank_idx].ready = now + latency;
            }
            OpType::ReadPrecharge => {
                self.subarray_state[sub_idx].open_row = None;
                self.bank_state[bank_idx].ready = now + latency;
            }
            OpType::Write | OpType::LoadWeight => {
                let state = &mut self.subarray_state[sub_idx];
                state.write_start = now;
                state.write_until = now + self.timing.t_wp;
                self.bank_state[bank_idx].ready = now + latency;
            }
            OpType::WritePrecharge => {
                let state = &mut self.subarray_state[sub_idx];
                state.write_start = now;
                state.write_until = now + self.timing.t_wp;
                state.open_row = None;
                self.bank_state[bank_idx].ready = now + latency;
            }
            OpType::Refresh => {
                for i in 0..self.banks_per_refresh {
                    let bank = (a.bank + i) % self.banks;
                    let idx = self.bank_idx(a.rank, bank);
                    self.bank_state[idx].ready = now + latency;
                }
            }
            OpType::PowerDownFast | OpType::PowerDownActive => {
                let rank = &mut self.rank_state[a.rank as usize];
                rank.powered_down = true;
                rank.slow_exit = false;
                rank.ready = now + latency;
            }
            OpType::PowerDownSlow => {
                let rank = &mut self.rank_state[a.rank as usize];
                rank.powered_down = true;
                rank.slow_exit = true;
                rank.ready = now + latency;
            }
            OpType::PowerUp => {
                let rank = &mut self.rank_state[a.rank as usize];
                rank.powered_down = false;
                rank.ready = now + latency;
            }
            OpType::CachedRead | OpType::CachedWrite => {
                unreachable!("cached forms are never issuable on this device")
            }
        }

        events.insert(now + latency, Event::Complete(id));
    }

    fn cycle(&mut self, steps: u64) {
        self.device_cycle += steps;
    }

    fn is_writing(&self, rank: u64, bank: u64, subarray: u64, now: u64) -> bool {
        self.write_active(self.sub(rank, bank, subarray), now)
    }

    fn between_write_iterations(&self, rank: u64, bank: u64, subarray: u64, now: u64) -> bool {
        let state = self.sub(rank, bank, subarray);
        self.write_active(state, now) && (now - state.write_start) % self.timing.t_wp_pulse == 0
    }

    fn rank_idle(&self, rank: u64) -> bool {
        (0..self.banks).all(|bank| {
            (0..self.subarrays).all(|sub| self.sub(rank, bank, sub).open_row.is_none())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pimsim_common::address::DecodedAddress;
    use pimsim_common::request::{Payload, TransferFields, TransferMode};

    fn request(op: OpType, rank: u64, bank: u64, row: u64) -> Request {
        let mut req = Request::host(op, 0, 0, 0);
        req.addr = DecodedAddress {
            row,
            col: 0,
            bank,
            rank,
            channel: 0,
            subarray: 0,
        };
        req
    }

    fn device() -> TimingDevice {
        TimingDevice::new(&SimConfig::default())
    }

    #[test]
    fn activate_then_read_discipline() {
        let mut dev = device();
        let mut pool = RequestPool::new();
        let mut events = EventQueue::new();

        let read = request(OpType::Read, 0, 0, 7);
        assert!(!dev.is_issuable(&read, 0), "read before activate");

        let act = request(OpType::Activate, 0, 0, 7);
        assert!(dev.is_issuable(&act, 0));
        let act_id = pool.alloc(act);
        dev.issue(&mut pool, act_id, 0, &mut events);

        // Row open but bank busy until tRCD.
        assert!(!dev.is_issuable(&read, 1));
        let ready = dev.next_issuable_cycle(&read, 1);
        assert_eq!(ready, dev.timing().t_rcd);
        assert!(dev.is_issuable(&read, ready));

        // Wrong row is still not issuable.
        let other = request(OpType::Read, 0, 0, 8);
        assert!(!dev.is_issuable(&other, ready));
    }

    #[test]
    fn completion_is_scheduled_at_latency() {
        let mut dev = device();
        let mut pool = RequestPool::new();
        let mut events = EventQueue::new();
        let id = pool.alloc(request(OpType::Activate, 0, 1, 3));
        dev.issue(&mut pool, id, 10, &mut events);
        assert!(events.find(10 + dev.timing().t_rcd, &Event::Complete(id)));
    }

    #[test]
    fn refresh_requires_closed_group() {
        let mut cfg = SimConfig::default();
        cfg.banks_per_refresh = 4;
        let mut dev = TimingDevice::new(&cfg);
        let mut pool = RequestPool::new();
        let mut events = EventQueue::new();

        let refresh = request(OpType::Refresh, 0, 0, 0);
        assert!(dev.is_issuable(&refresh, 0));

        // Open a row in bank 2 (inside the group): refresh blocked.
        let act = pool.alloc(request(OpType::Activate, 0, 2, 5));
        dev.issue(&mut pool, act, 0, &mut events);
        let t_rcd = dev.timing().t_rcd;
        assert!(!dev.is_issuable(&refresh, t_rcd));

        // Close it again: refresh allowed, occupies the whole group.
        let pre = pool.alloc(request(OpType::Precharge, 0, 2, 5));
        dev.issue(&mut pool, pre, t_rcd, &mut events);
        let ready = t_rcd + dev.timing().t_rp;
        assert!(dev.is_issuable(&refresh, ready));
        let refresh_id = pool.alloc(request(OpType::Refresh, 0, 0, 0));
        dev.issue(&mut pool, refresh_id, ready, &mut events);
        let blocked = request(OpType::Activate, 0, 3, 1);
        assert!(!dev.is_issuable(&blocked, ready + 1));
        assert!(dev.is_issuable(&blocked, ready + dev.timing().t_rfc));
    }

    #[test]
    fn write_pause_windows() {
        let mut dev = device();
        let mut pool = RequestPool::new();
        let mut events = EventQueue::new();

        let act = pool.alloc(request(OpType::Activate, 0, 0, 1));
        dev.issue(&mut pool, act, 0, &mut events);
        let t0 = dev.timing().t_rcd;
        let write = pool.alloc(request(OpType::Write, 0, 0, 1));
        dev.issue(&mut pool, write, t0, &mut events);

        assert!(dev.is_writing(0, 0, 0, t0 + 1));
        assert!(!dev.between_write_iterations(0, 0, 0, t0 + 1));
        let pulse = dev.timing().t_wp_pulse;
        assert!(dev.between_write_iterations(0, 0, 0, t0 + pulse));
        assert!(!dev.is_writing(0, 0, 0, t0 + dev.timing().t_wp));

        // A priority activate may cancel the write mid-flight.
        let mut pause = request(OpType::Activate, 0, 0, 9);
        pause.flags |= RequestFlags::PRIORITY;
        assert!(dev.is_issuable(&pause, t0 + 1));
        let pause_id = pool.alloc(pause);
        dev.issue(&mut pool, pause_id, t0 + pulse, &mut events);
        assert!(!dev.is_writing(0, 0, 0, t0 + pulse + 1));
    }

    #[test]
    fn powered_down_rank_only_accepts_powerup() {
        let mut dev = device();
        let mut pool = RequestPool::new();
        let mut events = EventQueue::new();

        let pd = pool.alloc(request(OpType::PowerDownFast, 1, 0, 0));
        assert!(dev.is_issuable(pool.get(pd), 0));
        dev.issue(&mut pool, pd, 0, &mut events);

        let act = request(OpType::Activate, 1, 0, 0);
        assert!(!dev.is_issuable(&act, 100));
        let up = request(OpType::PowerUp, 1, 0, 0);
        assert!(dev.is_issuable(&up, dev.timing().t_pd));

        let up_id = pool.alloc(up);
        dev.issue(&mut pool, up_id, 100, &mut events);
        assert!(dev.is_issuable(&act, 100 + dev.timing().t_xp_fast));
    }

    #[test]
    fn transfer_latency_from_payload_size() {
        let mut dev = device();
        let mut pool = RequestPool::new();
        let mut events = EventQueue::new();

        let act = pool.alloc(request(OpType::Activate, 0, 0, 0));
        dev.issue(&mut pool, act, 0, &mut events);
        let t0 = dev.timing().t_rcd;

        let mut xfer = request(OpType::Transfer, 0, 0, 0);
        xfer.payload = Payload::Transfer(TransferFields {
            mode: TransferMode::MoveIn,
            size: 128,
        });
        let expected = dev.timing().transfer_cycles(128);
        let id = pool.alloc(xfer);
        dev.issue(&mut pool, id, t0, &mut events);
        assert!(events.find(t0 + expected, &Event::Complete(id)));
    }
}
