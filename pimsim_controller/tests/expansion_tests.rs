//! Controller-level tests: expansion paths, finder preconditions,
//! refresh handling and the deadlock watchdog, driven against the real
//! timing device without the host shim.

use pimsim_common::prelude::*;
use pimsim_controller::{MemoryController, SimCtx, WriteStallScan};
use pimsim_device::TimingDevice;

struct Harness {
    pool: RequestPool,
    events: EventQueue,
    device: TimingDevice,
    stats: SimStats,
    controller: MemoryController,
}

impl Harness {
    fn new(mutate: impl FnOnce(&mut SimConfig)) -> Self {
        let mut config = SimConfig::default();
        config.use_refresh = false;
        mutate(&mut config);
        config.validate().unwrap();
        let mut pool = RequestPool::new();
        let mut events = EventQueue::new();
        let controller = MemoryController::new(config.clone(), &mut pool, &mut events);
        let device = TimingDevice::new(&config);
        Self {
            pool,
            events,
            device,
            stats: SimStats::default(),
            controller,
        }
    }

    fn with<R>(&mut self, f: impl FnOnce(&mut MemoryController, &mut SimCtx<'_>) -> R) -> R {
        let Self {
            pool,
            events,
            device,
            stats,
            controller,
        } = self;
        let mut ctx = SimCtx {
            pool,
            events,
            device: &mut *device,
            stats,
        };
        f(controller, &mut ctx)
    }

    fn advance(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.events.advance();
        }
    }

    fn enqueue(&mut self, op: OpType, phys: u64) -> RequestId {
        let id = self.pool.alloc(Request::host(op, phys, 0, 0));
        self.with(|c, ctx| c.enqueue(0, id, ctx));
        id
    }

    /// Pretend the device consumed everything queued: flag all entries
    /// issued and sweep them.
    fn fake_drain(&mut self, qid: usize) {
        for id in self.controller.command_queue_ids(qid) {
            self.pool.get_mut(id).flags |= RequestFlags::ISSUED;
        }
        self.with(|c, ctx| c.cleanup(ctx.pool));
    }

    fn queue_ops(&self, qid: usize) -> Vec<OpType> {
        self.controller.command_queue_ops(qid, &self.pool)
    }
}

// Addresses in the default geometry (COLS=1024): 384 -> row 0 / col 6 /
// bank 0; 4_096_000 -> row 62 / col 512 / bank 0.
const ROW_A: u64 = 384;
const ROW_A2: u64 = 390;
const ROW_B: u64 = 4_096_000;

#[test]
fn closed_bank_read_expands_to_activate_then_read() {
    let mut h = Harness::new(|c| c.close_page = 0);
    h.enqueue(OpType::Read, ROW_A);
    h.advance(1);

    let picked = h
        .with(|c, ctx| c.find_closed_bank_request(0, ctx, &mut |_| true))
        .expect("closed-bank candidate");
    assert!(h.with(|c, ctx| c.issue_memory_commands(picked, ctx)));

    let qid = h.controller.queue_id_of_phys(ROW_A);
    assert_eq!(h.queue_ops(qid), vec![OpType::Activate, OpType::Read]);
    // Open-page policy keeps the subarray resident.
    assert!(h.controller.bank_state(0, 0).activate_queued);
    assert!(h.controller.subarray_state(0, 0, 0).active);
    assert_eq!(h.controller.subarray_state(0, 0, 0).effective_row, 0);
}

#[test]
fn relaxed_close_page_uses_implicit_precharge() {
    let mut h = Harness::new(|c| c.close_page = 1);
    h.enqueue(OpType::Read, ROW_A);
    h.advance(1);

    let picked = h
        .with(|c, ctx| c.find_closed_bank_request(0, ctx, &mut |_| true))
        .unwrap();
    // No other row-buffer-hit candidate: the finder marks it last.
    assert!(
        h.pool
            .get(picked)
            .flags
            .contains(RequestFlags::LAST_REQUEST)
    );
    assert!(h.with(|c, ctx| c.issue_memory_commands(picked, ctx)));

    let qid = h.controller.queue_id_of_phys(ROW_A);
    assert_eq!(
        h.queue_ops(qid),
        vec![OpType::Activate, OpType::ReadPrecharge]
    );
    assert!(!h.controller.bank_state(0, 0).activate_queued);
    assert!(!h.controller.subarray_state(0, 0, 0).active);
}

#[test]
fn same_cycle_arrival_is_not_selectable() {
    let mut h = Harness::new(|c| c.close_page = 0);
    h.advance(1);
    h.enqueue(OpType::Read, ROW_A);

    // Arrived this cycle: the one-cycle admission delay blocks it.
    assert!(
        h.with(|c, ctx| c.find_closed_bank_request(0, ctx, &mut |_| true))
            .is_none()
    );
    h.advance(1);
    assert!(
        h.with(|c, ctx| c.find_closed_bank_request(0, ctx, &mut |_| true))
            .is_some()
    );
}

#[test]
fn row_miss_inserts_precharge_before_activate() {
    let mut h = Harness::new(|c| c.close_page = 0);
    h.enqueue(OpType::Read, ROW_A);
    h.advance(1);
    let first = h
        .with(|c, ctx| c.find_closed_bank_request(0, ctx, &mut |_| true))
        .unwrap();
    h.with(|c, ctx| c.issue_memory_commands(first, ctx));
    let qid = h.controller.queue_id_of_phys(ROW_A);

    // Drain the queue as the device would.
    h.fake_drain(qid);
    assert!(h.queue_ops(qid).is_empty());

    // Same bank, different row: the expansion precharges the old row.
    h.enqueue(OpType::Read, ROW_B);
    h.advance(1);
    let second = h
        .with(|c, ctx| c.find_oldest_ready_request(0, ctx, &mut |_| true))
        .unwrap();
    h.with(|c, ctx| c.issue_memory_commands(second, ctx));
    assert_eq!(
        h.queue_ops(qid),
        vec![OpType::Precharge, OpType::Activate, OpType::Read]
    );
    assert_eq!(h.controller.subarray_state(0, 0, 0).effective_row, 62);
}

#[test]
fn row_hit_appends_only_the_request_and_counts_starvation() {
    let mut h = Harness::new(|c| c.close_page = 0);
    h.enqueue(OpType::Read, ROW_A);
    h.advance(1);
    let first = h
        .with(|c, ctx| c.find_closed_bank_request(0, ctx, &mut |_| true))
        .unwrap();
    h.with(|c, ctx| c.issue_memory_commands(first, ctx));
    let qid = h.controller.queue_id_of_phys(ROW_A);
    h.fake_drain(qid);

    h.enqueue(OpType::Read, ROW_A2);
    h.advance(1);
    let second = h
        .with(|c, ctx| c.find_row_buffer_hit(0, ctx, &mut |_| true))
        .expect("row-buffer hit");
    h.with(|c, ctx| c.issue_memory_commands(second, ctx));
    assert_eq!(h.queue_ops(qid), vec![OpType::Read]);
    assert_eq!(h.controller.subarray_state(0, 0, 0).starvation, 1);
}

#[test]
fn starved_request_evicts_a_lingering_row() {
    let mut h = Harness::new(|c| c.close_page = 0);
    h.enqueue(OpType::Read, ROW_A);
    h.advance(1);
    let first = h
        .with(|c, ctx| c.find_closed_bank_request(0, ctx, &mut |_| true))
        .unwrap();
    h.with(|c, ctx| c.issue_memory_commands(first, ctx));
    let qid = h.controller.queue_id_of_phys(ROW_A);
    h.fake_drain(qid);

    // Four row hits push the subarray to the starvation threshold.
    for _ in 0..4 {
        h.enqueue(OpType::Read, ROW_A);
        h.advance(1);
        let hit = h
            .with(|c, ctx| c.find_row_buffer_hit(0, ctx, &mut |_| true))
            .unwrap();
        h.with(|c, ctx| c.issue_memory_commands(hit, ctx));
        h.fake_drain(qid);
    }
    assert_eq!(h.controller.subarray_state(0, 0, 0).starvation, 4);

    h.enqueue(OpType::Read, ROW_B);
    h.advance(1);
    let starved = h.with(|c, ctx| c.find_starved_request(0, ctx, &mut |_| true));
    assert!(starved.is_some(), "far-off request should evict the row");
}

#[test]
fn compute_trigger_expands_the_four_phase_pipeline() {
    let mut h = Harness::new(|c| c.close_page = 0);
    let mut request = Request::host(OpType::Compute, 0, 11, 0);
    request.payload = Payload::Compute(ComputeFields::new(
        0,
        DecodedAddress::default(),
        0x60_0000,
        DecodedAddress::default(),
        Slide::X,
        ComputeParams::default(),
    ));
    let id = h.pool.alloc(request);
    h.with(|c, ctx| c.enqueue(0, id, ctx));
    h.advance(1);

    let picked = h
        .with(|c, ctx| c.find_compute_request(0, ctx))
        .expect("compute candidate on an inactive bank");
    assert!(h.with(|c, ctx| c.issue_memory_commands(picked, ctx)));

    let qid = h.controller.queue_id_of_phys(0);
    assert_eq!(
        h.queue_ops(qid),
        vec![
            OpType::Activate,
            OpType::ReadCycle,
            OpType::RealCompute,
            OpType::PostRead,
            OpType::WriteCycle,
            OpType::Compute,
        ]
    );
    // The window engine manages its own activates; the bank reads as
    // closed for the next transaction.
    assert!(!h.controller.bank_state(0, 0).activate_queued);

    let fields = *h
        .pool
        .get(picked)
        .payload
        .compute()
        .expect("trigger keeps its compute payload");
    assert!(fields.is_buffer);
    assert_eq!(fields.row, 1);
    assert_eq!(fields.col, 1);
    // Default geometry: 5x5 input, 3x3 kernel, 4-slot buffer.
    assert_eq!(fields.buffer_size, 4);
    assert_eq!(fields.buffer_n, 2);
    assert!(!fields.col_complete);
}

#[test]
fn refresh_pulse_flags_the_group_and_handle_emits_one_refresh() {
    let mut h = Harness::new(|c| {
        c.use_refresh = true;
        c.banks_per_refresh = 4;
        c.delayed_refresh_threshold = 1;
    });
    h.advance(1);

    let pulse = h.pool.alloc(Request::host(OpType::Refresh, 0, 0, 0));
    h.with(|c, ctx| c.process_refresh_pulse(pulse, ctx));
    for bank in 0..4 {
        assert!(h.controller.bank_state(0, bank).need_refresh);
    }
    assert!(!h.controller.bank_state(0, 4).need_refresh);

    assert!(h.with(|c, ctx| c.handle_refresh(ctx)));
    let qid = h.controller.queue_id_of_phys(0);
    assert_eq!(h.queue_ops(qid), vec![OpType::Refresh]);
    for bank in 0..4 {
        assert!(h.controller.bank_state(0, bank).refresh_queued);
        assert!(!h.controller.bank_state(0, bank).need_refresh);
    }

    // Issue it: the group accepts commands again.
    h.advance(1);
    h.with(|c, ctx| c.cycle_command_queues(ctx)).unwrap();
    for bank in 0..4 {
        assert!(!h.controller.bank_state(0, bank).refresh_queued);
    }
    h.with(|c, ctx| c.cleanup(ctx.pool));
    assert!(h.controller.no_issued_entries(&h.pool));
    assert!(h.queue_ops(qid).is_empty());
}

#[test]
fn write_stalled_read_stalls_mid_iteration_under_normal_pausing() {
    let mut h = Harness::new(|c| {
        c.close_page = 0;
        c.write_pausing = true;
    });

    // Put a write in flight on (0, 0, 0) directly at the device.
    let act = h.pool.alloc(Request::host(OpType::Activate, ROW_A, 0, 0));
    h.pool.get_mut(act).addr = h.controller.decoder().translate(ROW_A);
    let t_rcd = h.device.timing().t_rcd;
    h.with(|_, ctx| {
        let id = act;
        ctx.device.issue(ctx.pool, id, 0, ctx.events);
    });
    h.advance(t_rcd);
    let write = h.pool.alloc(Request::host(OpType::Write, ROW_A, 0, 0));
    h.pool.get_mut(write).addr = h.controller.decoder().translate(ROW_A);
    let now = h.events.current_cycle();
    h.with(|_, ctx| {
        let id = write;
        ctx.device.issue(ctx.pool, id, now, ctx.events);
    });

    h.enqueue(OpType::Read, ROW_A2);
    // One cycle past the write start: mid-iteration.
    h.advance(1);
    assert_eq!(
        h.with(|c, ctx| c.find_write_stalled_read(0, ctx, &mut |_| true)),
        WriteStallScan::Stall
    );

    // On a pulse boundary the read is extracted.
    let pulse = h.device.timing().t_wp_pulse;
    h.advance(pulse - 1);
    assert!(matches!(
        h.with(|c, ctx| c.find_write_stalled_read(0, ctx, &mut |_| true)),
        WriteStallScan::Hit(_)
    ));
}

#[test]
fn stuck_queue_head_trips_the_deadlock_timer() {
    let mut h = Harness::new(|c| {
        c.close_page = 0;
        c.use_low_power = true;
        c.init_pd = true;
        c.deadlock_timer = 10;
    });

    h.enqueue(OpType::Read, ROW_A);
    h.advance(1);
    let picked = h
        .with(|c, ctx| c.find_closed_bank_request(0, ctx, &mut |_| true))
        .unwrap();
    h.with(|c, ctx| c.issue_memory_commands(picked, ctx));

    // The rank is powered down and nothing powers it up: the activate at
    // the head can never issue.
    h.advance(20);
    let result = h.with(|c, ctx| c.cycle_command_queues(ctx));
    assert!(matches!(result, Err(SimError::Deadlock(_))));
}
