//! End-to-end scenarios through the host shim: full event loop, real
//! controller, real timing device.

use pimsim_common::config::SimConfig;
use pimsim_common::request::OpType;
use pimsim_device::IssuedCommand;
use pimsim_host::HostSim;

// Default geometry (COLS=1024): 384 and 390 share row 0 / col 6 / bank 0;
// 4_096_000 lands on row 62 of the same bank.
const ROW_A: u64 = 384;
const ROW_A2: u64 = 390;
const ROW_B: u64 = 4_096_000;

fn quiet_config(mutate: impl FnOnce(&mut SimConfig)) -> SimConfig {
    let mut config = SimConfig::default();
    config.use_refresh = false;
    config.close_page = 0;
    mutate(&mut config);
    config
}

fn sim(config: SimConfig) -> HostSim {
    let mut sim = HostSim::new(config).expect("valid config");
    sim.device_mut().set_record_issues(true);
    sim
}

fn ops(log: &[IssuedCommand]) -> Vec<OpType> {
    log.iter().map(|issued| issued.op).collect()
}

#[test]
fn single_read_on_a_closed_bank() {
    let mut sim = sim(quiet_config(|_| {}));
    assert!(sim.issue_command(ROW_A, 'R', 12312, 0));
    sim.cycle(2_000).unwrap();

    assert_eq!(sim.outstanding(), 0);
    assert_eq!(ops(sim.device().issue_log()), vec![OpType::Activate, OpType::Read]);

    let completions = sim.drain_completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].op, OpType::Read);
    assert!(completions[0].completion_cycle > completions[0].arrival_cycle);
}

#[test]
fn second_read_to_the_same_row_hits_the_row_buffer() {
    let mut sim = sim(quiet_config(|_| {}));
    assert!(sim.issue_command(ROW_A, 'R', 1, 0));
    sim.cycle(1).unwrap();
    assert!(sim.issue_command(ROW_A2, 'R', 2, 0));
    sim.cycle(2_000).unwrap();

    assert_eq!(sim.outstanding(), 0);
    // One activate serves both reads.
    assert_eq!(
        ops(sim.device().issue_log()),
        vec![OpType::Activate, OpType::Read, OpType::Read]
    );
    assert_eq!(sim.drain_completions().len(), 2);
}

#[test]
fn row_conflict_precharges_before_reopening() {
    let mut sim = sim(quiet_config(|_| {}));
    assert!(sim.issue_command(ROW_A, 'R', 1, 0));
    sim.cycle(2_000).unwrap();
    assert!(sim.issue_command(ROW_B, 'R', 2, 0));
    sim.cycle(2_000).unwrap();

    assert_eq!(
        ops(sim.device().issue_log()),
        vec![
            OpType::Activate,
            OpType::Read,
            OpType::Precharge,
            OpType::Activate,
            OpType::Read,
        ]
    );

    // Precharge-before-reopen: between the two activates of this bank
    // there is a precharge.
    let log = sim.device().issue_log();
    let activates: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, c)| c.op == OpType::Activate)
        .map(|(i, _)| i)
        .collect();
    let precharge = log
        .iter()
        .position(|c| c.op == OpType::Precharge)
        .expect("precharge between conflicting activates");
    assert!(activates[0] < precharge && precharge < activates[1]);
}

#[test]
fn starved_request_is_serviced_mid_stream() {
    let mut sim = sim(quiet_config(|_| {}));

    // Hammer row A, with a row-B read slipped into the middle.
    for i in 0..6u64 {
        while !sim.is_issuable() {
            sim.cycle(50).unwrap();
        }
        assert!(sim.issue_command(ROW_A + i * 256, 'R', i, 0));
    }
    while !sim.is_issuable() {
        sim.cycle(50).unwrap();
    }
    assert!(sim.issue_command(ROW_B, 'R', 99, 0));
    for i in 6..12u64 {
        while !sim.is_issuable() {
            sim.cycle(50).unwrap();
        }
        assert!(sim.issue_command(ROW_A + i * 256, 'R', i, 0));
    }
    sim.cycle(20_000).unwrap();

    assert_eq!(sim.outstanding(), 0);
    let log = sim.device().issue_log();
    let row_b_activate = log
        .iter()
        .position(|c| c.op == OpType::Activate && c.row == 62)
        .expect("row B gets its own activate");
    let last_row_a_read = log
        .iter()
        .rposition(|c| c.op == OpType::Read && c.row == 0)
        .unwrap();
    assert!(
        row_b_activate < last_row_a_read,
        "starvation must let row B preempt the row A stream"
    );
}

#[test]
fn compute_slide_x_covers_every_kernel_position() {
    let mut sim = sim(quiet_config(|_| {}));
    // Default parameters: 5x5 input, 3x3 kernel, 4-slot buffer.
    assert!(sim.issue_compute(0, 0x60_0000, 11, 'X'));

    // The parameter block is locked while the pass runs.
    assert!(!sim.set_input(28, 28, 3, 8));

    sim.cycle(200_000).unwrap();
    assert_eq!(sim.outstanding(), 0);
    assert_eq!(sim.stats().real_computes, 9);

    let completions = sim.drain_completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].op, OpType::Compute);

    // Released on completion.
    assert!(sim.set_input(28, 28, 3, 8));
}

#[test]
fn compute_slide_y_covers_every_kernel_position() {
    let mut sim = sim(quiet_config(|_| {}));
    assert!(sim.issue_compute(0, 0x60_0000, 11, 'Y'));
    sim.cycle(200_000).unwrap();

    assert_eq!(sim.outstanding(), 0);
    assert_eq!(sim.stats().real_computes, 9);
    assert_eq!(sim.drain_completions().len(), 1);
}

#[test]
fn compute_coverage_matches_geometry_for_wider_inputs() {
    for (slide, input, kernel) in [('X', 8, 3), ('Y', 8, 3), ('X', 7, 2), ('Y', 6, 3)] {
        let mut sim = sim(quiet_config(|_| {}));
        assert!(sim.set_input(input, input, 3, 8));
        assert!(sim.set_weight(kernel, kernel, 8, 8));
        assert!(sim.set_func(0));
        assert!(sim.set_act(0));
        assert!(sim.set_pool(1));
        assert!(sim.issue_compute(0, 0x60_0000, 0, slide));
        sim.cycle(500_000).unwrap();
        assert_eq!(sim.outstanding(), 0, "slide {slide} drained");

        let positions = (input - kernel + 1) * (input - kernel + 1);
        assert_eq!(
            sim.stats().real_computes,
            positions,
            "slide {slide}, {input}x{input} input, {kernel}x{kernel} kernel"
        );
    }
}

#[test]
fn refresh_preempts_and_drains() {
    let mut config = SimConfig::default();
    config.close_page = 0;
    config.use_refresh = true;
    config.banks_per_refresh = 4;
    config.refresh_rows = 4;
    // tREFI = tREFW / (ROWS / RefreshRows) = 400 cycles.
    config.t_refw = 400 * (config.rows / config.refresh_rows);
    config.delayed_refresh_threshold = 1;
    let mut sim = sim(config);

    for i in 0..40u64 {
        while !sim.is_issuable() {
            sim.cycle(50).unwrap();
        }
        assert!(sim.issue_command(i * 64, 'R', i, 0));
        sim.cycle(40).unwrap();
    }
    sim.cycle(50_000).unwrap();

    assert_eq!(sim.outstanding(), 0);
    assert!(sim.stats().refreshes >= 1, "a refresh must have issued");
    assert!(
        ops(sim.device().issue_log()).contains(&OpType::Refresh),
        "refresh reaches the device"
    );
}

#[test]
fn at_most_one_command_per_cycle_and_clean_queues() {
    let mut sim = sim(quiet_config(|_| {}));
    for i in 0..5u64 {
        assert!(sim.issue_command(ROW_A + i * 64, 'R', i, 0));
    }
    sim.cycle(5_000).unwrap();

    assert_eq!(sim.outstanding(), 0);
    let log = sim.device().issue_log();
    for pair in log.windows(2) {
        assert!(
            pair[1].cycle > pair[0].cycle,
            "two commands issued in cycle {}",
            pair[0].cycle
        );
    }
    // Cleanup idempotence: nothing issued lingers in any queue.
    assert!(sim.controller().no_issued_entries(sim.pool()));
}

#[test]
fn fifo_backpressure_and_bad_input() {
    let mut sim = sim(quiet_config(|_| {}));

    // Default CommandQueueSize is 5.
    for i in 0..5u64 {
        assert!(sim.is_issuable());
        assert!(sim.issue_command(i * 64, 'R', 0, 0));
    }
    assert!(!sim.is_issuable());
    assert!(!sim.issue_command(0, 'R', 0, 0));
    assert_eq!(sim.outstanding(), 5);

    // Bad host input is reported, not fatal.
    assert!(!sim.is_issuable_op('Q', 0, 0, 0));
    assert!(!sim.issue_compute(0, 0, 0, 'Z'));
    assert!(sim.is_issuable_compute(0, 0, 'C', 0, 'Y'));
    assert!(!sim.is_issuable_compute(0, 0, 'R', 0, 'Y'));

    sim.cycle(10_000).unwrap();
    assert_eq!(sim.outstanding(), 0);
}

#[test]
fn transfers_and_weight_loads_complete() {
    let mut sim = sim(quiet_config(|_| {}));
    assert!(sim.issue_transfer(333 * 64, 123, 0, 'I', 128));
    assert!(sim.issue_transfer(333 * 64, 123, 0, 'O', 128));
    assert!(sim.issue_command(ROW_A, 'L', 12312, 0));
    assert!(!sim.issue_transfer(1, 2, 0, 'X', 128));
    sim.cycle(10_000).unwrap();

    assert_eq!(sim.outstanding(), 0);
    let completions = sim.drain_completions();
    assert_eq!(completions.len(), 3);
    assert_eq!(
        completions
            .iter()
            .filter(|c| c.op == OpType::Transfer)
            .count(),
        2
    );
    assert_eq!(sim.stats().transfers, 2);
    assert_eq!(sim.stats().writes, 1);
}

#[test]
fn idle_ranks_power_down_and_recover() {
    let mut sim = sim(quiet_config(|c| c.use_low_power = true));
    // Rank 1 starts directly above rank 0 in the address map.
    const RANK1_BASE: u64 = 64 * 1024 * 8192 * 8;

    assert!(sim.issue_command(ROW_A, 'R', 1, 0));
    sim.cycle(2_000).unwrap();
    // The untouched rank went down during rank 0's wakes.
    assert!(sim.stats().power_transitions >= 1);

    assert!(sim.issue_command(RANK1_BASE + ROW_A, 'R', 2, 0));
    sim.cycle(10_000).unwrap();
    assert_eq!(sim.outstanding(), 0);
    assert_eq!(sim.drain_completions().len(), 2);
    assert!(
        ops(sim.device().issue_log()).contains(&OpType::PowerUp),
        "the second read must wake its rank"
    );
}

#[test]
fn alternative_queue_layouts_stay_live() {
    use pimsim_common::config::QueueModel;

    for (model, scheme) in [
        (QueueModel::PerRank, 1),
        (QueueModel::PerBank, 0),
        (QueueModel::PerBank, 2),
        (QueueModel::PerSubArray, 1),
    ] {
        let mut config = quiet_config(|_| {});
        config.queue_model = model;
        config.schedule_scheme = scheme;
        config.mat_height = Some(1024);
        let mut sim = sim(config);

        // One read per bank, plus a row-62 conflict on bank 0.
        const BANK_STRIDE: u64 = 64 * 1024 * 8192;
        for i in 0..4u64 {
            assert!(sim.issue_command(ROW_A + i * BANK_STRIDE, 'R', i, 0));
        }
        assert!(sim.issue_command(ROW_B, 'R', 9, 0));
        sim.cycle(20_000).unwrap();

        assert_eq!(sim.outstanding(), 0, "{model:?} scheme {scheme} drained");
        assert_eq!(sim.drain_completions().len(), 5);
    }
}

#[test]
fn write_pausing_workload_stays_live() {
    let mut config = quiet_config(|c| c.write_pausing = true);
    config.pause_mode = pimsim_common::config::PauseMode::Optimal;
    let mut sim = sim(config);

    assert!(sim.issue_command(ROW_A, 'W', 1, 0));
    sim.cycle(5).unwrap();
    assert!(sim.issue_command(ROW_B, 'R', 2, 0));
    sim.cycle(20_000).unwrap();

    assert_eq!(sim.outstanding(), 0);
    let completions = sim.drain_completions();
    assert_eq!(completions.len(), 2);
}
