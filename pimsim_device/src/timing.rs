//! Per-op latency table.
//!
//! The controller only observes issuability windows and completion times,
//! so the table collapses the full device timing sheet to the constraints
//! that shape those windows. Array-access constants model a resistive
//! array: writes are long and pulsed, compute phases sit between read and
//! write cost.

use pimsim_common::config::SimConfig;

/// Latencies in device cycles.
#[derive(Debug, Clone, Copy)]
pub struct DeviceTiming {
    /// ACTIVATE to row ready.
    pub t_rcd: u64,
    /// PRECHARGE to bank ready.
    pub t_rp: u64,
    /// Column access of a read.
    pub t_cas: u64,
    /// Data beats of one burst.
    pub t_burst: u64,
    /// REFRESH occupancy of a bank group.
    pub t_rfc: u64,
    /// Full write pulse train.
    pub t_wp: u64,
    /// One write iteration; writes may pause on these boundaries.
    pub t_wp_pulse: u64,
    /// Compute phase: input latch.
    pub t_read_cycle: u64,
    /// Compute phase: multiply-accumulate.
    pub t_real_compute: u64,
    /// Compute phase: partial read-back.
    pub t_post_read: u64,
    /// Compute phase: result write.
    pub t_write_cycle: u64,
    /// COMPUTE step bookkeeping marker.
    pub t_compute_step: u64,
    /// Power-down entry.
    pub t_pd: u64,
    /// Power-up from fast-exit power-down.
    pub t_xp_fast: u64,
    /// Power-up from slow-exit power-down.
    pub t_xp_slow: u64,
    /// Data bus width in bits, for transfer sizing.
    pub bus_width: u64,
}

impl DeviceTiming {
    /// Derive the table from a configuration snapshot.
    pub fn from_config(config: &SimConfig) -> Self {
        let t_burst = config.t_burst.max(1) / config.rate.max(1);
        Self {
            t_rcd: 14,
            t_rp: 14,
            t_cas: 10,
            t_burst: t_burst.max(1),
            t_rfc: 160,
            t_wp: 60,
            t_wp_pulse: 15,
            t_read_cycle: 20,
            t_real_compute: 30,
            t_post_read: 20,
            t_write_cycle: 40,
            t_compute_step: 4,
            t_pd: 5,
            t_xp_fast: 10,
            t_xp_slow: 40,
            bus_width: config.bus_width.max(1),
        }
    }

    /// Bus cycles for a transfer of `size` bits.
    #[inline]
    pub fn transfer_cycles(&self, size: u64) -> u64 {
        let bursts = size.div_ceil(self.bus_width).max(1);
        bursts * self.t_burst
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_scales_with_rate() {
        let mut cfg = SimConfig::default();
        cfg.t_burst = 8;
        cfg.rate = 2;
        let t = DeviceTiming::from_config(&cfg);
        assert_eq!(t.t_burst, 4);
    }

    #[test]
    fn transfer_rounds_up_to_bursts() {
        let t = DeviceTiming::from_config(&SimConfig::default());
        assert_eq!(t.transfer_cycles(1), t.t_burst);
        assert_eq!(t.transfer_cycles(64), t.t_burst);
        assert_eq!(t.transfer_cycles(65), 2 * t.t_burst);
        assert_eq!(t.transfer_cycles(128), 2 * t.t_burst);
    }

    #[test]
    fn write_pulses_divide_the_write() {
        let t = DeviceTiming::from_config(&SimConfig::default());
        assert_eq!(t.t_wp % t.t_wp_pulse, 0);
    }
}
