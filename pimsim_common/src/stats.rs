//! Simulation statistics.
//!
//! Flat counters updated on the hot paths with no allocation; dumped as
//! one JSON object per run (appended to the configured stats file and to
//! stderr on a deadlock abort).

use std::path::Path;

use serde::Serialize;

use crate::request::OpType;

/// Flat counter block for one simulation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimStats {
    /// Virtual cycles elapsed.
    pub simulation_cycles: u64,
    /// Controller wakeups (command wakes + refresh pulses).
    pub wakeup_count: u64,
    /// Device commands issued, all types.
    pub issued_commands: u64,
    /// Host transactions admitted to a transaction queue.
    pub admitted_transactions: u64,
    /// Requests completed by the device.
    pub completed_requests: u64,
    /// ACTIVATE commands issued.
    pub activates: u64,
    /// PRECHARGE / PRECHARGE_ALL commands issued.
    pub precharges: u64,
    /// READ / READ_PRECHARGE commands issued.
    pub reads: u64,
    /// WRITE / WRITE_PRECHARGE / LOAD_WEIGHT commands issued.
    pub writes: u64,
    /// REFRESH commands issued.
    pub refreshes: u64,
    /// COMPUTE steps observed by the device.
    pub compute_steps: u64,
    /// REALCOMPUTE phase commands issued.
    pub real_computes: u64,
    /// READCYCLE / POSTREAD / WRITECYCLE phase commands issued.
    pub compute_phases: u64,
    /// TRANSFER commands issued.
    pub transfers: u64,
    /// Power-state transitions issued.
    pub power_transitions: u64,
}

impl SimStats {
    /// Account one issued device command.
    pub fn record_issue(&mut self, op: OpType) {
        self.issued_commands += 1;
        match op {
            OpType::Activate => self.activates += 1,
            OpType::Precharge | OpType::PrechargeAll => self.precharges += 1,
            OpType::Read | OpType::ReadPrecharge | OpType::CachedRead => self.reads += 1,
            OpType::Write
            | OpType::WritePrecharge
            | OpType::CachedWrite
            | OpType::LoadWeight => self.writes += 1,
            OpType::Refresh => self.refreshes += 1,
            OpType::Compute => self.compute_steps += 1,
            OpType::RealCompute => self.real_computes += 1,
            OpType::ReadCycle | OpType::PostRead | OpType::WriteCycle => self.compute_phases += 1,
            OpType::Transfer => self.transfers += 1,
            OpType::PowerUp
            | OpType::PowerDownFast
            | OpType::PowerDownSlow
            | OpType::PowerDownActive => self.power_transitions += 1,
        }
    }

    /// Serialize to one JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("stats serialize")
    }

    /// Append one JSON line to `path`.
    pub fn dump_to(&self, path: &Path) -> std::io::Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_accounting_by_op_class() {
        let mut stats = SimStats::default();
        stats.record_issue(OpType::Activate);
        stats.record_issue(OpType::Read);
        stats.record_issue(OpType::ReadPrecharge);
        stats.record_issue(OpType::RealCompute);
        stats.record_issue(OpType::Refresh);
        assert_eq!(stats.issued_commands, 5);
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.activates, 1);
        assert_eq!(stats.real_computes, 1);
        assert_eq!(stats.refreshes, 1);
    }

    #[test]
    fn dump_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = SimStats::default();
        stats.dump_to(&path).unwrap();
        stats.dump_to(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"simulation_cycles\":0"));
    }
}
