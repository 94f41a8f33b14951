//! Configuration loading and validation.
//!
//! The whole simulator is parameterized by one immutable [`SimConfig`]
//! snapshot loaded from a TOML file at startup. Key spelling follows the
//! device config vocabulary (`ROWS`, `tREFW`, `QueueModel`, ...); unknown
//! keys are rejected. Geometry keys are mandatory, everything else has a
//! default.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Compile-time capacity of the host command FIFO; the runtime
/// `CommandQueueSize` limit must fit below it.
pub const HOST_QUEUE_CAP: usize = 16;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found or unreadable.
    #[error("configuration file {0}: {1}")]
    Io(PathBuf, String),

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Command queue layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueModel {
    /// One queue per rank.
    PerRank,
    /// One queue per (rank, bank).
    PerBank,
    /// One queue per (rank, bank, subarray).
    PerSubArray,
}

/// Power-down exit speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerDownMode {
    /// Precharged power-down with fast exit.
    #[serde(rename = "FASTEXIT")]
    FastExit,
    /// Precharged power-down with slow exit.
    #[serde(rename = "SLOWEXIT")]
    SlowExit,
}

/// Write-pausing discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseMode {
    /// Pause only between write iterations; otherwise stall the scheduler.
    Normal,
    /// Cancel a write mid-iteration.
    Optimal,
}

fn default_decoder() -> String {
    "Default".to_string()
}

fn default_interconnect() -> String {
    "OffChipBus".to_string()
}

fn default_device_width() -> u64 {
    8
}

fn default_t_burst() -> u64 {
    4
}

fn default_rate() -> u64 {
    2
}

fn default_bus_width() -> u64 {
    64
}

fn default_cpu_freq() -> u64 {
    2000
}

fn default_queue_model() -> QueueModel {
    QueueModel::PerBank
}

fn default_schedule_scheme() -> u8 {
    1
}

fn default_close_page() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

fn default_banks_per_refresh() -> u64 {
    1
}

fn default_refresh_rows() -> u64 {
    4
}

fn default_t_refw() -> u64 {
    42_666_667
}

fn default_refresh_threshold() -> u64 {
    1
}

fn default_power_down_mode() -> PowerDownMode {
    PowerDownMode::FastExit
}

fn default_rb_size() -> u64 {
    64
}

fn default_pause_mode() -> PauseMode {
    PauseMode::Normal
}

fn default_deadlock_timer() -> u64 {
    10_000_000
}

fn default_host_queue_size() -> usize {
    5
}

/// Immutable simulator configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Address decoder selection; only "Default" is implemented.
    #[serde(rename = "Decoder", default = "default_decoder")]
    pub decoder: String,
    /// Interconnect selection; only "OffChipBus" is implemented.
    #[serde(rename = "INTERCONNECT", default = "default_interconnect")]
    pub interconnect: String,
    /// Rows per subarray; omit for an unpartitioned bank.
    #[serde(rename = "MATHeight", default)]
    pub mat_height: Option<u64>,
    /// Rows per bank.
    #[serde(rename = "ROWS")]
    pub rows: u64,
    /// Columns per row.
    #[serde(rename = "COLS")]
    pub cols: u64,
    /// Banks per rank.
    #[serde(rename = "BANKS")]
    pub banks: u64,
    /// Ranks per channel.
    #[serde(rename = "RANKS")]
    pub ranks: u64,
    /// Device data pins.
    #[serde(rename = "DeviceWidth", default = "default_device_width")]
    pub device_width: u64,
    /// Burst length in data-bus beats.
    #[serde(rename = "tBURST", default = "default_t_burst")]
    pub t_burst: u64,
    /// Data transfers per clock edge pair.
    #[serde(rename = "RATE", default = "default_rate")]
    pub rate: u64,
    /// Data bus width in bits.
    #[serde(rename = "BusWidth", default = "default_bus_width")]
    pub bus_width: u64,
    /// Host clock in MHz, for cycle accounting against the device clock.
    #[serde(rename = "CPUFreq", default = "default_cpu_freq")]
    pub cpu_freq: u64,
    /// Command queue layout.
    #[serde(rename = "QueueModel", default = "default_queue_model")]
    pub queue_model: QueueModel,
    /// 0 = fixed rank0/bank0 first, 1 = rank-first round-robin,
    /// 2 = bank-first round-robin.
    #[serde(rename = "ScheduleScheme", default = "default_schedule_scheme")]
    pub schedule_scheme: u8,
    /// Row buffer policy: 0 = open page, 1 = relaxed close page,
    /// 2 = restricted close page.
    #[serde(rename = "ClosePage", default = "default_close_page")]
    pub close_page: u8,
    /// Emit explicit/implicit precharges.
    #[serde(rename = "UsePrecharge", default = "default_true")]
    pub use_precharge: bool,
    /// Run the refresh engine.
    #[serde(rename = "UseRefresh", default = "default_true")]
    pub use_refresh: bool,
    /// Banks refreshed in parallel by one REFRESH.
    #[serde(rename = "BanksPerRefresh", default = "default_banks_per_refresh")]
    pub banks_per_refresh: u64,
    /// Rows refreshed per REFRESH command.
    #[serde(rename = "RefreshRows", default = "default_refresh_rows")]
    pub refresh_rows: u64,
    /// Refresh window in device cycles.
    #[serde(rename = "tREFW", default = "default_t_refw")]
    pub t_refw: u64,
    /// Deferred pulses before a refresh becomes mandatory.
    #[serde(
        rename = "DelayedRefreshThreshold",
        default = "default_refresh_threshold"
    )]
    pub delayed_refresh_threshold: u64,
    /// Enable opportunistic rank power-down.
    #[serde(rename = "UseLowPower", default)]
    pub use_low_power: bool,
    /// Exit speed of precharged power-down.
    #[serde(rename = "PowerDownMode", default = "default_power_down_mode")]
    pub power_down_mode: PowerDownMode,
    /// Start with all ranks powered down.
    #[serde(rename = "InitPD", default)]
    pub init_pd: bool,
    /// Columns latched per mux level of the row buffer.
    #[serde(rename = "RBSize", default = "default_rb_size")]
    pub rb_size: u64,
    /// Allow reads to preempt pausable writes.
    #[serde(rename = "WritePausing", default)]
    pub write_pausing: bool,
    /// Write-pausing discipline.
    #[serde(rename = "pauseMode", default = "default_pause_mode")]
    pub pause_mode: PauseMode,
    /// Cycles a queued command may wait before the simulator aborts.
    #[serde(rename = "DeadlockTimer", default = "default_deadlock_timer")]
    pub deadlock_timer: u64,
    /// Statistics dump path (JSON lines, appended).
    #[serde(rename = "StatsFile", default)]
    pub stats_file: Option<PathBuf>,
    /// Log a configuration summary at startup.
    #[serde(rename = "PrintConfig", default)]
    pub print_config: bool,
    /// Host command FIFO depth.
    #[serde(rename = "CommandQueueSize", default = "default_host_queue_size")]
    pub host_queue_size: usize,
}

impl SimConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        let config: SimConfig =
            toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation; every rule here is fatal at init.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::Validation(msg));

        if self.rows == 0 || self.cols == 0 || self.banks == 0 || self.ranks == 0 {
            return fail("ROWS, COLS, BANKS and RANKS must be non-zero".into());
        }
        if self.decoder != "Default" {
            return fail(format!("unknown Decoder `{}`", self.decoder));
        }
        if self.interconnect != "OffChipBus" {
            return fail(format!("unknown INTERCONNECT `{}`", self.interconnect));
        }
        if let Some(mat) = self.mat_height {
            if mat == 0 || self.rows % mat != 0 {
                return fail(format!("MATHeight {mat} must divide ROWS {}", self.rows));
            }
        }
        if self.rb_size == 0 || self.cols % self.rb_size != 0 {
            return fail(format!("RBSize {} must divide COLS {}", self.rb_size, self.cols));
        }
        if self.schedule_scheme > 2 {
            return fail(format!("ScheduleScheme {} not in 0..=2", self.schedule_scheme));
        }
        if self.close_page > 2 {
            return fail(format!("ClosePage {} not in 0..=2", self.close_page));
        }
        if self.use_refresh {
            if self.banks_per_refresh == 0 {
                return fail("UseRefresh with BanksPerRefresh = 0".into());
            }
            if self.banks_per_refresh > self.banks {
                return fail(format!(
                    "BanksPerRefresh {} exceeds BANKS {}",
                    self.banks_per_refresh, self.banks
                ));
            }
            if self.refresh_rows == 0 || self.refresh_rows > self.rows {
                return fail(format!("RefreshRows {} not in 1..=ROWS", self.refresh_rows));
            }
            if self.t_refi() == 0 {
                return fail("tREFW too small: derived refresh interval is zero".into());
            }
        }
        if self.deadlock_timer == 0 {
            return fail("DeadlockTimer must be non-zero".into());
        }
        if self.host_queue_size == 0 || self.host_queue_size > HOST_QUEUE_CAP {
            return fail(format!(
                "CommandQueueSize {} not in 1..={HOST_QUEUE_CAP}",
                self.host_queue_size
            ));
        }
        Ok(())
    }

    /// Rows per subarray (the full bank when MATHeight is absent).
    #[inline]
    pub fn mat_height_or_rows(&self) -> u64 {
        self.mat_height.unwrap_or(self.rows)
    }

    /// Subarrays per bank.
    #[inline]
    pub fn subarray_count(&self) -> u64 {
        self.rows / self.mat_height_or_rows()
    }

    /// Refresh interval between pulses for one (rank, group).
    #[inline]
    pub fn t_refi(&self) -> u64 {
        self.t_refw / (self.rows / self.refresh_rows)
    }

    /// Refresh bank groups per rank.
    #[inline]
    pub fn refresh_group_count(&self) -> u64 {
        self.banks / self.banks_per_refresh
    }

    /// Command queues implied by the queue model.
    pub fn command_queue_count(&self) -> u64 {
        match self.queue_model {
            QueueModel::PerRank => self.ranks,
            QueueModel::PerBank => self.ranks * self.banks,
            QueueModel::PerSubArray => self.ranks * self.banks * self.subarray_count(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            decoder: default_decoder(),
            interconnect: default_interconnect(),
            mat_height: None,
            rows: 8192,
            cols: 1024,
            banks: 8,
            ranks: 2,
            device_width: default_device_width(),
            t_burst: default_t_burst(),
            rate: default_rate(),
            bus_width: default_bus_width(),
            cpu_freq: default_cpu_freq(),
            queue_model: default_queue_model(),
            schedule_scheme: default_schedule_scheme(),
            close_page: default_close_page(),
            use_precharge: true,
            use_refresh: true,
            banks_per_refresh: default_banks_per_refresh(),
            refresh_rows: default_refresh_rows(),
            t_refw: default_t_refw(),
            delayed_refresh_threshold: default_refresh_threshold(),
            use_low_power: false,
            power_down_mode: default_power_down_mode(),
            init_pd: false,
            rb_size: default_rb_size(),
            write_pausing: false,
            pause_mode: default_pause_mode(),
            deadlock_timer: default_deadlock_timer(),
            stats_file: None,
            print_config: false,
            host_queue_size: default_host_queue_size(),
        }
    }
}

impl fmt::Display for SimConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "geometry: {} ranks x {} banks x {} rows x {} cols ({} subarrays/bank)",
            self.ranks,
            self.banks,
            self.rows,
            self.cols,
            self.subarray_count()
        )?;
        writeln!(
            f,
            "queues: {:?} ({} queues, scheme {}), close page {}, precharge {}",
            self.queue_model,
            self.command_queue_count(),
            self.schedule_scheme,
            self.close_page,
            self.use_precharge
        )?;
        write!(
            f,
            "refresh: {} (groups of {}, tREFI {}), low power: {}, write pausing: {}",
            self.use_refresh,
            self.banks_per_refresh,
            if self.use_refresh { self.t_refi() } else { 0 },
            self.use_low_power,
            self.write_pausing
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let cfg: SimConfig =
            toml::from_str("ROWS = 8192\nCOLS = 1024\nBANKS = 8\nRANKS = 2\n").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.queue_model, QueueModel::PerBank);
        assert_eq!(cfg.command_queue_count(), 16);
        assert_eq!(cfg.subarray_count(), 1);
        assert_eq!(cfg.host_queue_size, 5);
        assert!(cfg.use_refresh);
    }

    #[test]
    fn missing_geometry_is_a_parse_error() {
        let err = toml::from_str::<SimConfig>("COLS = 1024\nBANKS = 8\nRANKS = 2\n");
        assert!(err.is_err());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = toml::from_str::<SimConfig>(
            "ROWS = 8192\nCOLS = 1024\nBANKS = 8\nRANKS = 2\nBogus = 1\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn refresh_without_group_size_fails_validation() {
        let mut cfg = SimConfig::default();
        cfg.banks_per_refresh = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
        cfg.use_refresh = false;
        cfg.validate().unwrap();
    }

    #[test]
    fn mat_height_must_divide_rows() {
        let mut cfg = SimConfig::default();
        cfg.mat_height = Some(1000);
        assert!(cfg.validate().is_err());
        cfg.mat_height = Some(1024);
        cfg.validate().unwrap();
        assert_eq!(cfg.subarray_count(), 8);
    }

    #[test]
    fn per_subarray_queue_count() {
        let mut cfg = SimConfig::default();
        cfg.mat_height = Some(1024);
        cfg.queue_model = QueueModel::PerSubArray;
        assert_eq!(cfg.command_queue_count(), 2 * 8 * 8);
    }

    #[test]
    fn t_refi_derivation() {
        let mut cfg = SimConfig::default();
        cfg.t_refw = 64_000;
        cfg.refresh_rows = 4;
        cfg.rows = 8192;
        // 64000 / (8192 / 4)
        assert_eq!(cfg.t_refi(), 31);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "ROWS = 4096\nCOLS = 512\nBANKS = 4\nRANKS = 1\nQueueModel = \"PerRank\"\nPowerDownMode = \"SLOWEXIT\""
        )
        .unwrap();
        let cfg = SimConfig::load(file.path()).unwrap();
        assert_eq!(cfg.queue_model, QueueModel::PerRank);
        assert_eq!(cfg.power_down_mode, PowerDownMode::SlowExit);
        assert_eq!(cfg.command_queue_count(), 1);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = SimConfig::load(Path::new("/nonexistent/pimsim.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, _)));
    }
}
