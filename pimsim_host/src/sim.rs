//! The simulator facade.
//!
//! `HostSim` owns every simulator component (request arena, event queue,
//! controller, device, stats) and wires them together per call, so no
//! component holds a pointer to another. Host commands enter a bounded
//! FIFO; each advanced cycle drains at most one command into the
//! controller and then fires the cycle's due events in priority order.

use std::path::Path;

use heapless::Deque;
use static_assertions::const_assert;
use tracing::{info, warn};

use pimsim_common::config::HOST_QUEUE_CAP;
use pimsim_common::prelude::*;
use pimsim_controller::{CompletionRoute, MemoryController, SimCtx};
use pimsim_device::TimingDevice;

const_assert!(HOST_QUEUE_CAP > 0);

/// One completed host request, as reported to the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    /// Operation.
    pub op: OpType,
    /// Physical byte address.
    pub phys_addr: u64,
    /// Cycle the request entered the controller.
    pub arrival_cycle: u64,
    /// Cycle the device completed it.
    pub completion_cycle: u64,
}

/// The host-visible simulator.
pub struct HostSim {
    config: SimConfig,
    pool: RequestPool,
    events: EventQueue,
    controller: MemoryController,
    device: TimingDevice,
    stats: SimStats,
    fifo: Deque<RequestId, HOST_QUEUE_CAP>,
    outstanding: u64,
    compute: ComputeSettings,
    completions: Vec<CompletionRecord>,
}

impl HostSim {
    /// Build a simulator from a validated configuration.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        if config.print_config {
            info!("configuration:\n{config}");
        }
        let mut pool = RequestPool::new();
        let mut events = EventQueue::new();
        let controller = MemoryController::new(config.clone(), &mut pool, &mut events);
        let device = TimingDevice::new(&config);
        Ok(Self {
            config,
            pool,
            events,
            controller,
            device,
            stats: SimStats::default(),
            fifo: Deque::new(),
            outstanding: 0,
            compute: ComputeSettings::new(),
            completions: Vec::new(),
        })
    }

    /// Load the configuration file and build a simulator.
    pub fn from_path(path: &Path) -> Result<Self, SimError> {
        Self::new(SimConfig::load(path)?)
    }

    // ─── Introspection ──────────────────────────────────────────────

    /// Current virtual cycle.
    pub fn get_cycle(&self) -> u64 {
        self.events.current_cycle()
    }

    /// Host requests admitted but not yet completed.
    pub fn outstanding(&self) -> u64 {
        self.outstanding
    }

    /// Simulation counters.
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// The controller, for diagnostics.
    pub fn controller(&self) -> &MemoryController {
        &self.controller
    }

    /// The device, for diagnostics.
    pub fn device(&self) -> &TimingDevice {
        &self.device
    }

    /// Mutable device access (issue-trace recording).
    pub fn device_mut(&mut self) -> &mut TimingDevice {
        &mut self.device
    }

    /// The request arena, for diagnostics.
    pub fn pool(&self) -> &RequestPool {
        &self.pool
    }

    /// Take every completion reported since the last call.
    pub fn drain_completions(&mut self) -> Vec<CompletionRecord> {
        std::mem::take(&mut self.completions)
    }

    // ─── Admission probes ───────────────────────────────────────────

    /// The internal command FIFO has room for another request.
    pub fn is_issuable(&self) -> bool {
        self.fifo.len() < self.config.host_queue_size.min(HOST_QUEUE_CAP)
    }

    /// Would a plain request with this op letter be accepted downstream?
    pub fn is_issuable_op(&self, op: char, _addr: u64, _data: u64, _thread_id: u64) -> bool {
        if OpType::from_char(op).is_none() {
            warn!(%op, "unknown operation");
            return false;
        }
        self.controller.is_issuable()
    }

    /// Would a compute with this slide letter be accepted downstream?
    pub fn is_issuable_compute(
        &self,
        input_addr: u64,
        _output_addr: u64,
        op: char,
        data: u64,
        slide: char,
    ) -> bool {
        if OpType::from_char(op) != Some(OpType::Compute) {
            warn!(%op, "compute probe with a non-compute operation");
            return false;
        }
        if Slide::from_char(slide).is_none() {
            warn!(%slide, "unknown slide mode");
            return false;
        }
        self.is_issuable_op(op, input_addr, data, 0)
    }

    // ─── Command submission ─────────────────────────────────────────

    /// Submit a READ/WRITE/LOAD_WEIGHT (or COMPUTE/TRANSFER with their
    /// defaults) by op letter. Returns false and logs on bad input or a
    /// full FIFO.
    pub fn issue_command(&mut self, addr: u64, op: char, data: u64, thread_id: u64) -> bool {
        let Some(op) = OpType::from_char(op) else {
            warn!(%op, "unknown operation");
            return false;
        };
        match op {
            OpType::Compute => self.issue_compute(addr, addr, data, 'X'),
            OpType::Transfer => self.issue_transfer(addr, data, thread_id, 'I', LINE_BYTES * 8),
            _ => self.push_fifo(Request::host(op, addr, data, thread_id)),
        }
    }

    /// Submit a COMPUTE pass over the input base, writing to the output
    /// base, sliding along `slide`.
    pub fn issue_compute(&mut self, input_addr: u64, output_addr: u64, data: u64, slide: char) -> bool {
        let Some(slide) = Slide::from_char(slide) else {
            warn!("unknown slide mode");
            return false;
        };
        let p = *self.compute.params();
        if p.k_col > p.input_col || p.k_row > p.input_row {
            warn!(
                kernel = ?(p.k_row, p.k_col),
                input = ?(p.input_row, p.input_col),
                "kernel exceeds input geometry"
            );
            return false;
        }
        if p.buffer_n < 2 || p.buffer_n % 2 != 0 {
            warn!(buffer_n = p.buffer_n, "buffer depth must be an even count of slots");
            return false;
        }
        if !self.is_issuable() {
            warn!("command queue full");
            return false;
        }

        let params = self.compute.acquire();
        let mut request = Request::host(OpType::Compute, input_addr, data, 0);
        request.payload = Payload::Compute(ComputeFields::new(
            input_addr,
            DecodedAddress::default(),
            output_addr,
            DecodedAddress::default(),
            slide,
            params,
        ));
        if !self.push_fifo(request) {
            self.compute.release();
            return false;
        }
        true
    }

    /// Submit a TRANSFER of `transfer_size` bits.
    pub fn issue_transfer(
        &mut self,
        addr: u64,
        data: u64,
        thread_id: u64,
        transfer_mode: char,
        transfer_size: u64,
    ) -> bool {
        let Some(mode) = TransferMode::from_char(transfer_mode) else {
            warn!(%transfer_mode, "unknown transfer mode");
            return false;
        };
        let mut request = Request::host(OpType::Transfer, addr, data, thread_id);
        request.payload = Payload::Transfer(TransferFields {
            mode,
            size: transfer_size,
        });
        self.push_fifo(request)
    }

    fn push_fifo(&mut self, request: Request) -> bool {
        if !self.is_issuable() {
            warn!("command queue full");
            return false;
        }
        let id = self.pool.alloc(request);
        self.fifo
            .push_back(id)
            .expect("capacity checked by is_issuable");
        self.outstanding += 1;
        true
    }

    // ─── Compute parameter block ────────────────────────────────────

    /// Reset the compute parameters to their defaults.
    pub fn set_parameters(&mut self) -> bool {
        self.compute.set_parameters()
    }

    /// Program the input geometry.
    pub fn set_input(&mut self, col: u64, row: u64, channels: u64, bitwidth: u64) -> bool {
        self.compute.set_input(col, row, channels, bitwidth)
    }

    /// Program the kernel geometry.
    pub fn set_weight(&mut self, col: u64, row: u64, nums: u64, bitwidth: u64) -> bool {
        self.compute.set_weight(col, row, nums, bitwidth)
    }

    /// Select the function slot.
    pub fn set_func(&mut self, n: u64) -> bool {
        self.compute.set_func(n)
    }

    /// Select the activation function.
    pub fn set_act(&mut self, n: u64) -> bool {
        self.compute.set_act(n)
    }

    /// Select the pooling mode.
    pub fn set_pool(&mut self, n: u64) -> bool {
        self.compute.set_pool(n)
    }

    // ─── Stepping ───────────────────────────────────────────────────

    /// Advance up to `steps` cycles, stopping early once no work remains
    /// outstanding. Each advanced cycle drains at most one FIFO command
    /// into the controller.
    pub fn cycle(&mut self, steps: u64) -> Result<(), SimError> {
        for _ in 0..steps {
            if self.outstanding == 0 {
                break;
            }
            if let Some(&front) = self.fifo.front() {
                if self.controller.is_issuable() {
                    self.fifo.pop_front();
                    let mut ctx = SimCtx {
                        pool: &mut self.pool,
                        events: &mut self.events,
                        device: &mut self.device,
                        stats: &mut self.stats,
                    };
                    self.controller.enqueue(0, front, &mut ctx);
                }
            }
            self.step()?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), SimError> {
        self.events.advance();
        self.stats.simulation_cycles = self.events.current_cycle();

        while let Some(event) = self.events.pop_due() {
            self.dispatch(event)?;
        }

        let mut ctx = SimCtx {
            pool: &mut self.pool,
            events: &mut self.events,
            device: &mut self.device,
            stats: &mut self.stats,
        };
        self.controller.cycle_tick(&mut ctx);
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<(), SimError> {
        match event {
            Event::Cleanup => {
                self.controller.cleanup(&self.pool);
                Ok(())
            }
            Event::Complete(id) => {
                self.complete(id);
                Ok(())
            }
            Event::RefreshPulse(id) => {
                let mut ctx = SimCtx {
                    pool: &mut self.pool,
                    events: &mut self.events,
                    device: &mut self.device,
                    stats: &mut self.stats,
                };
                self.controller.refresh_callback(id, &mut ctx);
                Ok(())
            }
            Event::TransactionWake => {
                let mut ctx = SimCtx {
                    pool: &mut self.pool,
                    events: &mut self.events,
                    device: &mut self.device,
                    stats: &mut self.stats,
                };
                self.controller.transaction_wake(&mut ctx);
                Ok(())
            }
            Event::CommandWake => {
                let mut ctx = SimCtx {
                    pool: &mut self.pool,
                    events: &mut self.events,
                    device: &mut self.device,
                    stats: &mut self.stats,
                };
                self.controller.command_queue_callback(&mut ctx)
            }
        }
    }

    fn complete(&mut self, id: RequestId) {
        let now = self.events.current_cycle();
        {
            let request = self.pool.get_mut(id);
            request.status = RequestStatus::Complete;
            request.completion_cycle = now;
        }

        let route = {
            let mut ctx = SimCtx {
                pool: &mut self.pool,
                events: &mut self.events,
                device: &mut self.device,
                stats: &mut self.stats,
            };
            self.controller.request_complete(id, &mut ctx)
        };

        if let CompletionRoute::Upstream(id) = route {
            let request = self.pool.free(id);
            self.outstanding -= 1;
            if request.op == OpType::Compute {
                self.compute.release();
            }
            info!(
                op = ?request.op,
                from = request.arrival_cycle,
                to = request.completion_cycle,
                "request complete"
            );
            self.completions.push(CompletionRecord {
                op: request.op,
                phys_addr: request.phys_addr,
                arrival_cycle: request.arrival_cycle,
                completion_cycle: request.completion_cycle,
            });
        }
    }

    // ─── Shutdown ───────────────────────────────────────────────────

    /// Sync the device to the controller clock and dump statistics to the
    /// configured stats file, if any.
    pub fn finalize_stats(&mut self) -> std::io::Result<()> {
        let mut ctx = SimCtx {
            pool: &mut self.pool,
            events: &mut self.events,
            device: &mut self.device,
            stats: &mut self.stats,
        };
        self.controller.calculate_stats(&mut ctx);
        if let Some(path) = self.config.stats_file.clone() {
            self.stats.dump_to(&path)?;
        }
        info!(stats = %self.stats.to_json(), "simulation statistics");
        Ok(())
    }
}
