//! # pimsim
//!
//! Cycle-accurate simulator of a non-volatile memory subsystem with
//! in-memory compute. Loads a configuration file, replays a trace (or a
//! built-in smoke workload) through the host shim, and dumps statistics.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pimsim_common::error::SimError;
use pimsim_host::trace::{TraceCommand, parse_line};
use pimsim_host::HostSim;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "pimsim", version, about = "NVM main-memory simulator with in-memory compute")]
struct Cli {
    /// Configuration file (TOML).
    config: PathBuf,

    /// Trace file replayed through the host FIFO; without one a small
    /// built-in compute workload runs.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Cycle budget for draining the workload.
    #[arg(long, default_value_t = 10_000_000)]
    cycles: u64,
}

fn apply(sim: &mut HostSim, command: TraceCommand) -> bool {
    match command {
        TraceCommand::Plain { op, addr, data } => sim.issue_command(addr, op, data, 0),
        TraceCommand::Compute {
            input,
            output,
            data,
            slide,
        } => sim.issue_compute(input, output, data, slide),
        TraceCommand::Transfer {
            addr,
            data,
            mode,
            size,
        } => sim.issue_transfer(addr, data, 0, mode, size),
    }
}

fn run(cli: &Cli) -> Result<(), SimError> {
    let mut sim = HostSim::from_path(&cli.config)?;

    let commands: Vec<TraceCommand> = match &cli.trace {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                SimError::Config(pimsim_common::config::ConfigError::Io(
                    path.clone(),
                    e.to_string(),
                ))
            })?;
            let mut commands = Vec::new();
            for (lineno, line) in text.lines().enumerate() {
                match parse_line(lineno + 1, line) {
                    Ok(Some(command)) => commands.push(command),
                    Ok(None) => {}
                    Err(e) => warn!(%e, "skipping trace line"),
                }
            }
            commands
        }
        None => {
            info!("no trace given, running the built-in compute smoke workload");
            vec![
                TraceCommand::Compute {
                    input: 0,
                    output: 0x60_0000,
                    data: 11,
                    slide: 'X',
                },
                TraceCommand::Compute {
                    input: 0,
                    output: 0x60_0000,
                    data: 11,
                    slide: 'Y',
                },
            ]
        }
    };

    for command in commands {
        // Pace submissions against the FIFO: make room before pushing.
        while !sim.is_issuable() {
            sim.cycle(1_000)?;
        }
        if !apply(&mut sim, command) {
            warn!(?command, "request rejected");
        }
    }

    sim.cycle(cli.cycles)?;

    for completion in sim.drain_completions() {
        info!(
            op = ?completion.op,
            addr = completion.phys_addr,
            from = completion.arrival_cycle,
            to = completion.completion_cycle,
            "completed"
        );
    }
    if sim.outstanding() > 0 {
        warn!(
            outstanding = sim.outstanding(),
            budget = cli.cycles,
            "cycle budget exhausted before the workload drained"
        );
    }

    if let Err(e) = sim.finalize_stats() {
        warn!(%e, "could not write the stats file");
    }
    info!(cycle = sim.get_cycle(), "simulation finished");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(SimError::Deadlock(info)) => {
            error!(%info, "deadlock timer expired, aborting");
            // Leave a debugger attachment point in debug builds.
            #[cfg(debug_assertions)]
            {
                let _ = nix::sys::signal::raise(nix::sys::signal::Signal::SIGSTOP);
            }
            ExitCode::from(1)
        }
        Err(e) => {
            error!(%e, "simulation failed");
            ExitCode::from(1)
        }
    }
}
