//! atlas-ipc-sim - host simulation of the Atlas7 IPC runtime
//!
//! Commands:
//! - `atlas-ipc-sim check <config>` - Validate a board configuration
//! - `atlas-ipc-sim run` - Kick virtqueues through a simulated co-processor
//! - `atlas-ipc-sim bridge` - Hammer the RTC I/O bridge from two processors

mod config;
mod link;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use atlas_hwspinlock::{HwSpinlockBank, SimulatedArbiter};
use atlas_iobrg::{BridgeError, IoBridge, SimulatedRtcDomain, TimeoutPolicy};
use atlas_ipc::sim::SimulatedLink;
use atlas_ipc::{EventDoorbell, FifoStats};
use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::config::BoardConfig;

#[derive(Parser)]
#[command(name = "atlas-ipc-sim")]
#[command(version)]
#[command(about = "Simulate the Atlas7 co-processor IPC runtime on the host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a board configuration file
    Check {
        /// TOML file with [rproc], [iobrg] and [secure_call] sections
        config: PathBuf,
    },

    /// Exchange virtqueue kicks with a simulated co-processor
    Run {
        /// Board configuration (defaults if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of kicks to send
        #[arg(short, long, default_value_t = 10_000)]
        kicks: u32,

        /// Virtqueues to spread kicks over
        #[arg(long, default_value_t = 4)]
        vqs: u32,
    },

    /// Read-modify-write the RTC domain from two processors
    Bridge {
        /// Board configuration (defaults if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Increments per processor
        #[arg(short, long, default_value_t = 1_000)]
        rounds: u32,

        /// Simulate a bridge transfer that never completes
        #[arg(long)]
        wedged: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            check_config(&config)?;
        }

        Commands::Run { config, kicks, vqs } => {
            run_link(config.as_deref(), kicks, vqs)?;
        }

        Commands::Bridge {
            config,
            rounds,
            wedged,
        } => {
            run_bridge(config.as_deref(), rounds, wedged)?;
        }
    }

    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = BoardConfig::load(path)?;
    log::info!("loaded {}", path.display());

    println!("{} {}", "✓".green(), path.display().to_string().bold());
    println!(
        "  rproc: tx {} B (lock {}), rx {} B (lock {}), {} kick retries",
        config.rproc.tx.capacity,
        config.rproc.tx_lock,
        config.rproc.rx.capacity,
        config.rproc.rx_lock,
        config.rproc.kick_retries
    );
    println!(
        "  iobrg: lock {}, timeout {:?}, on timeout {:?}",
        config.iobrg.lock,
        config.iobrg.lock_timeout(),
        config.iobrg.timeout_policy
    );
    println!(
        "  secure_call: cpu {}, queue {}, timeout {:?}",
        config.secure_call.cpu,
        config.secure_call.queue_depth,
        config.secure_call.call_timeout()
    );
    Ok(())
}

fn run_link(path: Option<&Path>, kicks: u32, vqs: u32) -> anyhow::Result<()> {
    let config = BoardConfig::load_or_default(path)?;

    let (to_peer, peer_bell) = EventDoorbell::pair();
    let (to_host, host_bell) = EventDoorbell::pair();
    let SimulatedLink {
        bank,
        mut host,
        peer,
        ..
    } = SimulatedLink::new(config.rproc, to_peer, to_host).context("setting up link")?;

    println!(
        "{} Sending {} kicks over {} virtqueues...",
        "▶".cyan(),
        kicks,
        vqs
    );
    let start = Instant::now();
    let outcome = link::exchange(&mut host, &host_bell, peer, peer_bell, kicks, vqs);
    let elapsed = start.elapsed();

    print_stats("tx", &host.tx_stats());
    print_stats("rx", &host.rx_stats());

    let echoed = match outcome {
        Ok(echoed) => echoed,
        Err(err) => {
            log::error!("link failed after {:?}: {:#}", elapsed, err);
            println!("{} {:#}", "✗".red(), err);
            return Err(err);
        }
    };
    host.teardown(&bank)?;
    log::info!("link torn down, locks returned");

    println!(
        "{} {} kicks echoed in {:?}",
        "✓".green(),
        echoed,
        elapsed
    );
    Ok(())
}

fn print_stats(label: &str, stats: &FifoStats) {
    println!(
        "  {}: {} writes / {} reads, {} B in / {} B out, {} busy, {} empty, {} lock timeouts",
        label.bold(),
        stats.writes,
        stats.reads,
        stats.bytes_written,
        stats.bytes_read,
        stats.busy,
        stats.empty,
        stats.lock_timeouts
    );
}

fn run_bridge(path: Option<&Path>, rounds: u32, wedged: bool) -> anyhow::Result<()> {
    const COUNTER: u32 = 0x0100;

    let mut config = BoardConfig::load_or_default(path)?.iobrg;
    if wedged {
        // Report the stuck transfer instead of halting the tool
        config.timeout_policy = TimeoutPolicy::Propagate;
        config.poll_limit = config.poll_limit.min(1_000);
        log::warn!("bridge wedged, giving up after {} polls", config.poll_limit);
    }

    let arbiter = Arc::new(SimulatedArbiter::new());
    let domain = Arc::new(SimulatedRtcDomain::new().checking_lock(Arc::clone(&arbiter), config.lock));
    domain.set_wedged(wedged);

    let arm_bank = HwSpinlockBank::new(Arc::clone(&arbiter));
    let mcu_bank = HwSpinlockBank::new(Arc::clone(&arbiter));
    let arm = IoBridge::with_bank(Arc::clone(&domain), &arm_bank, config.clone())?;
    let mcu = IoBridge::with_bank(Arc::clone(&domain), &mcu_bank, config)?;

    let outcome = crossbeam::scope(|s| {
        let workers: Vec<_> = [&arm, &mcu]
            .into_iter()
            .map(|bridge| {
                s.spawn(move |_| -> Result<(), BridgeError> {
                    for _ in 0..rounds {
                        bridge.transaction(|access| {
                            let count = access.read(COUNTER)?;
                            access.write(COUNTER, count + 1)
                        })?;
                    }
                    Ok(())
                })
            })
            .collect();

        workers
            .into_iter()
            .map(|worker| worker.join().unwrap_or(Err(BridgeError::Config("worker panicked".into()))))
            .collect::<Result<Vec<()>, BridgeError>>()
    })
    .map_err(|_| anyhow::anyhow!("bridge thread panicked"))?;

    match outcome {
        Ok(_) => {
            println!(
                "{} counter = {} after {} rounds per processor, {} unlocked accesses",
                "✓".green(),
                domain.peek(COUNTER),
                rounds,
                domain.unlocked_accesses()
            );
            Ok(())
        }
        Err(err) => {
            log::error!("bridge failed: {}", err);
            println!("{} {}", "✗".red(), err);
            Err(err.into())
        }
    }
}
