//! Lockstep contention simulator
//!
//! Spawns one worker thread per transaction and lets them contend for a
//! small set of exclusively-lockable resources under wait-die, printing a
//! summary of grants, deaths, and deadlock victims.
//!
//! # Usage
//!
//! ```bash
//! # Two resources, five transactions, default delays
//! lockstep-sim
//!
//! # More contention, reproducible run
//! lockstep-sim -r 3 -t 8 --alternate-order --seed 42
//!
//! # Verbose per-event logging
//! lockstep-sim -v
//! ```

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod driver;

use driver::{run, SimConfig};

/// Lock contention simulator for the lockstep lock manager
#[derive(Parser, Debug)]
#[command(
    name = "lockstep-sim",
    version,
    about = "Simulates transactions contending for exclusive locks",
    long_about = "Spawns one worker thread per transaction. Workers acquire every \
                  resource with randomized think time, then release and commit. \
                  Conflicts are resolved by wait-die; a wait-for-graph detector \
                  aborts the oldest member of any cycle that slips through."
)]
struct Args {
    /// Number of lockable resources
    #[arg(short = 'r', long, default_value_t = 2)]
    resources: u32,

    /// Number of concurrent transactions
    #[arg(short = 't', long, default_value_t = 5)]
    transactions: u64,

    /// Minimum simulated think time between requests, in milliseconds
    #[arg(long, default_value_t = 100, value_name = "MS")]
    min_delay: u64,

    /// Maximum simulated think time between requests, in milliseconds
    #[arg(long, default_value_t = 500, value_name = "MS")]
    max_delay: u64,

    /// Back-off after a wait-die death, in milliseconds
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    retry_delay: u64,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Make odd-numbered workers acquire resources in descending order,
    /// which is what makes real deadlocks possible
    #[arg(long)]
    alternate_order: bool,

    /// Enable verbose per-event output
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run_sim() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_sim() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    ensure!(args.resources > 0, "need at least one resource");
    ensure!(args.transactions > 0, "need at least one transaction");
    ensure!(
        args.min_delay <= args.max_delay,
        "--min-delay must not exceed --max-delay"
    );

    let config = SimConfig {
        resources: args.resources,
        transactions: args.transactions,
        min_delay: Duration::from_millis(args.min_delay),
        max_delay: Duration::from_millis(args.max_delay),
        retry_delay: Duration::from_millis(args.retry_delay),
        seed: args.seed,
        alternate_order: args.alternate_order,
    };

    let report = run(&config)?;

    println!("simulation complete");
    println!("  committed:   {}", report.committed);
    println!("  victimized:  {}", report.victimized);
    println!("  wait-die deaths (retried): {}", report.deaths);
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("lockstep_sim=debug,lockstep_txn=debug")
    } else {
        EnvFilter::new("lockstep_sim=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
