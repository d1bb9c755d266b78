use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cctestbed::analyze::analyze_with_window;
use cctestbed::flow::Transport;
use cctestbed::monitor::MonitorMode;
use cctestbed::run::{CancelToken, RunConfig, execute};
use cctestbed::sweep::{SweepAxis, run_sweep};
use cctestbed::topo::parse_delay;

// Use mimalloc as the global allocator for the binary (non-Windows only)
#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "cctestbed",
    version,
    about = "Congestion-control experiments over emulated networks"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one experiment with a single transport on every pair
    Run(RunArgs),
    /// Run two transports head to head on one topology
    Duel(DuelArgs),
    /// Run a canned parameter sweep (cubic/bbr/copa trio per step)
    Sweep(SweepArgs),
    /// Parse run logs into the CSV datasets
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Transport used by every sender/receiver pair
    #[arg(long, value_enum, default_value_t = Transport::Cubic)]
    cc: Transport,

    /// Number of sender/receiver pairs
    #[arg(short = 'n', long, default_value_t = 2)]
    pairs: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct DuelArgs {
    /// First transport
    #[arg(long, value_enum)]
    cc1: Transport,

    /// Pairs using the first transport
    #[arg(long, default_value_t = 1)]
    n1: usize,

    /// Second transport
    #[arg(long, value_enum)]
    cc2: Transport,

    /// Pairs using the second transport
    #[arg(long, default_value_t = 1)]
    n2: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// Axis to sweep; the other parameters stay fixed
    #[arg(long, value_enum)]
    axis: SweepAxis,

    /// Pairs per run (ignored by the pairs axis)
    #[arg(short = 'n', long, default_value_t = 2)]
    pairs: usize,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Root holding the per-run log directories
    #[arg(long, default_value = "./logs")]
    logs_root: PathBuf,

    /// Where the CSV datasets are written
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Fold every N consecutive counter records per host into their mean
    #[arg(long, default_value_t = 1)]
    window: usize,
}

/// Parameters shared by every experiment-driving subcommand.
#[derive(Args, Debug)]
struct CommonArgs {
    /// One-way access link delay (e.g. 10ms)
    #[arg(long, value_parser = parse_delay, default_value = "10ms")]
    delay: Duration,

    /// Delay jitter (e.g. 1ms)
    #[arg(long, value_parser = parse_delay)]
    jitter: Option<Duration>,

    /// Random loss probability in percent
    #[arg(long, default_value_t = 0.0)]
    loss: f32,

    /// Access link bandwidth in Mbit/s
    #[arg(long, default_value_t = 10)]
    bw: u64,

    /// Per-flow traffic duration in seconds
    #[arg(long, default_value_t = 60)]
    duration: u64,

    /// Gap between successive flow starts (e.g. 2s)
    #[arg(long, value_parser = parse_delay, default_value = "0s")]
    stagger: Duration,

    /// Counter collectors to run on the observation point
    #[arg(long, value_enum, default_value_t = MonitorMode::PerSecond)]
    monitor: MonitorMode,

    /// Split-path topology: two aggregation points, loss on the trunk
    #[arg(long)]
    split: bool,

    /// Remove the run directory after the run (debug runs)
    #[arg(long)]
    discard: bool,

    /// Root for per-run log directories
    #[arg(long, default_value = "./logs")]
    logs_root: PathBuf,

    /// Directory with genericCC's sender/receiver binaries
    #[arg(long, default_value = "/opt/genericCC")]
    generic_cc_dir: PathBuf,

    /// Copa delta tuning parameter
    #[arg(long, default_value_t = 0.5)]
    copa_delta: f64,
}

impl CommonArgs {
    fn into_config(self, transports: Vec<Transport>) -> RunConfig {
        RunConfig {
            transports,
            bw_mbit: self.bw,
            delay: self.delay,
            jitter: self.jitter,
            loss_percent: self.loss,
            split: self.split,
            duration: Duration::from_secs(self.duration),
            stagger: self.stagger,
            monitor: self.monitor,
            discard: self.discard,
            logs_root: self.logs_root,
            generic_cc_dir: self.generic_cc_dir,
            copa_delta: self.copa_delta,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cancel = CancelToken::new();

    match cli.command {
        Command::Run(args) => {
            let config = args.common.into_config(vec![args.cc; args.pairs]);
            let dir = execute(&config, &cancel)?;
            println!("run directory: {}", dir.display());
        }
        Command::Duel(args) => {
            let mut transports = vec![args.cc1; args.n1];
            transports.extend(std::iter::repeat_n(args.cc2, args.n2));
            let config = args.common.into_config(transports);
            let dir = execute(&config, &cancel)?;
            println!("run directory: {}", dir.display());
        }
        Command::Sweep(args) => {
            let base = args.common.into_config(vec![Transport::Cubic; args.pairs]);
            let dirs = run_sweep(&base, args.axis, &cancel)?;
            println!("{} runs completed:", dirs.len());
            for dir in dirs {
                println!("  {}", dir.display());
            }
        }
        Command::Analyze(args) => {
            let report = analyze_with_window(&args.logs_root, &args.out_dir, args.window)?;
            println!(
                "{} experiments: {} counter records, {} send rows, {} rec rows",
                report.experiments, report.counter_records, report.send_rows, report.rec_rows
            );
        }
    }

    Ok(())
}
