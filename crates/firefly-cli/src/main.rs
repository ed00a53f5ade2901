// ─────────────────────────────────────────────────────────────────────
// Firefly Sync — Command Line
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Firefly Sync CLI
//!
//! # Commands
//!
//! - `grid`: run an in-process torus of oscillators, one thread each, or
//!   step it in simulated time with `--dt`.
//! - `node`: run one oscillator as a network node talking to its
//!   neighbors over TCP.
//!
//! Logging goes to stderr; `RUST_LOG` overrides the level picked by `-v`.
//! A node stops on Ctrl+C or after `--seconds`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use firefly_core::{Clock, Grid, MonotonicClock, SystemClock};
use firefly_net::Node;
use firefly_types::{CouplingFamily, GridConfig, NodeConfig, OscillatorId, PeerHandle, SyncConfig};

#[derive(Parser)]
#[command(name = "firefly")]
#[command(version)]
#[command(about = "Decentralized firefly synchronization on a torus of Kuramoto oscillators")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-process torus grid
    Grid(GridArgs),
    /// Run one distributed oscillator node
    Node(NodeArgs),
}

/// Oscillator parameters shared by both commands.
#[derive(Args)]
struct SyncArgs {
    /// Natural frequency in Hz
    #[arg(long)]
    frequency: Option<f64>,
    /// Coupling strength K
    #[arg(long)]
    coupling: Option<f64>,
    /// Flash threshold in (-1, 1) (flash family)
    #[arg(long, conflicts_with = "sampled_hz")]
    threshold: Option<f64>,
    /// Use the sampled family, adjusting this many times per second
    #[arg(long)]
    sampled_hz: Option<f64>,
    /// Loop tick interval in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,
}

impl SyncArgs {
    fn apply(&self, sync: &mut SyncConfig) {
        if let Some(f) = self.frequency {
            sync.frequency_hz = f;
        }
        if let Some(k) = self.coupling {
            sync.coupling = k;
        }
        if let Some(hz) = self.sampled_hz {
            sync.family = CouplingFamily::Sampled { adjustment_hz: hz };
        } else if let Some(threshold) = self.threshold {
            sync.family = CouplingFamily::Flash { threshold };
        }
        if let Some(ms) = self.tick_ms {
            sync.tick_interval_ms = ms;
        }
    }
}

#[derive(Args)]
struct GridArgs {
    /// JSON grid config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    rows: Option<usize>,
    #[arg(long)]
    cols: Option<usize>,
    /// Seed for the initial phases
    #[arg(long)]
    seed: Option<u64>,
    #[command(flatten)]
    sync: SyncArgs,
    /// Run time in seconds (simulated seconds with --dt)
    #[arg(long, default_value_t = 30.0)]
    seconds: f64,
    /// Step deterministically in simulated time with this step (seconds)
    #[arg(long)]
    dt: Option<f64>,
    /// Interval between progress reports in milliseconds
    #[arg(long, default_value_t = 1000)]
    report_ms: u64,
}

#[derive(Args)]
struct NodeArgs {
    /// JSON node config; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    id: Option<u32>,
    /// Address to bind, e.g. 0.0.0.0:7000
    #[arg(long)]
    listen: Option<String>,
    /// Address announced to neighbors
    #[arg(long)]
    advertise: Option<String>,
    /// Neighbor as ID=HOST:PORT; repeat up to four times
    #[arg(long = "neighbor", value_parser = parse_peer)]
    neighbors: Vec<PeerHandle>,
    /// Start phase in radians (random when absent)
    #[arg(long)]
    phase: Option<f64>,
    /// Give up registration after this many milliseconds
    #[arg(long)]
    registration_timeout_ms: Option<u64>,
    #[command(flatten)]
    sync: SyncArgs,
    /// Stop after this many seconds (runs until killed when absent)
    #[arg(long)]
    seconds: Option<f64>,
}

fn parse_peer(s: &str) -> Result<PeerHandle, String> {
    let (id, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=HOST:PORT, got {s:?}"))?;
    let id: u32 = id
        .trim()
        .parse()
        .map_err(|e| format!("bad neighbor id {id:?}: {e}"))?;
    if addr.trim().is_empty() {
        return Err(format!("neighbor {id} has no address"));
    }
    Ok(PeerHandle::new(id, addr.trim()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Grid(args) => run_grid(args),
        Commands::Node(args) => {
            let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
            runtime.block_on(run_node(args))
        }
    }
}

fn read_config(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn grid_config(args: &GridArgs) -> Result<GridConfig> {
    let mut config = match &args.config {
        Some(path) => GridConfig::from_json(&read_config(path)?)?,
        None => GridConfig::default(),
    };
    if let Some(rows) = args.rows {
        config.rows = rows;
    }
    if let Some(cols) = args.cols {
        config.cols = cols;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    args.sync.apply(&mut config.sync);
    config.validate()?;
    Ok(config)
}

fn report(grid: &Grid, now: f64) {
    let mask = grid.flashing_mask(now);
    let lit = mask.iter().filter(|&&on| on).count();
    let order = format!("{:.4}", grid.order_parameter());
    let max_gap = format!("{:.4}", grid.max_neighbor_gap());
    let t = format!("{now:.2}");
    info!(%t, %order, %max_gap, lit, cells = mask.len(), "grid status");
}

fn run_grid(args: GridArgs) -> Result<()> {
    if !(args.seconds.is_finite() && args.seconds > 0.0) {
        bail!("--seconds must be positive, got {}", args.seconds);
    }
    let config = grid_config(&args)?;
    let mut grid = Grid::new(config)?;
    let torus = grid.torus();
    info!(rows = torus.rows(), cols = torus.cols(), "grid built");
    report(&grid, 0.0);

    match args.dt {
        Some(dt) => {
            if !(dt.is_finite() && dt > 0.0) {
                bail!("--dt must be positive, got {dt}");
            }
            let total_steps = (args.seconds / dt).ceil() as usize;
            let per_report = ((args.report_ms as f64 / 1000.0) / dt).ceil().max(1.0) as usize;
            let mut done = 0;
            while done < total_steps {
                let chunk = per_report.min(total_steps - done);
                let stats = grid.simulate(done as f64 * dt, dt, chunk)?;
                done += chunk;
                if stats.errors > 0 {
                    warn!(errors = stats.errors, "oscillator ticks failed");
                }
                report(&grid, done as f64 * dt);
            }
        }
        None => {
            let clock = Arc::new(MonotonicClock::new());
            grid.start(clock.clone())?;
            let started = Instant::now();
            let run_for = Duration::from_secs_f64(args.seconds);
            let every = Duration::from_millis(args.report_ms.max(1));
            while started.elapsed() < run_for {
                thread::sleep(every.min(run_for.saturating_sub(started.elapsed())));
                report(&grid, clock.now());
            }
            grid.stop();
        }
    }

    let order = format!("{:.4}", grid.order_parameter());
    let max_gap = format!("{:.4}", grid.max_neighbor_gap());
    info!(%order, %max_gap, "grid finished");
    Ok(())
}

fn node_config(args: &NodeArgs) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_json(&read_config(path)?)?,
        None => NodeConfig::default(),
    };
    if let Some(id) = args.id {
        config.id = OscillatorId(id);
    }
    if let Some(listen) = &args.listen {
        config.listen = listen.clone();
    }
    if args.advertise.is_some() {
        config.advertise = args.advertise.clone();
    }
    if !args.neighbors.is_empty() {
        config.neighbors = args.neighbors.clone();
    }
    if args.phase.is_some() {
        config.initial_phase = args.phase;
    }
    if args.registration_timeout_ms.is_some() {
        config.registration.timeout_ms = args.registration_timeout_ms;
    }
    args.sync.apply(&mut config.sync);
    config.validate()?;
    Ok(config)
}

async fn run_node(args: NodeArgs) -> Result<()> {
    let limit = match args.seconds {
        Some(seconds) if !(seconds.is_finite() && seconds > 0.0) => {
            bail!("--seconds must be positive, got {seconds}")
        }
        Some(seconds) => Some(Duration::from_secs_f64(seconds)),
        None => None,
    };
    let config = node_config(&args)?;
    let node = Arc::new(Node::bind(config).await.context("starting node")?);
    info!(
        id = %node.id(),
        addr = %node.local_addr(),
        advertised = %node.handle().addr,
        "node up"
    );

    let mut runner = {
        let node = node.clone();
        tokio::spawn(async move { node.run(Arc::new(SystemClock)).await })
    };
    let time_limit = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    let finished = tokio::select! {
        joined = &mut runner => Some(joined),
        () = time_limit => {
            info!("time limit reached");
            None
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, stopping node");
            None
        }
    };
    node.shutdown().await;
    let ticks = match finished {
        Some(joined) => joined,
        None => runner.await,
    }
    .context("node task")??;
    info!(id = %node.id(), ticks, phase = node.oscillator().phase(), "node stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peer() {
        assert_eq!(
            parse_peer("3=10.0.0.3:7000").unwrap(),
            PeerHandle::new(3, "10.0.0.3:7000")
        );
        assert!(parse_peer("10.0.0.3:7000").is_err());
        assert!(parse_peer("x=host:1").is_err());
        assert!(parse_peer("4=").is_err());
    }

    #[test]
    fn test_grid_flags_override_defaults() {
        let cli = Cli::parse_from([
            "firefly", "grid", "--rows", "4", "--cols", "5", "--sampled-hz", "20", "--seed", "9",
        ]);
        let Commands::Grid(args) = cli.command else {
            panic!("expected grid command");
        };
        let config = grid_config(&args).unwrap();
        assert_eq!((config.rows, config.cols, config.seed), (4, 5, Some(9)));
        assert_eq!(config.sync.family, CouplingFamily::Sampled { adjustment_hz: 20.0 });
    }

    #[test]
    fn test_node_flags() {
        let cli = Cli::parse_from([
            "firefly",
            "node",
            "--id",
            "2",
            "--listen",
            "127.0.0.1:7002",
            "--neighbor",
            "1=127.0.0.1:7001",
            "--neighbor",
            "3=127.0.0.1:7003",
            "--threshold",
            "0.95",
        ]);
        let Commands::Node(args) = cli.command else {
            panic!("expected node command");
        };
        let config = node_config(&args).unwrap();
        assert_eq!(config.id, OscillatorId(2));
        assert_eq!(config.neighbors.len(), 2);
        assert_eq!(config.sync.family, CouplingFamily::Flash { threshold: 0.95 });
    }

    #[test]
    fn test_node_rejects_sampled() {
        let cli = Cli::parse_from(["firefly", "node", "--sampled-hz", "5"]);
        let Commands::Node(args) = cli.command else {
            panic!("expected node command");
        };
        assert!(node_config(&args).is_err());
    }

    #[test]
    fn test_threshold_conflicts_with_sampled() {
        assert!(Cli::try_parse_from([
            "firefly", "grid", "--threshold", "0.9", "--sampled-hz", "5"
        ])
        .is_err());
    }
}
