//! reclaimd: the reclaim daemon.
//!
//! Wires the state store, the cloud provider, the terminator and the
//! disruption orchestrator together. The in-memory provider and scheduler
//! are the only backends shipped.
//!
//! # Usage
//!
//! ```text
//! reclaimd run --config reclaim.toml --state reclaim.redb
//! reclaimd simulate --nodes 10 --replicas 1 --budget 2
//! reclaimd check-config reclaim.toml
//! ```

mod daemon;
mod simulate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use reclaim_cloud::fake::FakeCloudProvider;
use reclaim_core::{BudgetLimit, ReclaimConfig, format_duration};
use reclaim_disruption::SimulatedScheduler;

use crate::daemon::Daemon;
use crate::simulate::SimulateArgs;

const DEFAULT_LOG_FILTER: &str =
    "info,reclaimd=debug,reclaim_disruption=debug,reclaim_termination=debug";

#[derive(Parser)]
#[command(name = "reclaimd", about = "reclaim node consolidation daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator and orphan collector until interrupted.
    Run {
        /// Path to reclaim.toml.
        #[arg(long)]
        config: PathBuf,

        /// redb state file; created when missing.
        #[arg(long, default_value = "reclaim.redb")]
        state: PathBuf,
    },

    /// Consolidate a simulated fleet with an in-memory provider and scheduler.
    Simulate {
        /// Config file; a single-pool default is used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of nodes to launch, one web replica each.
        #[arg(long, default_value = "10")]
        nodes: usize,

        /// Web replicas kept after the scale-down.
        #[arg(long, default_value = "1")]
        replicas: usize,

        /// Maximum evaluation passes.
        #[arg(long, default_value = "50")]
        passes: usize,

        /// Override the first pool's budget (e.g. "2" or "20%").
        #[arg(long)]
        budget: Option<BudgetLimit>,

        /// `get` calls a deleted instance stays visible for.
        #[arg(long, default_value = "0")]
        shutdown_polls: u32,

        /// Unclaimed instances planted at the provider.
        #[arg(long, default_value = "0")]
        orphans: usize,

        /// Persist state to this redb file instead of memory.
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Validate a config file.
    CheckConfig {
        /// Path to reclaim.toml.
        path: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, state } => run(&config, &state).await,
        Command::Simulate {
            config,
            nodes,
            replicas,
            passes,
            budget,
            shutdown_polls,
            orphans,
            state,
        } => {
            let args = SimulateArgs {
                config,
                nodes,
                replicas,
                passes,
                budget,
                shutdown_polls,
                orphans,
                state,
            };
            let outcome = simulate::run_simulation(&args, |report| {
                if let Ok(line) = serde_json::to_string(report) {
                    println!("{line}");
                }
            })
            .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if outcome.stranded_pods > 0 {
                anyhow::bail!("{} pods lost their node", outcome.stranded_pods);
            }
            Ok(())
        }
        Command::CheckConfig { path } => check_config(&path),
    }
}

async fn run(config_path: &Path, state_path: &Path) -> anyhow::Result<()> {
    let config = ReclaimConfig::from_file(config_path)?;
    let store = daemon::open_store(state_path)?;
    let pools = daemon::sync_pools(&config, &store)?;

    let cloud = Arc::new(FakeCloudProvider::new());
    let instances = daemon::mirror_claims(&store, &cloud)?;
    let sim = Arc::new(SimulatedScheduler::new(store.clone()));
    info!(
        state = %state_path.display(),
        pools,
        instances,
        provider = "fake",
        "reclaimd starting"
    );

    let daemon = Daemon::new(&config, store, cloud, sim)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(daemon.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    handle.await??;
    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = ReclaimConfig::from_file(path)?;
    let timings = config.disruption.timings()?;
    info!(path = %path.display(), pools = config.node_pools.len(), "config is valid");

    println!("poll_interval   {}", format_duration(timings.poll_interval));
    println!("drain_timeout   {}", format_duration(timings.drain_timeout));
    println!("call_timeout    {}", format_duration(timings.call_timeout));
    println!("orphan_min_age  {}", format_duration(timings.orphan_min_age));
    for pool in &config.node_pools {
        println!(
            "pool {:<16} budget {:<6} consolidate_after {}",
            pool.name,
            pool.budget.to_string(),
            pool.consolidate_after
        );
    }
    Ok(())
}
