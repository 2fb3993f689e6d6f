//! carbonindex CLI: run and inspect the CarbonSeal registry mirror.
//!
//! Usage:
//! ```bash
//! carbonindex run    --registry-address 0x… --token-address 0x… --oracle-address 0x…
//! carbonindex sync   # one reconcile pass, then exit
//! carbonindex status --json
//! carbonindex info
//! ```
//! Every flag can also be set through its `CARBONINDEX_*` environment variable.

mod config;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};

use carbonindex_core::{
    ChainReader, HealthReport, IndexerConfig, LifecycleController, MirrorStore, ReconcileOutcome,
    Reconciler,
};
use carbonindex_evm::{EvmReaderBuilder, EvmReaderConfig};
use carbonindex_storage::{open_mirror, BackendKind};

use crate::config::{LogArgs, NodeArgs};

#[derive(Parser)]
#[command(name = "carbonindex")]
#[command(version, about = "Off-chain mirror of the CarbonSeal farm registry and credit token", long_about = None)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile, then follow live events until Ctrl-C / SIGTERM
    Run(RunArgs),

    /// Run one reconcile pass and print the report
    Sync(NodeArgs),

    /// Show cursor, chain head, lag and health
    Status(StatusArgs),

    /// Show built-in defaults
    Info,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    node: NodeArgs,

    /// Seconds to wait for a graceful stop before exiting with status 1
    #[arg(long, env = "CARBONINDEX_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    shutdown_timeout_secs: u64,
}

#[derive(Args)]
struct StatusArgs {
    #[command(flatten)]
    node: NodeArgs,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log.to_config());

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Sync(node) => sync(node).await,
        Command::Status(args) => status(args).await,
        Command::Info => {
            print_info();
            Ok(())
        }
    }
}

// ─── Bootstrap ───────────────────────────────────────────────────────────────

async fn open_store(node: &NodeArgs) -> Result<Arc<dyn MirrorStore>> {
    let backend = BackendKind::from_url(&node.database_url)?;
    let store = open_mirror(&node.database_url)
        .await
        .with_context(|| format!("failed to open {} store at {}", backend.as_str(), node.database_label()))?;
    info!(backend = backend.as_str(), url = %node.database_label(), "mirror store ready");
    Ok(store)
}

fn build_reader(node: &NodeArgs) -> Result<Arc<dyn ChainReader>> {
    let reader = EvmReaderBuilder::from_config(node.reader_config())
        .build()
        .context("invalid chain reader configuration")?;
    info!(
        rpc = %reader.rpc_url(),
        registry = %node.registry_address,
        token = %node.token_address,
        oracle = %node.oracle_address,
        "chain reader ready"
    );
    Ok(Arc::new(reader))
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn run(args: RunArgs) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "carbonindex starting");

    let store = open_store(&args.node).await?;
    let chain = build_reader(&args.node)?;
    if chain.is_connected().await {
        info!("chain reachable");
    } else {
        warn!(rpc = %args.node.rpc_url, "chain not reachable; check the RPC URL");
    }

    let controller = LifecycleController::new(chain, store, args.node.indexer_config())
        .context("invalid indexer configuration")?;
    controller
        .start()
        .await
        .context("initial reconciliation failed")?;
    info!(
        interval_secs = args.node.sync_interval_secs,
        "indexer running; press Ctrl-C to stop"
    );

    shutdown_signal().await;
    info!("shutting down gracefully");

    let deadline = Duration::from_secs(args.shutdown_timeout_secs);
    if tokio::time::timeout(deadline, controller.stop()).await.is_err() {
        error!(
            timeout_secs = args.shutdown_timeout_secs,
            "could not stop in time, forcing exit"
        );
        std::process::exit(1);
    }
    info!("stopped");
    Ok(())
}

async fn sync(node: NodeArgs) -> Result<()> {
    let store = open_store(&node).await?;
    let chain = build_reader(&node)?;
    let config = node.indexer_config();
    config.validate()?;

    let reconciler = Reconciler::new(chain, store, config);
    match reconciler.reconcile().await.context("reconcile pass failed")? {
        ReconcileOutcome::Skipped => println!("another pass is already running"),
        ReconcileOutcome::CaughtUp { cursor, head } => {
            println!("already caught up (cursor {cursor}, head {head})")
        }
        ReconcileOutcome::Synced(report) => {
            println!("synced blocks {} → {}", report.from_block, report.head);
            println!("  farms written:      {} ({} gaps)", report.farms_written, report.farm_gaps);
            println!(
                "  readings inserted:  {} ({} duplicates)",
                report.readings_inserted, report.duplicate_readings
            );
            println!("  credits written:    {} ({} gaps)", report.credits_written, report.credit_gaps);
            println!("  empty token URIs:   {}", report.uri_fallbacks);
            println!("  elapsed:            {:.2?}", report.elapsed);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    cursor: Option<u64>,
    head: Option<u64>,
    lag: Option<u64>,
    health: HealthReport,
}

async fn status(args: StatusArgs) -> Result<()> {
    let store = open_store(&args.node).await?;
    let chain = build_reader(&args.node)?;

    let head = match chain.get_block_number().await {
        Ok(head) => Some(head),
        Err(e) => {
            warn!(error = %e, "could not read chain head");
            None
        }
    };
    let controller = LifecycleController::new(chain, store, args.node.indexer_config())
        .context("invalid indexer configuration")?;
    let health = controller.health().await;
    let cursor = health.last_cursor;
    let report = StatusReport {
        cursor,
        head,
        lag: cursor.zip(head).map(|(c, h)| h.saturating_sub(c)),
        health,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let show = |v: Option<u64>| v.map_or_else(|| "unknown".to_string(), |n| n.to_string());
    println!("cursor:          {}", show(report.cursor));
    println!("chain head:      {}", show(report.head));
    println!("lag (blocks):    {}", show(report.lag));
    println!("chain connected: {}", report.health.chain_connected);
    println!("store reachable: {}", report.health.store_reachable);
    println!(
        "healthy:         {}",
        if report.health.is_healthy() { "yes" } else { "no" }
    );
    Ok(())
}

fn print_info() {
    let indexer = IndexerConfig::default();
    let reader = EvmReaderConfig::new("");
    println!("carbonindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Reconcile interval: {}s", indexer.reconcile_interval_secs);
    println!("  Recent readings per farm: {}", indexer.recent_readings_depth);
    println!("  Gap policy: skip (or abort)");
    println!("  Listener pending-event cap: {}", indexer.event_channel_capacity);
    println!("  Log poll interval: {}s", reader.poll_interval.as_secs());
    println!("  Max blocks per eth_getLogs: {}", reader.max_block_range);
    println!("  RPC retries: {}", reader.retry.max_retries);
    println!("  Storage backends: memory, sqlite:<path>, postgres://");
    println!("  Shutdown deadline: 10s");
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
