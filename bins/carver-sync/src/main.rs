//! Carver block-synchronization job.
//!
//! Intended to run from cron or a supervisor: acquires the exclusive sync
//! lock, confirms and ingests blocks from the node, and exits. Exit code 0
//! on success, 1 on any error; an aborted run leaves the store in a state
//! the next run cleans up by itself.

use std::process;

use clap::Parser;
use tracing::{error, info};

use carver_core::constants::SYNC_LOCK_NAME;
use carver_engine::lock::NamedLock;
use carver_engine::{RpcClient, SyncConfig, SyncCoordinator};
use carver_store::RocksStore;

/// Carver explorer block synchronizer.
#[derive(Parser, Debug)]
#[command(
    name = "carver-sync",
    version,
    about = "Sync blocks and value movements from a full node into the Carver ledger"
)]
struct Args {
    /// Unwind the ledger to before this height, then exit.
    undo_height: Option<u64>,

    /// Override the node tip (sync no further than this height).
    force_rpc_height: Option<u64>,

    /// Node JSON-RPC endpoint.
    #[arg(long)]
    rpc_endpoint: Option<String>,

    /// Node RPC user.
    #[arg(long)]
    rpc_user: Option<String>,

    /// Node RPC password.
    #[arg(long)]
    rpc_password: Option<String>,

    /// Data directory for the ledger store and lockfiles.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Confirmations required before a block is final.
    #[arg(long)]
    block_confirmations: Option<u64>,

    /// Log every synced block at info level.
    #[arg(long)]
    verbose_cron: bool,

    /// Log every processed transaction at info level.
    #[arg(long)]
    verbose_cron_tx: bool,

    /// Debug self-test: randomly unwind just-committed blocks.
    #[arg(long)]
    random_rollback_test: bool,
}

impl Args {
    fn apply_to(self, config: &mut SyncConfig) -> (Option<u64>, Option<u64>) {
        if let Some(endpoint) = self.rpc_endpoint {
            config.rpc_endpoint = endpoint;
        }
        if self.rpc_user.is_some() {
            config.rpc_user = self.rpc_user;
        }
        if self.rpc_password.is_some() {
            config.rpc_password = self.rpc_password;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(depth) = self.block_confirmations {
            config.block_confirmations = depth;
        }
        config.verbose_cron |= self.verbose_cron;
        config.verbose_cron_tx |= self.verbose_cron_tx;
        config.random_rollback_test |= self.random_rollback_test;
        (self.undo_height, self.force_rpc_height)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            process::exit(1);
        }
    };
    let (undo_height, force_rpc_height) = args.apply_to(&mut config);

    init_logging(&config.log_level);

    if let Err(e) = run(config, undo_height, force_rpc_height).await {
        error!("sync failed: {e}");
        process::exit(1);
    }
}

async fn run(
    config: SyncConfig,
    undo_height: Option<u64>,
    force_rpc_height: Option<u64>,
) -> anyhow::Result<()> {
    // Exclusive per-chain lock; released on every exit path by the guard.
    let _lock = NamedLock::acquire(&config.data_dir, SYNC_LOCK_NAME)?;

    let store = RocksStore::open(config.db_path())?;
    let rpc = RpcClient::new(
        &config.rpc_endpoint,
        config.rpc_user.clone(),
        config.rpc_password.clone(),
        config.rpc_timeout(),
    )?;
    let mut coordinator = SyncCoordinator::new(store, rpc, config);

    // Admin mode: rollback and exit.
    if let Some(height) = undo_height {
        let summary = coordinator.unwind_to(height)?;
        info!(
            height,
            blocks = summary.blocks_removed,
            movements = summary.movements_removed,
            addresses = summary.addresses_removed,
            "manual unwind complete"
        );
        return Ok(());
    }

    let outcome = coordinator.run(force_rpc_height).await?;
    info!(
        synced_blocks = outcome.synced_blocks,
        node_tip = outcome.node_tip,
        "sync run finished"
    );
    Ok(())
}

/// Initialize tracing subscriber with the given log level.
fn init_logging(level_str: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_level(true))
        .init();
}
