//! Sync engine configuration.
//!
//! Provides [`SyncConfig`] with defaults for the RPC endpoint, data
//! directory, confirmation depth, and cache/batch sizing. Values can be
//! taken from the environment and overridden by CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use carver_core::constants::{
    DEFAULT_ADDRESS_CACHE_LIMIT, DEFAULT_BLOCK_CONFIRMATIONS, DEFAULT_RPC_TIMEOUT_SECS,
    DEFAULT_UNWIND_BATCH_SIZE,
};
use carver_core::error::CarverError;

/// Configuration for one sync engine instance (one per chain).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Full-node JSON-RPC endpoint.
    pub rpc_endpoint: String,
    /// RPC basic-auth user, if the node requires credentials.
    pub rpc_user: Option<String>,
    /// RPC basic-auth password.
    pub rpc_password: Option<String>,
    /// Per-request RPC timeout in seconds.
    pub rpc_timeout_secs: u64,
    /// Root directory for the ledger store and lockfiles.
    pub data_dir: PathBuf,
    /// Confirmations required before a block is final.
    pub block_confirmations: u64,
    /// Normal-tier address cache capacity.
    pub address_cache_limit: usize,
    /// Movements reversed per unwind pass.
    pub unwind_batch_size: usize,
    /// Log each synced block at info level.
    pub verbose_cron: bool,
    /// Log each processed transaction at info level.
    pub verbose_cron_tx: bool,
    /// Debug self-test: randomly unwind a just-committed block (5% per
    /// block) to exercise the rollback path. Never enable in production.
    pub random_rollback_test: bool,
    /// Log level filter string (e.g. "info", "carver_engine=debug").
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "http://127.0.0.1:9679".to_string(),
            rpc_user: None,
            rpc_password: None,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            data_dir: PathBuf::from("./carver-data"),
            block_confirmations: DEFAULT_BLOCK_CONFIRMATIONS,
            address_cache_limit: DEFAULT_ADDRESS_CACHE_LIMIT,
            unwind_batch_size: DEFAULT_UNWIND_BATCH_SIZE,
            verbose_cron: false,
            verbose_cron_tx: false,
            random_rollback_test: false,
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Build a config from `CARVER_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, CarverError> {
        let defaults = Self::default();
        Ok(Self {
            rpc_endpoint: env_or("CARVER_RPC_ENDPOINT", defaults.rpc_endpoint),
            rpc_user: std::env::var("CARVER_RPC_USER").ok(),
            rpc_password: std::env::var("CARVER_RPC_PASSWORD").ok(),
            rpc_timeout_secs: env_parsed("CARVER_RPC_TIMEOUT_SECS", defaults.rpc_timeout_secs)?,
            data_dir: PathBuf::from(env_or(
                "CARVER_DATA_DIR",
                defaults.data_dir.display().to_string(),
            )),
            block_confirmations: env_parsed(
                "CARVER_BLOCK_CONFIRMATIONS",
                defaults.block_confirmations,
            )?,
            address_cache_limit: env_parsed(
                "CARVER_ADDRESS_CACHE_LIMIT",
                defaults.address_cache_limit,
            )?,
            unwind_batch_size: env_parsed("CARVER_UNWIND_BATCH_SIZE", defaults.unwind_batch_size)?,
            verbose_cron: env_flag("CARVER_VERBOSE_CRON"),
            verbose_cron_tx: env_flag("CARVER_VERBOSE_CRON_TX"),
            random_rollback_test: false,
            log_level: env_or("CARVER_LOG_LEVEL", defaults.log_level),
        })
    }

    /// Path to the RocksDB ledger directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    /// RPC timeout as a [`Duration`].
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, CarverError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| CarverError::Config(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
