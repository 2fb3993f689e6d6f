//! Command-line and environment configuration.

use std::time::Duration;

use alloy_primitives::Address;
use clap::Args;

use carbonindex_core::{GapPolicy, IndexerConfig};
use carbonindex_evm::{EvmReaderConfig, RetryConfig};

use crate::logging::LogConfig;

/// Logging flags, shared by every command.
#[derive(Debug, Clone, Args)]
pub struct LogArgs {
    /// Default log level (overridden by RUST_LOG)
    #[arg(long, env = "CARBONINDEX_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Emit JSON logs
    #[arg(long, env = "CARBONINDEX_LOG_JSON", global = true)]
    pub log_json: bool,

    /// Per-component overrides, e.g. `carbonindex_evm=debug`
    #[arg(
        long = "log-component",
        env = "CARBONINDEX_LOG_COMPONENTS",
        value_delimiter = ',',
        global = true
    )]
    pub log_components: Vec<String>,
}

impl LogArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig::new(&self.log_level, &self.log_components, self.log_json)
    }
}

/// Chain, contract and store settings for commands that touch both.
#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    /// JSON-RPC endpoint
    #[arg(long, env = "CARBONINDEX_RPC_URL", default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// Farm registry contract
    #[arg(long, env = "CARBONINDEX_REGISTRY_ADDRESS")]
    pub registry_address: Address,

    /// Carbon credit token contract
    #[arg(long, env = "CARBONINDEX_TOKEN_ADDRESS")]
    pub token_address: Address,

    /// Price/proof oracle contract
    #[arg(long, env = "CARBONINDEX_ORACLE_ADDRESS")]
    pub oracle_address: Address,

    /// `memory`, `sqlite:<path>` or `postgres://…`
    #[arg(long, env = "CARBONINDEX_DATABASE_URL", default_value = "sqlite:./carbonindex.db")]
    pub database_url: String,

    /// Seconds between backstop reconcile passes
    #[arg(long, env = "CARBONINDEX_SYNC_INTERVAL_SECS", default_value_t = 300)]
    pub sync_interval_secs: u64,

    /// Recent readings pulled per farm on a full pass
    #[arg(long, env = "CARBONINDEX_RECENT_READINGS", default_value_t = 50)]
    pub recent_readings: u32,

    /// `skip` or `abort` when an id cannot be read during a pass
    #[arg(long, env = "CARBONINDEX_GAP_POLICY", default_value = "skip")]
    pub gap_policy: GapPolicy,

    /// Live events the listener may hold queued or in flight
    #[arg(long, env = "CARBONINDEX_LISTENER_MAX_PENDING", default_value_t = 1_024)]
    pub listener_max_pending: usize,

    /// Seconds between log polls
    #[arg(long, env = "CARBONINDEX_POLL_INTERVAL_SECS", default_value_t = 4)]
    pub poll_interval_secs: u64,

    /// Largest block span per eth_getLogs call
    #[arg(long, env = "CARBONINDEX_MAX_BLOCK_RANGE", default_value_t = 2_000)]
    pub max_block_range: u64,

    /// Retries for failed HTTP requests
    #[arg(long, env = "CARBONINDEX_RPC_MAX_RETRIES", default_value_t = 3)]
    pub rpc_max_retries: u32,

    /// Per-request timeout in seconds (unbounded when unset)
    #[arg(long, env = "CARBONINDEX_RPC_TIMEOUT_SECS")]
    pub rpc_timeout_secs: Option<u64>,
}

impl NodeArgs {
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            reconcile_interval_secs: self.sync_interval_secs,
            recent_readings_depth: self.recent_readings,
            gap_policy: self.gap_policy,
            event_channel_capacity: self.listener_max_pending,
        }
    }

    pub fn reader_config(&self) -> EvmReaderConfig {
        let mut config = EvmReaderConfig::new(self.rpc_url.clone());
        config.registry_address = self.registry_address;
        config.token_address = self.token_address;
        config.oracle_address = self.oracle_address;
        config.poll_interval = Duration::from_secs(self.poll_interval_secs);
        config.max_block_range = self.max_block_range;
        config.retry = RetryConfig {
            max_retries: self.rpc_max_retries,
            ..RetryConfig::default()
        };
        config.request_timeout = self.rpc_timeout_secs.map(Duration::from_secs);
        config
    }

    /// Database URL with any password masked, for logs.
    pub fn database_label(&self) -> String {
        redact_url(&self.database_url)
    }
}

fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
