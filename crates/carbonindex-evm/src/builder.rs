//! Fluent builder for [`EvmChainReader`].
//!
//! # Example
//!
//! ```rust,no_run
//! use carbonindex_evm::EvmReaderBuilder;
//!
//! # fn main() -> Result<(), carbonindex_core::IndexerError> {
//! let reader = EvmReaderBuilder::new("https://rpc.example.org")
//!     .registry("0x5FbDB2315678afecb367f032d93F642f64180aa3".parse().unwrap())
//!     .token("0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512".parse().unwrap())
//!     .oracle("0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0".parse().unwrap())
//!     .max_block_range(1_000)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use carbonindex_core::IndexerError;

use crate::reader::{ContractAddresses, EvmChainReader};
use crate::rpc::{HttpTransport, RetryConfig, RpcClient, RpcTransport};
use crate::watcher::WatcherConfig;

/// Everything needed to reach the deployed contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmReaderConfig {
    pub rpc_url: String,
    pub registry_address: Address,
    pub token_address: Address,
    pub oracle_address: Address,
    /// Log watcher poll period.
    pub poll_interval: Duration,
    /// Largest block span per `eth_getLogs` request.
    pub max_block_range: u64,
    pub event_channel_capacity: usize,
    pub retry: RetryConfig,
    /// Per-request HTTP timeout. `None` leaves requests unbounded.
    pub request_timeout: Option<Duration>,
}

impl EvmReaderConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        let watcher = WatcherConfig::default();
        Self {
            rpc_url: rpc_url.into(),
            registry_address: Address::ZERO,
            token_address: Address::ZERO,
            oracle_address: Address::ZERO,
            poll_interval: watcher.poll_interval,
            max_block_range: watcher.max_block_range,
            event_channel_capacity: watcher.channel_capacity,
            retry: RetryConfig::default(),
            request_timeout: None,
        }
    }

    pub fn addresses(&self) -> ContractAddresses {
        ContractAddresses {
            registry: self.registry_address,
            token: self.token_address,
            oracle: self.oracle_address,
        }
    }

    pub fn watcher(&self) -> WatcherConfig {
        WatcherConfig {
            poll_interval: self.poll_interval,
            max_block_range: self.max_block_range,
            channel_capacity: self.event_channel_capacity,
        }
    }

    /// Reject zero addresses and degenerate polling parameters.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.rpc_url.trim().is_empty() {
            return Err(IndexerError::Config("rpc_url must not be empty".into()));
        }
        for (name, addr) in [
            ("registry", self.registry_address),
            ("token", self.token_address),
            ("oracle", self.oracle_address),
        ] {
            if addr.is_zero() {
                return Err(IndexerError::Config(format!("{name} address is not set")));
            }
        }
        if self.poll_interval.is_zero() {
            return Err(IndexerError::Config("poll_interval must be > 0".into()));
        }
        if self.max_block_range == 0 {
            return Err(IndexerError::Config("max_block_range must be > 0".into()));
        }
        Ok(())
    }
}

/// Fluent builder for [`EvmChainReader`].
pub struct EvmReaderBuilder {
    config: EvmReaderConfig,
    transport: Option<Arc<dyn RpcTransport>>,
}

impl EvmReaderBuilder {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self::from_config(EvmReaderConfig::new(rpc_url))
    }

    pub fn from_config(config: EvmReaderConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    pub fn registry(mut self, address: Address) -> Self {
        self.config.registry_address = address;
        self
    }

    pub fn token(mut self, address: Address) -> Self {
        self.config.token_address = address;
        self
    }

    pub fn oracle(mut self, address: Address) -> Self {
        self.config.oracle_address = address;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn max_block_range(mut self, blocks: u64) -> Self {
        self.config.max_block_range = blocks;
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Use a custom transport instead of HTTP. The URL is then informational.
    pub fn with_transport(mut self, transport: Arc<dyn RpcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(&self) -> &EvmReaderConfig {
        &self.config
    }

    pub fn build(self) -> Result<EvmChainReader, IndexerError> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(
                self.config.rpc_url.clone(),
                self.config.retry.clone(),
                self.config.request_timeout,
            )?),
        };
        EvmChainReader::new(
            RpcClient::new(transport),
            self.config.addresses(),
            self.config.watcher(),
        )
    }
}
