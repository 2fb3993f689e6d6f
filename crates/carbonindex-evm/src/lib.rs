//! carbonindex-evm: JSON-RPC access to the CarbonSeal registry, credit token
//! and oracle contracts.
//!
//! [`EvmChainReader`] implements [`carbonindex_core::ChainReader`]: typed view
//! getters over `eth_call` and an event stream fed by a polling
//! `eth_getLogs` watcher.

pub mod abi;
pub mod builder;
pub mod decode;
pub mod logs;
pub mod reader;
pub mod rpc;
pub mod watcher;

pub use abi::ContractAbi;
pub use builder::{EvmReaderBuilder, EvmReaderConfig};
pub use decode::LogDecoder;
pub use logs::{LogFilter, RawLog};
pub use reader::{ContractAddresses, EvmChainReader};
pub use rpc::{HttpTransport, RetryConfig, RpcClient, RpcTransport, TransportError};
pub use watcher::{LogWatcher, WatcherConfig};
