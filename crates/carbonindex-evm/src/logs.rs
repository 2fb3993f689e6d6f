//! `eth_getLogs` wire types and range chunking.

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Block number, or 0 for a pending log.
    pub fn block_number_u64(&self) -> u64 {
        self.block_number.as_deref().and_then(hex_u64).unwrap_or(0)
    }

    pub fn log_index_u64(&self) -> u64 {
        self.log_index.as_deref().and_then(hex_u64).unwrap_or(0)
    }

    /// Returns `true` if this log was dropped by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

fn hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x").unwrap_or(s), 16).ok()
}

/// Address + first-topic filter over an inclusive block range.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub addresses: Vec<Address>,
    /// Matches if `topics[0]` is any of these.
    pub event_selectors: Vec<B256>,
}

impl LogFilter {
    pub fn to_json(&self) -> Value {
        json!({
            "fromBlock": format!("{:#x}", self.from_block),
            "toBlock": format!("{:#x}", self.to_block),
            "address": self.addresses,
            "topics": [self.event_selectors],
        })
    }
}

/// Split `[from, to]` into inclusive ranges of at most `max_range` blocks.
pub fn chunk_range(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    let max_range = max_range.max(1);
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(max_range - 1).min(to);
        chunks.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_log_fields() {
        let log: RawLog = serde_json::from_value(json!({
            "address": "0x0000000000000000000000000000000000000001",
            "topics": [],
            "data": "0x",
            "blockNumber": "0x12a05f200",
            "transactionHash": "0xabc",
            "logIndex": "0x5",
            "removed": false
        }))
        .unwrap();
        assert_eq!(log.block_number_u64(), 5_000_000_000);
        assert_eq!(log.log_index_u64(), 5);
        assert!(!log.is_removed());
    }

    #[test]
    fn chunking() {
        assert_eq!(chunk_range(1, 10, 4), vec![(1, 4), (5, 8), (9, 10)]);
        assert_eq!(chunk_range(7, 7, 2000), vec![(7, 7)]);
        assert!(chunk_range(8, 7, 10).is_empty());
    }

    #[test]
    fn filter_json_uses_hex_blocks() {
        let filter = LogFilter {
            from_block: 16,
            to_block: 255,
            addresses: vec![Address::ZERO],
            event_selectors: vec![B256::ZERO],
        };
        let v = filter.to_json();
        assert_eq!(v["fromBlock"], "0x10");
        assert_eq!(v["toBlock"], "0xff");
        assert_eq!(v["topics"][0].as_array().unwrap().len(), 1);
    }
}
