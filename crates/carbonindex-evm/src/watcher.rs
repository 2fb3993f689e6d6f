//! Polling log watcher: turns `eth_getLogs` over new blocks into a
//! [`ChainEventStream`].
//!
//! Each tick reads the head, fetches logs for `[next, head]` in chunks of at
//! most `max_block_range` blocks and forwards decoded events. A chunk that
//! fails to fetch is retried on the next tick; the watcher never skips blocks.
//! Dropping the returned stream stops the task.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use carbonindex_core::{ChainEvent, ChainEventStream, IndexerError};

use crate::decode::LogDecoder;
use crate::logs::{chunk_range, LogFilter};
use crate::rpc::RpcClient;

/// Polling parameters.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Largest block span per `eth_getLogs` request.
    pub max_block_range: u64,
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(4),
            max_block_range: 2_000,
            channel_capacity: 1_024,
        }
    }
}

pub struct LogWatcher {
    client: RpcClient,
    decoder: Arc<LogDecoder>,
    addresses: Vec<Address>,
    config: WatcherConfig,
}

impl LogWatcher {
    pub fn new(
        client: RpcClient,
        decoder: Arc<LogDecoder>,
        addresses: Vec<Address>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            client,
            decoder,
            addresses,
            config,
        }
    }

    /// Start watching from `from_block` (inclusive).
    pub fn spawn(self, from_block: u64) -> ChainEventStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        tokio::spawn(self.run(from_block, tx));
        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }

    async fn run(
        self,
        from_block: u64,
        tx: mpsc::Sender<Result<ChainEvent, IndexerError>>,
    ) {
        let mut next = from_block;
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(from_block, url = %self.client.url(), "log watcher started");

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }
            match self.poll(next, &tx).await {
                Ok(Some(advanced)) => next = advanced,
                Ok(None) => {}
                Err(Closed) => break,
            }
        }

        tracing::info!(next_block = next, "log watcher stopped");
    }

    /// One poll round. Returns the new `next` block if any chunk was consumed.
    async fn poll(
        &self,
        next: u64,
        tx: &mpsc::Sender<Result<ChainEvent, IndexerError>>,
    ) -> Result<Option<u64>, Closed> {
        let head = match self.client.block_number().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(error = %e, "head read failed; retrying next tick");
                return Ok(None);
            }
        };
        if head < next {
            return Ok(None);
        }

        let mut advanced = None;
        for (from, to) in chunk_range(next, head, self.config.max_block_range) {
            let filter = LogFilter {
                from_block: from,
                to_block: to,
                addresses: self.addresses.clone(),
                event_selectors: self.decoder.selectors(),
            };
            let logs = match self.client.get_logs(&filter).await {
                Ok(logs) => logs,
                Err(e) => {
                    tracing::warn!(from, to, error = %e, "eth_getLogs failed; retrying next tick");
                    break;
                }
            };

            tracing::debug!(from, to, logs = logs.len(), "fetched logs");
            for log in &logs {
                let item = match self.decoder.decode(log) {
                    Ok(Some(event)) => Ok(event),
                    Ok(None) => continue,
                    Err(e) => Err(e),
                };
                tx.send(item).await.map_err(|_| Closed)?;
            }
            advanced = Some(to + 1);
        }
        Ok(advanced)
    }
}

/// The subscriber dropped its stream.
struct Closed;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ContractAbi;
    use crate::rpc::mock::MockTransport;
    use alloy_dyn_abi::DynSolValue;
    use alloy_primitives::{B256, U256};
    use carbonindex_core::EventPayload;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    fn word(n: u64) -> String {
        format!("{:#x}", B256::from(U256::from(n)))
    }

    fn debt_log(block: u64, farm_id: u64, debt: u64) -> Value {
        let selector = ContractAbi::registry()
            .unwrap()
            .event("CarbonDebtUpdated")
            .unwrap()
            .selector();
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(debt), 256),
            DynSolValue::Uint(U256::ZERO, 256),
        ])
        .abi_encode_params();
        json!({
            "address": "0x0000000000000000000000000000000000000001",
            "topics": [format!("{selector:#x}"), word(farm_id)],
            "data": format!("0x{}", hex::encode(data)),
            "blockNumber": format!("{block:#x}"),
            "transactionHash": "0xabc",
            "logIndex": "0x0",
        })
    }

    fn watcher(mock: Arc<MockTransport>, max_block_range: u64) -> LogWatcher {
        let decoder =
            LogDecoder::new(&ContractAbi::registry().unwrap(), &ContractAbi::token().unwrap())
                .unwrap();
        LogWatcher::new(
            RpcClient::new(mock),
            Arc::new(decoder),
            vec![Address::ZERO],
            WatcherConfig {
                poll_interval: Duration::from_millis(10),
                max_block_range,
                channel_capacity: 16,
            },
        )
    }

    #[tokio::test]
    async fn forwards_decoded_events_in_block_order() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_blockNumber", |_| Ok(json!("0x14")));
        mock.on("eth_getLogs", |params| {
            let from = u64::from_str_radix(
                params[0]["fromBlock"].as_str().unwrap().trim_start_matches("0x"),
                16,
            )
            .unwrap();
            // one log per chunk, tagged with the chunk start
            Ok(json!([debt_log(from, 1, from)]))
        });

        let mut stream = watcher(mock.clone(), 5).spawn(11);
        let mut blocks = Vec::new();
        for _ in 0..2 {
            let event = stream.next().await.unwrap().unwrap();
            assert!(matches!(event.payload, EventPayload::CarbonDebtUpdated { farm_id: 1, .. }));
            blocks.push(event.block_number);
        }
        assert_eq!(blocks, vec![11, 16]);
    }

    #[tokio::test]
    async fn failed_chunk_is_retried_not_skipped() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_blockNumber", |_| Ok(json!("0x5")));
        let attempts = Arc::new(AtomicU64::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let attempts = attempts.clone();
            let seen = seen.clone();
            mock.on("eth_getLogs", move |params| {
                seen.lock().unwrap().push(params[0]["fromBlock"].as_str().unwrap().to_string());
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(crate::rpc::JsonRpcError {
                        code: -32005,
                        message: "limit exceeded".into(),
                        data: None,
                    });
                }
                Ok(json!([debt_log(5, 2, 9)]))
            });
        }

        let mut stream = watcher(mock, 2_000).spawn(5);
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.block_number, 5);
        let seen = seen.lock().unwrap().clone();
        assert_eq!(&seen[..2], &["0x5".to_string(), "0x5".to_string()]);
    }

    #[tokio::test]
    async fn undecodable_log_surfaces_as_error() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_blockNumber", |_| Ok(json!("0x1")));
        mock.on("eth_getLogs", |_| {
            let mut log = debt_log(1, 1, 1);
            log["data"] = json!("0x12");
            Ok(json!([log]))
        });

        let mut stream = watcher(mock, 2_000).spawn(1);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, IndexerError::Decode(_)));
    }

    #[tokio::test]
    async fn dropping_stream_stops_polling() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_blockNumber", |_| Ok(json!("0x0")));
        let stream = watcher(mock.clone(), 2_000).spawn(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(stream);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let polls = mock.count("eth_blockNumber");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(mock.count("eth_blockNumber"), polls);
    }
}
