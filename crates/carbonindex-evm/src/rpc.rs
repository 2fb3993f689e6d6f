//! JSON-RPC 2.0 wire types, the `RpcTransport` trait and the reqwest-backed
//! HTTP transport with exponential-backoff retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use carbonindex_core::IndexerError;

use crate::logs::{LogFilter, RawLog};

// ─── Wire types ───────────────────────────────────────────────────────────────

/// JSON-RPC request ID: string, number, or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
    Null,
}

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RpcId,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: RpcId::Number(id),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RpcId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ─── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can occur during an RPC transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, timeout, non-2xx).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Returns `true` if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }

    /// Returns `true` if this is a node-side error (not retryable).
    pub fn is_execution_error(&self) -> bool {
        matches!(self, Self::Rpc(_))
    }

    /// Returns `true` if the node reported that the contract call reverted.
    pub fn is_revert(&self) -> bool {
        match self {
            Self::Rpc(e) => e.code == 3 || e.message.to_ascii_lowercase().contains("revert"),
            _ => false,
        }
    }
}

impl From<TransportError> for IndexerError {
    fn from(e: TransportError) -> Self {
        IndexerError::Rpc(e.to_string())
    }
}

// ─── Retry policy ─────────────────────────────────────────────────────────────

/// Configuration for the retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Caps exponential growth.
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` once exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let base_ms = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }
}

// ─── Transport ────────────────────────────────────────────────────────────────

/// A JSON-RPC transport. Object-safe; stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// Endpoint identifier (URL or name).
    fn url(&self) -> &str;
}

/// HTTP JSON-RPC transport backed by `reqwest`.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    retry: RetryConfig,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(
        url: impl Into<String>,
        retry: RetryConfig,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            retry,
            timeout,
        })
    }

    async fn send_once(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self.http.post(&self.url).json(req).send().await.map_err(|e| {
            match (e.is_timeout(), self.timeout) {
                (true, Some(t)) => TransportError::Timeout {
                    ms: t.as_millis() as u64,
                },
                _ => TransportError::Http(e.to_string()),
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            method = %req.method,
                            error = %e,
                            "retrying request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, method = %req.method, error = %e, "max retries exceeded");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn url(&self) -> &str {
        &self.url
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// Typed Ethereum calls over any [`RpcTransport`].
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    /// Call a method and deserialize the result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self.transport.send(JsonRpcRequest::new(id, method, params)).await?;
        let result = resp.into_result().map_err(TransportError::Rpc)?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn block_number(&self) -> Result<u64, TransportError> {
        let hex: String = self.request("eth_blockNumber", vec![]).await?;
        parse_hex_u64(&hex)
    }

    /// `eth_call` against the latest block.
    pub async fn call(&self, to: Address, data: &[u8]) -> Result<Bytes, TransportError> {
        let params = vec![
            json!({ "to": to, "data": Bytes::copy_from_slice(data) }),
            json!("latest"),
        ];
        self.request("eth_call", params).await
    }

    pub async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, TransportError> {
        self.request("eth_getLogs", vec![filter.to_json()]).await
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, TransportError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| TransportError::Http(format!("invalid hex quantity '{s}': {e}")))
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted transport for unit tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&[Value]) -> Result<Value, JsonRpcError> + Send + Sync>;

    #[derive(Default)]
    pub(crate) struct MockTransport {
        handlers: Mutex<HashMap<String, Handler>>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub(crate) fn on(
            &self,
            method: &str,
            f: impl Fn(&[Value]) -> Result<Value, JsonRpcError> + Send + Sync + 'static,
        ) {
            self.handlers.lock().unwrap().insert(method.to_string(), Box::new(f));
        }

        pub(crate) fn count(&self, method: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
        }
    }

    pub(crate) fn revert() -> JsonRpcError {
        JsonRpcError {
            code: 3,
            message: "execution reverted".into(),
            data: None,
        }
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            self.calls.lock().unwrap().push(req.method.clone());
            let handlers = self.handlers.lock().unwrap();
            let Some(handler) = handlers.get(&req.method) else {
                return Err(TransportError::Http(format!("no handler for {}", req.method)));
            };
            let (result, error) = match handler(&req.params) {
                Ok(v) => (Some(v), None),
                Err(e) => (None, Some(e)),
            };
            Ok(JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: req.id,
                result,
                error,
            })
        }

        fn url(&self) -> &str {
            "mock://"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "eth_blockNumber", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_blockNumber\""));
    }

    #[test]
    fn revert_detection() {
        let err = TransportError::Rpc(revert());
        assert!(err.is_revert());
        assert!(err.is_execution_error());
        assert!(!err.is_retryable());

        let other = TransportError::Rpc(JsonRpcError {
            code: -32000,
            message: "header not found".into(),
            data: None,
        });
        assert!(!other.is_revert());
        assert!(TransportError::Http("connection reset".into()).is_retryable());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
        };
        assert_eq!(retry.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(retry.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(retry.next_delay(3), Some(Duration::from_millis(300)));
        assert_eq!(retry.next_delay(6), None);
        assert_eq!(RetryConfig::none().next_delay(1), None);
    }

    #[test]
    fn hex_quantities() {
        assert_eq!(parse_hex_u64("0x1b4").unwrap(), 436);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[tokio::test]
    async fn client_reads_block_number() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_blockNumber", |_| Ok(json!("0x10")));
        let client = RpcClient::new(mock.clone());

        assert_eq!(client.block_number().await.unwrap(), 16);
        assert_eq!(mock.count("eth_blockNumber"), 1);
    }

    #[tokio::test]
    async fn client_surfaces_node_errors() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_call", |_| Err(revert()));
        let client = RpcClient::new(mock);

        let err = client.call(Address::ZERO, &[0u8; 4]).await.unwrap_err();
        assert!(err.is_revert());
        let indexer: IndexerError = err.into();
        assert!(indexer.is_transient());
    }
}
