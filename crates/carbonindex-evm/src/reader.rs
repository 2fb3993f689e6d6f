//! `ChainReader` over JSON-RPC `eth_call` and `eth_getLogs`.

use std::sync::Arc;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use carbonindex_core::{
    CarbonCredit, CarbonReading, ChainEventStream, ChainReader, Farm, FarmStats, IndexerError,
};

use crate::abi::ContractAbi;
use crate::decode::{self, LogDecoder};
use crate::rpc::RpcClient;
use crate::watcher::{LogWatcher, WatcherConfig};

/// Deployed contract addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub registry: Address,
    pub token: Address,
    pub oracle: Address,
}

/// Reads the registry, token and oracle contracts.
///
/// A reverting view call is the contracts' "does not exist" answer for
/// farms, stats, credits and token owners and maps to `None`. Any other
/// failure surfaces as [`IndexerError::Rpc`].
pub struct EvmChainReader {
    client: RpcClient,
    addresses: ContractAddresses,
    registry: ContractAbi,
    token: ContractAbi,
    oracle: ContractAbi,
    decoder: Arc<LogDecoder>,
    watcher: WatcherConfig,
}

impl EvmChainReader {
    pub fn new(
        client: RpcClient,
        addresses: ContractAddresses,
        watcher: WatcherConfig,
    ) -> Result<Self, IndexerError> {
        let registry = ContractAbi::registry()?;
        let token = ContractAbi::token()?;
        let oracle = ContractAbi::oracle()?;
        let decoder = Arc::new(LogDecoder::new(&registry, &token)?);
        Ok(Self {
            client,
            addresses,
            registry,
            token,
            oracle,
            decoder,
            watcher,
        })
    }

    pub fn addresses(&self) -> ContractAddresses {
        self.addresses
    }

    pub fn rpc_url(&self) -> &str {
        self.client.url()
    }

    /// `eth_call` a view function. `Ok(None)` when the call reverts or the
    /// target returns no data.
    async fn call_view(
        &self,
        abi: &ContractAbi,
        to: Address,
        function: &str,
        args: Vec<DynSolValue>,
    ) -> Result<Option<Vec<DynSolValue>>, IndexerError> {
        let calldata = abi.encode_call(function, args)?;
        match self.client.call(to, &calldata).await {
            Ok(bytes) if bytes.is_empty() => {
                tracing::debug!(contract = abi.name(), function, "empty return data");
                Ok(None)
            }
            Ok(bytes) => abi.decode_output(function, &bytes).map(Some),
            Err(e) if e.is_revert() => {
                tracing::debug!(contract = abi.name(), function, error = %e, "call reverted");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`call_view`](Self::call_view) but a revert is an error.
    async fn call_required(
        &self,
        abi: &ContractAbi,
        to: Address,
        function: &str,
        args: Vec<DynSolValue>,
    ) -> Result<DynSolValue, IndexerError> {
        match self.call_view(abi, to, function, args).await? {
            Some(values) => decode::single(values),
            None => Err(IndexerError::Rpc(format!(
                "{}.{function} reverted or returned no data",
                abi.name()
            ))),
        }
    }

    async fn registry_call(
        &self,
        function: &str,
        args: Vec<DynSolValue>,
    ) -> Result<Option<Vec<DynSolValue>>, IndexerError> {
        self.call_view(&self.registry, self.addresses.registry, function, args).await
    }

    async fn token_call(
        &self,
        function: &str,
        args: Vec<DynSolValue>,
    ) -> Result<Option<Vec<DynSolValue>>, IndexerError> {
        self.call_view(&self.token, self.addresses.token, function, args).await
    }
}

fn uint(n: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(n), 256)
}

fn address_arg(address: &str) -> Result<DynSolValue, IndexerError> {
    address
        .trim()
        .parse::<Address>()
        .map(DynSolValue::Address)
        .map_err(|e| IndexerError::Decode(format!("invalid address '{address}': {e}")))
}

#[async_trait]
impl ChainReader for EvmChainReader {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        Ok(self.client.block_number().await?)
    }

    async fn get_total_farms(&self) -> Result<u64, IndexerError> {
        let value = self
            .call_required(&self.registry, self.addresses.registry, "farmCounter", vec![])
            .await?;
        decode::as_u64(&value)
    }

    async fn get_farm(&self, farm_id: u64) -> Result<Option<Farm>, IndexerError> {
        match self.registry_call("farms", vec![uint(farm_id)]).await? {
            Some(values) => decode::farm(&values),
            None => Ok(None),
        }
    }

    async fn get_farm_by_address(&self, owner: &str) -> Result<Option<Farm>, IndexerError> {
        let Some(values) = self.registry_call("getFarmByAddress", vec![address_arg(owner)?]).await?
        else {
            return Ok(None);
        };
        let tuple = decode::single(values)?;
        decode::farm(decode::as_list(&tuple)?)
    }

    async fn get_available_carbon(&self, farm_id: u64) -> Result<U256, IndexerError> {
        let value = self
            .call_required(
                &self.registry,
                self.addresses.registry,
                "getAvailableCarbon",
                vec![uint(farm_id)],
            )
            .await?;
        decode::as_u256(&value)
    }

    async fn get_farm_stats(&self, farm_id: u64) -> Result<Option<FarmStats>, IndexerError> {
        match self.registry_call("getFarmStats", vec![uint(farm_id)]).await? {
            Some(values) => decode::farm_stats(&values).map(Some),
            None => Ok(None),
        }
    }

    async fn get_recent_readings(
        &self,
        farm_id: u64,
        count: u32,
    ) -> Result<Vec<CarbonReading>, IndexerError> {
        let value = self
            .call_required(
                &self.registry,
                self.addresses.registry,
                "getRecentReadings",
                vec![uint(farm_id), uint(u64::from(count))],
            )
            .await?;
        decode::readings(&value)
    }

    async fn get_active_farmers(&self) -> Result<Vec<String>, IndexerError> {
        let value = self
            .call_required(&self.registry, self.addresses.registry, "getActiveFarmers", vec![])
            .await?;
        decode::address_list(&value)
    }

    async fn get_total_credits(&self) -> Result<u64, IndexerError> {
        match self.token_call("totalSupply", vec![]).await? {
            Some(values) => decode::as_u64(&decode::single(values)?),
            None => Ok(0),
        }
    }

    async fn get_credit_details(
        &self,
        token_id: u64,
    ) -> Result<Option<CarbonCredit>, IndexerError> {
        match self.token_call("getCreditDetails", vec![uint(token_id)]).await? {
            Some(values) => decode::credit(&decode::single(values)?),
            None => Ok(None),
        }
    }

    async fn get_farm_credits(&self, farm_id: u64) -> Result<Vec<u64>, IndexerError> {
        let value = self
            .call_required(&self.token, self.addresses.token, "getFarmCredits", vec![uint(farm_id)])
            .await?;
        decode::u64_list(&value)
    }

    async fn get_owner_credits(&self, owner: &str) -> Result<Vec<u64>, IndexerError> {
        let value = self
            .call_required(
                &self.token,
                self.addresses.token,
                "getOwnerCredits",
                vec![address_arg(owner)?],
            )
            .await?;
        decode::u64_list(&value)
    }

    async fn get_token_uri(&self, token_id: u64) -> Result<String, IndexerError> {
        let value = self
            .call_required(&self.token, self.addresses.token, "tokenURI", vec![uint(token_id)])
            .await?;
        decode::as_string(&value)
    }

    async fn get_token_owner(&self, token_id: u64) -> Result<Option<String>, IndexerError> {
        match self.token_call("ownerOf", vec![uint(token_id)]).await? {
            Some(values) => decode::as_address(&decode::single(values)?).map(Some),
            None => Ok(None),
        }
    }

    async fn get_carbon_price(&self) -> Result<U256, IndexerError> {
        let value = self
            .call_required(&self.oracle, self.addresses.oracle, "getCarbonPrice", vec![])
            .await?;
        decode::price(&value)
    }

    async fn is_proof_verified(&self, proof_hash: B256) -> Result<bool, IndexerError> {
        let value = self
            .call_required(
                &self.oracle,
                self.addresses.oracle,
                "isProofVerified",
                vec![DynSolValue::FixedBytes(proof_hash, 32)],
            )
            .await?;
        decode::as_bool(&value)
    }

    /// Watch registry and token logs from the block after the current head.
    async fn subscribe(&self) -> Result<ChainEventStream, IndexerError> {
        let head = self.client.block_number().await?;
        let watcher = LogWatcher::new(
            self.client.clone(),
            self.decoder.clone(),
            vec![self.addresses.registry, self.addresses.token],
            self.watcher.clone(),
        );
        Ok(watcher.spawn(head + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::{revert, MockTransport};
    use serde_json::{json, Value};

    fn addresses() -> ContractAddresses {
        ContractAddresses {
            registry: Address::repeat_byte(0x01),
            token: Address::repeat_byte(0x02),
            oracle: Address::repeat_byte(0x03),
        }
    }

    fn reader(mock: Arc<MockTransport>) -> EvmChainReader {
        EvmChainReader::new(RpcClient::new(mock), addresses(), WatcherConfig::default()).unwrap()
    }

    fn ret(values: Vec<DynSolValue>) -> Value {
        json!(format!("0x{}", hex::encode(DynSolValue::Tuple(values).abi_encode_params())))
    }

    fn selector_of(params: &[Value]) -> String {
        params[0]["data"].as_str().unwrap()[2..10].to_string()
    }

    fn farm_fields(id: u64) -> Vec<DynSolValue> {
        vec![
            uint(id),
            DynSolValue::Address(Address::repeat_byte(0xCD)),
            DynSolValue::String("Riverside".into()),
            uint(12),
            DynSolValue::String("Ghana".into()),
            DynSolValue::String("clay".into()),
            uint(900),
            uint(300),
            uint(1_700_000_100),
            DynSolValue::Bool(true),
            uint(1_690_000_000),
        ]
    }

    #[tokio::test]
    async fn get_farm_decodes_struct() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_call", |_| Ok(ret(farm_fields(7))));
        let farm = reader(mock).get_farm(7).await.unwrap().unwrap();
        assert_eq!(farm.id, 7);
        assert_eq!(farm.owner, format!("0x{}", "cd".repeat(20)));
        assert_eq!(farm.available_carbon(), U256::from(600u64));
    }

    #[tokio::test]
    async fn zeroed_farm_is_absent() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_call", |_| Ok(ret(farm_fields(0))));
        assert!(reader(mock).get_farm(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reverted_lookup_is_absent_but_transport_error_propagates() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_call", |_| Err(revert()));
        let r = reader(mock.clone());
        assert!(r.get_credit_details(4).await.unwrap().is_none());
        assert!(r.get_token_owner(4).await.unwrap().is_none());
        assert_eq!(r.get_total_credits().await.unwrap(), 0);
        assert!(r.get_token_uri(4).await.is_err());

        let down = Arc::new(MockTransport::default());
        let err = reader(down).get_farm(1).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn farm_by_address_unwraps_tuple() {
        let mock = Arc::new(MockTransport::default());
        mock.on("eth_call", |_| Ok(ret(vec![DynSolValue::Tuple(farm_fields(3))])));
        let farm = reader(mock)
            .get_farm_by_address("0xCDCDCDCDCDCDCDCDCDCDCDCDCDCDCDCDCDCDCDCD")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(farm.id, 3);
    }

    #[tokio::test]
    async fn invalid_owner_address_rejected() {
        let mock = Arc::new(MockTransport::default());
        let err = reader(mock.clone()).get_owner_credits("not-an-address").await.unwrap_err();
        assert!(matches!(err, IndexerError::Decode(_)));
        assert_eq!(mock.count("eth_call"), 0);
    }

    #[tokio::test]
    async fn recent_readings_and_credit_lists() {
        let mock = Arc::new(MockTransport::default());
        let readings_sel = hex::encode(
            ContractAbi::registry().unwrap().function("getRecentReadings").unwrap().selector(),
        );
        mock.on("eth_call", move |params| {
            if selector_of(params) == readings_sel {
                let reading = |id: u64| {
                    DynSolValue::Tuple(vec![
                        uint(id),
                        uint(2),
                        uint(50),
                        DynSolValue::String("drone".into()),
                        DynSolValue::String("Qm".into()),
                        uint(1_700_000_000 + id),
                        DynSolValue::Address(Address::repeat_byte(0x0E)),
                    ])
                };
                Ok(ret(vec![DynSolValue::Array(vec![reading(6), reading(5)])]))
            } else {
                Ok(ret(vec![DynSolValue::Array(vec![uint(1), uint(4)])]))
            }
        });
        let r = reader(mock);

        let readings = r.get_recent_readings(2, 2).await.unwrap();
        assert_eq!(readings.iter().map(|x| x.id).collect::<Vec<_>>(), vec![6, 5]);
        assert_eq!(r.get_farm_credits(2).await.unwrap(), vec![1, 4]);
    }

    #[tokio::test]
    async fn oracle_getters() {
        let mock = Arc::new(MockTransport::default());
        let price_sel =
            hex::encode(ContractAbi::oracle().unwrap().function("getCarbonPrice").unwrap().selector());
        mock.on("eth_call", move |params| {
            if selector_of(params) == price_sel {
                Ok(ret(vec![DynSolValue::Int(alloy_primitives::I256::try_from(42i64).unwrap(), 256)]))
            } else {
                assert_eq!(params[0]["to"], json!(Address::repeat_byte(0x03)));
                Ok(ret(vec![DynSolValue::Bool(true)]))
            }
        });
        let r = reader(mock);
        assert_eq!(r.get_carbon_price().await.unwrap(), U256::from(42u64));
        assert!(r.is_proof_verified(B256::repeat_byte(9)).await.unwrap());
    }

    #[tokio::test]
    async fn connectivity_follows_block_number() {
        let mock = Arc::new(MockTransport::default());
        assert!(!reader(mock.clone()).is_connected().await);
        mock.on("eth_blockNumber", |_| Ok(json!("0x2a")));
        let r = reader(mock);
        assert!(r.is_connected().await);
        assert_eq!(r.get_block_number().await.unwrap(), 42);
    }
}
