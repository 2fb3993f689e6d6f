//! Contract ABIs and call encoding/decoding via `alloy-dyn-abi`.

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, Function, JsonAbi};

use carbonindex_core::IndexerError;

/// Registry: farms, readings and their events.
pub const REGISTRY_ABI: &str = r#"[
  {"type":"event","name":"FarmRegistered","anonymous":false,"inputs":[
    {"name":"farmer","type":"address","indexed":true},
    {"name":"farmId","type":"uint256","indexed":true},
    {"name":"name","type":"string","indexed":false},
    {"name":"area","type":"uint256","indexed":false},
    {"name":"location","type":"string","indexed":false}]},
  {"type":"event","name":"CarbonAdded","anonymous":false,"inputs":[
    {"name":"farmId","type":"uint256","indexed":true},
    {"name":"readingId","type":"uint256","indexed":true},
    {"name":"amount","type":"uint256","indexed":false},
    {"name":"source","type":"string","indexed":false},
    {"name":"verificationHash","type":"string","indexed":false}]},
  {"type":"event","name":"CarbonDebtUpdated","anonymous":false,"inputs":[
    {"name":"farmId","type":"uint256","indexed":true},
    {"name":"newDebt","type":"uint256","indexed":false},
    {"name":"availableCarbon","type":"uint256","indexed":false}]},
  {"type":"function","name":"farmCounter","stateMutability":"view","inputs":[],
   "outputs":[{"name":"","type":"uint256"}]},
  {"type":"function","name":"farms","stateMutability":"view",
   "inputs":[{"name":"","type":"uint256"}],
   "outputs":[
    {"name":"farmId","type":"uint256"},
    {"name":"farmer","type":"address"},
    {"name":"name","type":"string"},
    {"name":"area","type":"uint256"},
    {"name":"location","type":"string"},
    {"name":"soilType","type":"string"},
    {"name":"totalCarbon","type":"uint256"},
    {"name":"carbonDebt","type":"uint256"},
    {"name":"lastReadingTimestamp","type":"uint256"},
    {"name":"isActive","type":"bool"},
    {"name":"createdAt","type":"uint256"}]},
  {"type":"function","name":"getFarmByAddress","stateMutability":"view",
   "inputs":[{"name":"_farmer","type":"address"}],
   "outputs":[{"name":"","type":"tuple","components":[
    {"name":"farmId","type":"uint256"},
    {"name":"farmer","type":"address"},
    {"name":"name","type":"string"},
    {"name":"area","type":"uint256"},
    {"name":"location","type":"string"},
    {"name":"soilType","type":"string"},
    {"name":"totalCarbon","type":"uint256"},
    {"name":"carbonDebt","type":"uint256"},
    {"name":"lastReadingTimestamp","type":"uint256"},
    {"name":"isActive","type":"bool"},
    {"name":"createdAt","type":"uint256"}]}]},
  {"type":"function","name":"getAvailableCarbon","stateMutability":"view",
   "inputs":[{"name":"_farmId","type":"uint256"}],
   "outputs":[{"name":"","type":"uint256"}]},
  {"type":"function","name":"getFarmStats","stateMutability":"view",
   "inputs":[{"name":"_farmId","type":"uint256"}],
   "outputs":[
    {"name":"totalCarbon","type":"uint256"},
    {"name":"carbonDebt","type":"uint256"},
    {"name":"availableCarbon","type":"uint256"},
    {"name":"readingCount","type":"uint256"},
    {"name":"creditCount","type":"uint256"},
    {"name":"lastUpdate","type":"uint256"}]},
  {"type":"function","name":"getRecentReadings","stateMutability":"view",
   "inputs":[{"name":"_farmId","type":"uint256"},{"name":"_count","type":"uint256"}],
   "outputs":[{"name":"","type":"tuple[]","components":[
    {"name":"readingId","type":"uint256"},
    {"name":"farmId","type":"uint256"},
    {"name":"amount","type":"uint256"},
    {"name":"source","type":"string"},
    {"name":"verificationHash","type":"string"},
    {"name":"timestamp","type":"uint256"},
    {"name":"verifiedBy","type":"address"}]}]},
  {"type":"function","name":"getTotalFarms","stateMutability":"view","inputs":[],
   "outputs":[{"name":"","type":"uint256"}]},
  {"type":"function","name":"getActiveFarmers","stateMutability":"view","inputs":[],
   "outputs":[{"name":"","type":"address[]"}]}
]"#;

/// Credit token (ERC-721).
pub const TOKEN_ABI: &str = r#"[
  {"type":"event","name":"CreditMinted","anonymous":false,"inputs":[
    {"name":"tokenId","type":"uint256","indexed":true},
    {"name":"farmer","type":"address","indexed":true},
    {"name":"farmId","type":"uint256","indexed":true},
    {"name":"carbonAmount","type":"uint256","indexed":false},
    {"name":"methodology","type":"string","indexed":false}]},
  {"type":"event","name":"CreditRetired","anonymous":false,"inputs":[
    {"name":"tokenId","type":"uint256","indexed":true},
    {"name":"retiredBy","type":"address","indexed":true},
    {"name":"reason","type":"string","indexed":false}]},
  {"type":"function","name":"getCreditDetails","stateMutability":"view",
   "inputs":[{"name":"_tokenId","type":"uint256"}],
   "outputs":[{"name":"","type":"tuple","components":[
    {"name":"tokenId","type":"uint256"},
    {"name":"farmId","type":"uint256"},
    {"name":"farmer","type":"address"},
    {"name":"carbonAmount","type":"uint256"},
    {"name":"methodology","type":"string"},
    {"name":"vintage","type":"uint256"},
    {"name":"mintedAt","type":"uint256"},
    {"name":"isRetired","type":"bool"},
    {"name":"retiredAt","type":"uint256"},
    {"name":"retirementReason","type":"string"}]}]},
  {"type":"function","name":"getFarmCredits","stateMutability":"view",
   "inputs":[{"name":"_farmId","type":"uint256"}],
   "outputs":[{"name":"","type":"uint256[]"}]},
  {"type":"function","name":"getOwnerCredits","stateMutability":"view",
   "inputs":[{"name":"_owner","type":"address"}],
   "outputs":[{"name":"","type":"uint256[]"}]},
  {"type":"function","name":"ownerOf","stateMutability":"view",
   "inputs":[{"name":"tokenId","type":"uint256"}],
   "outputs":[{"name":"","type":"address"}]},
  {"type":"function","name":"tokenURI","stateMutability":"view",
   "inputs":[{"name":"tokenId","type":"uint256"}],
   "outputs":[{"name":"","type":"string"}]},
  {"type":"function","name":"totalSupply","stateMutability":"view","inputs":[],
   "outputs":[{"name":"","type":"uint256"}]}
]"#;

/// Price and proof oracle.
pub const ORACLE_ABI: &str = r#"[
  {"type":"function","name":"isProofVerified","stateMutability":"view",
   "inputs":[{"name":"_proofHash","type":"bytes32"}],
   "outputs":[{"name":"","type":"bool"}]},
  {"type":"function","name":"getCarbonPrice","stateMutability":"view","inputs":[],
   "outputs":[{"name":"","type":"int256"}]}
]"#;

/// A parsed contract ABI with call helpers.
#[derive(Debug, Clone)]
pub struct ContractAbi {
    name: &'static str,
    abi: JsonAbi,
}

impl ContractAbi {
    pub fn parse(name: &'static str, json: &str) -> Result<Self, IndexerError> {
        let abi: JsonAbi = serde_json::from_str(json)
            .map_err(|e| IndexerError::Config(format!("invalid {name} ABI: {e}")))?;
        Ok(Self { name, abi })
    }

    pub fn registry() -> Result<Self, IndexerError> {
        Self::parse("registry", REGISTRY_ABI)
    }

    pub fn token() -> Result<Self, IndexerError> {
        Self::parse("token", TOKEN_ABI)
    }

    pub fn oracle() -> Result<Self, IndexerError> {
        Self::parse("oracle", ORACLE_ABI)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn function(&self, name: &str) -> Result<&Function, IndexerError> {
        self.abi
            .function(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| IndexerError::Decode(format!("{} ABI has no function '{name}'", self.name)))
    }

    pub fn event(&self, name: &str) -> Result<&Event, IndexerError> {
        self.abi
            .event(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| IndexerError::Decode(format!("{} ABI has no event '{name}'", self.name)))
    }

    /// Selector-prefixed calldata for `function(args…)`.
    pub fn encode_call(&self, function: &str, args: Vec<DynSolValue>) -> Result<Vec<u8>, IndexerError> {
        let func = self.function(function)?;
        if func.inputs.len() != args.len() {
            return Err(IndexerError::Decode(format!(
                "{function} expects {} arguments, got {}",
                func.inputs.len(),
                args.len()
            )));
        }
        let mut calldata = func.selector().to_vec();
        calldata.extend(DynSolValue::Tuple(args).abi_encode_params());
        Ok(calldata)
    }

    /// Decode `function`'s return data into one value per output.
    pub fn decode_output(&self, function: &str, data: &[u8]) -> Result<Vec<DynSolValue>, IndexerError> {
        let func = self.function(function)?;
        let types = func
            .outputs
            .iter()
            .map(|p| p.resolve())
            .collect::<Result<Vec<DynSolType>, _>>()
            .map_err(|e| IndexerError::Decode(format!("{function} output type: {e}")))?;
        decode_params(types, data).map_err(|e| IndexerError::Decode(format!("{function} output: {e}")))
    }
}

/// ABI-decode a parameter list (function outputs or non-indexed event data).
pub fn decode_params(
    types: Vec<DynSolType>,
    data: &[u8],
) -> Result<Vec<DynSolValue>, alloy_dyn_abi::Error> {
    if types.is_empty() {
        return Ok(vec![]);
    }
    match DynSolType::Tuple(types).abi_decode_params(data)? {
        DynSolValue::Tuple(values) => Ok(values),
        other => Ok(vec![other]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn abis_parse() {
        let registry = ContractAbi::registry().unwrap();
        assert!(registry.function("farms").is_ok());
        assert!(registry.event("CarbonDebtUpdated").is_ok());
        assert!(ContractAbi::token().unwrap().function("tokenURI").is_ok());
        assert!(ContractAbi::oracle().unwrap().function("getCarbonPrice").is_ok());
    }

    #[test]
    fn encode_call_prefixes_selector() {
        let token = ContractAbi::token().unwrap();
        let calldata = token
            .encode_call("tokenURI", vec![DynSolValue::Uint(U256::from(5u64), 256)])
            .unwrap();
        // keccak256("tokenURI(uint256)")[..4]
        assert_eq!(&calldata[..4], &[0xc8, 0x7b, 0x56, 0xdd]);
        assert_eq!(calldata.len(), 4 + 32);
        assert_eq!(calldata[35], 5);
    }

    #[test]
    fn encode_call_checks_arity() {
        let token = ContractAbi::token().unwrap();
        assert!(token.encode_call("tokenURI", vec![]).is_err());
        assert!(token.encode_call("burn", vec![]).is_err());
    }

    #[test]
    fn decode_dynamic_output() {
        let token = ContractAbi::token().unwrap();
        let encoded = DynSolValue::Tuple(vec![DynSolValue::String("ipfs://x".into())]).abi_encode_params();
        let values = token.decode_output("tokenURI", &encoded).unwrap();
        assert_eq!(values, vec![DynSolValue::String("ipfs://x".into())]);
    }
}
