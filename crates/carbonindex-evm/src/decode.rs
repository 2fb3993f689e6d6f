//! Contract return values and logs → typed mirror records.
//!
//! Every record decoder checks the id field explicitly: a zero id is the
//! contracts' "not found" sentinel and decodes to `None`.

use std::collections::HashMap;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_primitives::{Address, B256, U256};

use carbonindex_core::{
    normalize_address, CarbonCredit, CarbonReading, ChainEvent, EventKind, EventPayload, Farm,
    FarmStats, IndexerError,
};

use crate::abi::{decode_params, ContractAbi};
use crate::logs::RawLog;

fn decode_err(msg: impl Into<String>) -> IndexerError {
    IndexerError::Decode(msg.into())
}

// ─── Scalars ──────────────────────────────────────────────────────────────────

pub fn as_u256(v: &DynSolValue) -> Result<U256, IndexerError> {
    match v {
        DynSolValue::Uint(n, _) => Ok(*n),
        other => Err(decode_err(format!("expected uint, got {other:?}"))),
    }
}

/// A uint that must fit in 64 bits (ids, counts, timestamps).
pub fn as_u64(v: &DynSolValue) -> Result<u64, IndexerError> {
    let n = as_u256(v)?;
    u64::try_from(n).map_err(|_| decode_err(format!("value {n} exceeds u64")))
}

pub fn as_bool(v: &DynSolValue) -> Result<bool, IndexerError> {
    match v {
        DynSolValue::Bool(b) => Ok(*b),
        other => Err(decode_err(format!("expected bool, got {other:?}"))),
    }
}

pub fn as_string(v: &DynSolValue) -> Result<String, IndexerError> {
    match v {
        DynSolValue::String(s) => Ok(s.clone()),
        other => Err(decode_err(format!("expected string, got {other:?}"))),
    }
}

/// Lowercase `0x…` form.
pub fn as_address(v: &DynSolValue) -> Result<String, IndexerError> {
    match v {
        DynSolValue::Address(a) => Ok(address_string(a)),
        other => Err(decode_err(format!("expected address, got {other:?}"))),
    }
}

pub fn address_string(a: &Address) -> String {
    normalize_address(&a.to_string())
}

pub fn as_list(v: &DynSolValue) -> Result<&[DynSolValue], IndexerError> {
    match v {
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Ok(items)
        }
        other => Err(decode_err(format!("expected array or tuple, got {other:?}"))),
    }
}

fn fields<'a>(values: &'a [DynSolValue], n: usize, what: &str) -> Result<&'a [DynSolValue], IndexerError> {
    if values.len() != n {
        return Err(decode_err(format!("{what}: expected {n} fields, got {}", values.len())));
    }
    Ok(values)
}

/// The single return value of a one-output function.
pub fn single(values: Vec<DynSolValue>) -> Result<DynSolValue, IndexerError> {
    let mut values = values;
    match values.len() {
        1 => Ok(values.remove(0)),
        n => Err(decode_err(format!("expected one return value, got {n}"))),
    }
}

// ─── Records ──────────────────────────────────────────────────────────────────

/// Decode the 11-field farm layout shared by `farms(id)` and `getFarmByAddress`.
pub fn farm(values: &[DynSolValue]) -> Result<Option<Farm>, IndexerError> {
    let f = fields(values, 11, "farm")?;
    let id = as_u64(&f[0])?;
    if id == 0 {
        return Ok(None);
    }
    Ok(Some(Farm {
        id,
        owner: as_address(&f[1])?,
        name: as_string(&f[2])?,
        area: as_u256(&f[3])?,
        location: as_string(&f[4])?,
        soil_type: as_string(&f[5])?,
        total_carbon: as_u256(&f[6])?,
        carbon_debt: as_u256(&f[7])?,
        last_reading_at: as_u64(&f[8])?,
        is_active: as_bool(&f[9])?,
        created_at: as_u64(&f[10])?,
    }))
}

pub fn farm_stats(values: &[DynSolValue]) -> Result<FarmStats, IndexerError> {
    let f = fields(values, 6, "farm stats")?;
    Ok(FarmStats {
        total_carbon: as_u256(&f[0])?,
        carbon_debt: as_u256(&f[1])?,
        available_carbon: as_u256(&f[2])?,
        reading_count: as_u64(&f[3])?,
        credit_count: as_u64(&f[4])?,
        last_update: as_u64(&f[5])?,
    })
}

pub fn reading(value: &DynSolValue) -> Result<Option<CarbonReading>, IndexerError> {
    let f = fields(as_list(value)?, 7, "reading")?;
    let id = as_u64(&f[0])?;
    if id == 0 {
        return Ok(None);
    }
    Ok(Some(CarbonReading {
        id,
        farm_id: as_u64(&f[1])?,
        amount: as_u256(&f[2])?,
        source: as_string(&f[3])?,
        verification_hash: as_string(&f[4])?,
        timestamp: as_u64(&f[5])?,
        verified_by: as_address(&f[6])?,
    }))
}

/// `getRecentReadings` returns `tuple[]`; zeroed entries are dropped.
pub fn readings(value: &DynSolValue) -> Result<Vec<CarbonReading>, IndexerError> {
    let mut out = Vec::new();
    for item in as_list(value)? {
        if let Some(r) = reading(item)? {
            out.push(r);
        }
    }
    Ok(out)
}

/// `getCreditDetails` tuple. The metadata URI is not part of it.
pub fn credit(value: &DynSolValue) -> Result<Option<CarbonCredit>, IndexerError> {
    let f = fields(as_list(value)?, 10, "credit")?;
    let token_id = as_u64(&f[0])?;
    if token_id == 0 {
        return Ok(None);
    }
    let is_retired = as_bool(&f[7])?;
    Ok(Some(CarbonCredit {
        token_id,
        farm_id: as_u64(&f[1])?,
        farmer: as_address(&f[2])?,
        carbon_amount: as_u256(&f[3])?,
        methodology: as_string(&f[4])?,
        vintage: as_u64(&f[5])?,
        minted_at: as_u64(&f[6])?,
        is_retired,
        retired_at: if is_retired { Some(as_u64(&f[8])?) } else { None },
        retirement_reason: if is_retired { Some(as_string(&f[9])?) } else { None },
        token_uri: String::new(),
    }))
}

pub fn u64_list(value: &DynSolValue) -> Result<Vec<u64>, IndexerError> {
    as_list(value)?.iter().map(as_u64).collect()
}

pub fn address_list(value: &DynSolValue) -> Result<Vec<String>, IndexerError> {
    as_list(value)?.iter().map(as_address).collect()
}

/// `int256` price; negative values are rejected.
pub fn price(value: &DynSolValue) -> Result<U256, IndexerError> {
    match value {
        DynSolValue::Int(n, _) if n.is_negative() => {
            Err(decode_err(format!("negative carbon price {n}")))
        }
        DynSolValue::Int(n, _) => Ok(n.into_raw()),
        DynSolValue::Uint(n, _) => Ok(*n),
        other => Err(decode_err(format!("expected int, got {other:?}"))),
    }
}

// ─── Logs ─────────────────────────────────────────────────────────────────────

struct EventShape {
    kind: EventKind,
    data_types: Vec<DynSolType>,
}

/// Maps `topics[0]` to the five mirrored events and decodes their logs.
pub struct LogDecoder {
    events: HashMap<B256, EventShape>,
}

impl LogDecoder {
    pub fn new(registry: &ContractAbi, token: &ContractAbi) -> Result<Self, IndexerError> {
        let wanted = [
            (registry, EventKind::FarmRegistered),
            (registry, EventKind::CarbonAdded),
            (registry, EventKind::CarbonDebtUpdated),
            (token, EventKind::CreditMinted),
            (token, EventKind::CreditRetired),
        ];
        let mut events = HashMap::new();
        for (abi, kind) in wanted {
            let event = abi.event(kind.as_str())?;
            let data_types = event
                .inputs
                .iter()
                .filter(|p| !p.indexed)
                .map(|p| p.resolve())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| decode_err(format!("{kind} data type: {e}")))?;
            events.insert(event.selector(), EventShape { kind, data_types });
        }
        Ok(Self { events })
    }

    /// `topics[0]` values to filter `eth_getLogs` on.
    pub fn selectors(&self) -> Vec<B256> {
        self.events.keys().copied().collect()
    }

    /// Decode one log. `Ok(None)` for removed logs and unrelated topics.
    pub fn decode(&self, log: &RawLog) -> Result<Option<ChainEvent>, IndexerError> {
        if log.is_removed() {
            return Ok(None);
        }
        let topics = log
            .topics
            .iter()
            .map(|t| t.parse::<B256>().map_err(|e| decode_err(format!("topic '{t}': {e}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(shape) = topics.first().and_then(|t0| self.events.get(t0)) else {
            return Ok(None);
        };

        let raw = hex::decode(log.data.strip_prefix("0x").unwrap_or(&log.data))
            .map_err(|e| decode_err(format!("log data hex: {e}")))?;
        let data = decode_params(shape.data_types.clone(), &raw)
            .map_err(|e| decode_err(format!("{} data: {e}", shape.kind)))?;

        let topic = |i: usize| {
            topics
                .get(i)
                .copied()
                .ok_or_else(|| decode_err(format!("{} missing topic {i}", shape.kind)))
        };
        let datum = |i: usize| {
            data.get(i)
                .ok_or_else(|| decode_err(format!("{} missing data field {i}", shape.kind)))
        };

        let payload = match shape.kind {
            EventKind::FarmRegistered => EventPayload::FarmRegistered {
                farmer: topic_address(topic(1)?),
                farm_id: topic_u64(topic(2)?)?,
            },
            EventKind::CarbonAdded => EventPayload::CarbonAdded {
                farm_id: topic_u64(topic(1)?)?,
                reading_id: topic_u64(topic(2)?)?,
                amount: as_u256(datum(0)?)?,
            },
            EventKind::CarbonDebtUpdated => EventPayload::CarbonDebtUpdated {
                farm_id: topic_u64(topic(1)?)?,
                new_debt: as_u256(datum(0)?)?,
            },
            EventKind::CreditMinted => EventPayload::CreditMinted {
                token_id: topic_u64(topic(1)?)?,
                farmer: topic_address(topic(2)?),
                farm_id: topic_u64(topic(3)?)?,
                carbon_amount: as_u256(datum(0)?)?,
            },
            EventKind::CreditRetired => EventPayload::CreditRetired {
                token_id: topic_u64(topic(1)?)?,
                retired_by: topic_address(topic(2)?),
                reason: as_string(datum(0)?)?,
            },
        };

        let event = ChainEvent::new(log.block_number_u64(), payload)
            .at(log.tx_hash.clone().unwrap_or_default(), log.log_index_u64());
        Ok(Some(event))
    }
}

fn topic_u64(topic: B256) -> Result<u64, IndexerError> {
    let n = U256::from_be_bytes(topic.0);
    u64::try_from(n).map_err(|_| decode_err(format!("indexed id {n} exceeds u64")))
}

fn topic_address(topic: B256) -> String {
    address_string(&Address::from_word(topic))
}
