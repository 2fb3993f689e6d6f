//! Chain reader trait and the typed event records it pushes.
//!
//! The reader is the only component that talks to the chain. Everything
//! downstream consumes decoded records and [`ChainEvent`]s.

use std::pin::Pin;

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::{CarbonCredit, CarbonReading, Farm, FarmStats};

// ─── Events ───────────────────────────────────────────────────────────────────

/// Decoded contract event, independent of how it was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub block_number: u64,
    /// Transaction hash, `0x…`. Empty when the transport does not supply one.
    pub tx_hash: String,
    pub log_index: u64,
    pub payload: EventPayload,
}

impl ChainEvent {
    pub fn new(block_number: u64, payload: EventPayload) -> Self {
        Self {
            block_number,
            tx_hash: String::new(),
            log_index: 0,
            payload,
        }
    }

    /// Attach the transaction hash and log index the event was found at.
    pub fn at(mut self, tx_hash: impl Into<String>, log_index: u64) -> Self {
        self.tx_hash = tx_hash.into();
        self.log_index = log_index;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// The mirror entity this event touches.
    pub fn entity(&self) -> EntityKey {
        self.payload.entity()
    }
}

/// Event-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    FarmRegistered {
        farm_id: u64,
        farmer: String,
    },
    CarbonAdded {
        farm_id: u64,
        reading_id: u64,
        #[serde(with = "crate::types::decimal")]
        amount: U256,
    },
    CarbonDebtUpdated {
        farm_id: u64,
        #[serde(with = "crate::types::decimal")]
        new_debt: U256,
    },
    CreditMinted {
        token_id: u64,
        farm_id: u64,
        farmer: String,
        #[serde(with = "crate::types::decimal")]
        carbon_amount: U256,
    },
    CreditRetired {
        token_id: u64,
        retired_by: String,
        reason: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::FarmRegistered { .. } => EventKind::FarmRegistered,
            Self::CarbonAdded { .. } => EventKind::CarbonAdded,
            Self::CarbonDebtUpdated { .. } => EventKind::CarbonDebtUpdated,
            Self::CreditMinted { .. } => EventKind::CreditMinted,
            Self::CreditRetired { .. } => EventKind::CreditRetired,
        }
    }

    /// Readings are scoped under their farm, so `CarbonAdded` keys on the farm.
    pub fn entity(&self) -> EntityKey {
        match self {
            Self::FarmRegistered { farm_id, .. }
            | Self::CarbonAdded { farm_id, .. }
            | Self::CarbonDebtUpdated { farm_id, .. } => EntityKey::Farm(*farm_id),
            Self::CreditMinted { token_id, .. } | Self::CreditRetired { token_id, .. } => {
                EntityKey::Credit(*token_id)
            }
        }
    }
}

/// Event discriminant, used for logging and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    FarmRegistered,
    CarbonAdded,
    CarbonDebtUpdated,
    CreditMinted,
    CreditRetired,
}

impl EventKind {
    /// Solidity event name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FarmRegistered => "FarmRegistered",
            Self::CarbonAdded => "CarbonAdded",
            Self::CarbonDebtUpdated => "CarbonDebtUpdated",
            Self::CreditMinted => "CreditMinted",
            Self::CreditRetired => "CreditRetired",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity used to serialise updates to the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    Farm(u64),
    Credit(u64),
}

/// Push-based event feed. Dropping it unsubscribes.
pub type ChainEventStream =
    Pin<Box<dyn Stream<Item = Result<ChainEvent, IndexerError>> + Send + 'static>>;

// ─── ChainReader ──────────────────────────────────────────────────────────────

/// Read-only access to the registry, token and oracle contracts.
///
/// Getters return `None` for the contract's not-found sentinel (a zeroed
/// record) instead of failing. Transport failures surface as
/// [`IndexerError::Rpc`].
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current chain head.
    async fn get_block_number(&self) -> Result<u64, IndexerError>;

    /// `false` on any error. Never fails.
    async fn is_connected(&self) -> bool {
        self.get_block_number().await.is_ok()
    }

    // ── registry ──

    async fn get_total_farms(&self) -> Result<u64, IndexerError>;

    async fn get_farm(&self, farm_id: u64) -> Result<Option<Farm>, IndexerError>;

    async fn get_farm_by_address(&self, owner: &str) -> Result<Option<Farm>, IndexerError>;

    async fn get_available_carbon(&self, farm_id: u64) -> Result<U256, IndexerError>;

    async fn get_farm_stats(&self, farm_id: u64) -> Result<Option<FarmStats>, IndexerError>;

    /// Up to `count` most recent readings, newest first.
    async fn get_recent_readings(
        &self,
        farm_id: u64,
        count: u32,
    ) -> Result<Vec<CarbonReading>, IndexerError>;

    async fn get_active_farmers(&self) -> Result<Vec<String>, IndexerError>;

    // ── token ──

    /// Token supply. Zero when the contract does not expose it.
    async fn get_total_credits(&self) -> Result<u64, IndexerError>;

    /// Credit detail without the metadata URI (`token_uri` is left empty).
    async fn get_credit_details(&self, token_id: u64)
        -> Result<Option<CarbonCredit>, IndexerError>;

    async fn get_farm_credits(&self, farm_id: u64) -> Result<Vec<u64>, IndexerError>;

    async fn get_owner_credits(&self, owner: &str) -> Result<Vec<u64>, IndexerError>;

    async fn get_token_uri(&self, token_id: u64) -> Result<String, IndexerError>;

    async fn get_token_owner(&self, token_id: u64) -> Result<Option<String>, IndexerError>;

    // ── oracle ──

    async fn get_carbon_price(&self) -> Result<U256, IndexerError>;

    async fn is_proof_verified(&self, proof_hash: B256) -> Result<bool, IndexerError>;

    // ── events ──

    /// Subscribe to registry and token events from now on.
    async fn subscribe(&self) -> Result<ChainEventStream, IndexerError>;
}
