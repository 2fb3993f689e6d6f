//! Mirror records for the three entity streams plus read-model helpers.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

// ─── Farm ─────────────────────────────────────────────────────────────────────

/// A registered farm, as last observed on the registry contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Farm {
    /// Contract-assigned id (dense, starting at 1).
    pub id: u64,
    /// Owner address, lowercase `0x…`.
    pub owner: String,
    pub name: String,
    #[serde(with = "decimal")]
    pub area: U256,
    pub location: String,
    pub soil_type: String,
    /// Cumulative sequestered carbon.
    #[serde(with = "decimal")]
    pub total_carbon: U256,
    /// Carbon already committed to minted credits.
    #[serde(with = "decimal")]
    pub carbon_debt: U256,
    /// Unix timestamp of the most recent reading (0 if none).
    pub last_reading_at: u64,
    pub is_active: bool,
    /// Unix timestamp of registration.
    pub created_at: u64,
}

impl Farm {
    /// Carbon still available for minting.
    ///
    /// The registry guarantees `carbon_debt <= total_carbon`; a snapshot that
    /// violates it yields zero rather than wrapping.
    pub fn available_carbon(&self) -> U256 {
        self.total_carbon.saturating_sub(self.carbon_debt)
    }
}

// ─── CarbonReading ────────────────────────────────────────────────────────────

/// A verified carbon measurement. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarbonReading {
    pub id: u64,
    pub farm_id: u64,
    #[serde(with = "decimal")]
    pub amount: U256,
    /// Measurement source, e.g. `"sensor"`, `"satellite"`, `"drone"`.
    pub source: String,
    pub verification_hash: String,
    pub timestamp: u64,
    /// Verifier address, lowercase `0x…`.
    pub verified_by: String,
}

// ─── CarbonCredit ─────────────────────────────────────────────────────────────

/// A minted carbon credit token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarbonCredit {
    pub token_id: u64,
    pub farm_id: u64,
    /// Farmer the credit was minted for, lowercase `0x…`.
    pub farmer: String,
    #[serde(with = "decimal")]
    pub carbon_amount: U256,
    pub methodology: String,
    pub vintage: u64,
    pub minted_at: u64,
    pub is_retired: bool,
    /// Set only once the credit is retired.
    pub retired_at: Option<u64>,
    /// Set only once the credit is retired.
    pub retirement_reason: Option<String>,
    /// Off-chain metadata URI. Empty when the token contract did not return one.
    pub token_uri: String,
}

// ─── FarmStats ────────────────────────────────────────────────────────────────

/// Aggregate view returned by the registry's `getFarmStats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmStats {
    #[serde(with = "decimal")]
    pub total_carbon: U256,
    #[serde(with = "decimal")]
    pub carbon_debt: U256,
    #[serde(with = "decimal")]
    pub available_carbon: U256,
    pub reading_count: u64,
    pub credit_count: u64,
    pub last_update: u64,
}

// ─── EcosystemStats ───────────────────────────────────────────────────────────

/// Totals computed over the mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcosystemStats {
    pub total_farms: u64,
    pub active_farms: u64,
    pub total_credits: u64,
    #[serde(with = "decimal")]
    pub total_carbon_sequestered: U256,
}

impl EcosystemStats {
    /// Fold a farm into the totals.
    pub fn add_farm(&mut self, farm: &Farm) {
        self.total_farms += 1;
        if farm.is_active {
            self.active_farms += 1;
        }
        self.total_carbon_sequestered =
            self.total_carbon_sequestered.saturating_add(farm.total_carbon);
    }
}

// ─── Pagination ───────────────────────────────────────────────────────────────

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Build a request, clamping `page` to ≥ 1 and `limit` to `1..=MAX_PAGE_LIMIT`.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of results plus the total row count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, req: PageRequest) -> Self {
        Self {
            data,
            total,
            page: req.page,
            limit: req.limit,
        }
    }

    /// Total number of pages.
    pub fn pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.limit.max(1)))
    }
}

/// Slice an already-ordered collection into a page.
pub fn paginate<T: Clone>(rows: &[T], req: PageRequest) -> Page<T> {
    let data = rows
        .iter()
        .skip(req.offset() as usize)
        .take(req.limit as usize)
        .cloned()
        .collect();
    Page::new(data, rows.len() as u64, req)
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Canonical mirror form of an address: trimmed, lowercase.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Serde adapter writing `U256` as a decimal string.
pub mod decimal {
    use alloy_primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<U256>().map_err(D::Error::custom)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
