//! Row types shared by the SQL backends and their conversions.
//!
//! Quantities travel as decimal text in both directions so that no backend
//! needs a native 256-bit type. Integer columns are `i64`; values beyond
//! `i64::MAX` are rejected on write.

use carbonindex_core::{
    normalize_address, CarbonCredit, CarbonReading, Farm, IndexerError, U256,
};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FarmRow {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub area: String,
    pub location: String,
    pub soil_type: String,
    pub total_carbon: String,
    pub carbon_debt: String,
    pub last_reading_at: i64,
    pub is_active: bool,
    pub created_at: i64,
}

impl TryFrom<FarmRow> for Farm {
    type Error = IndexerError;

    fn try_from(r: FarmRow) -> Result<Self, Self::Error> {
        Ok(Farm {
            id: to_u64(r.id, "farms.id")?,
            owner: r.owner,
            name: r.name,
            area: parse_u256(&r.area, "farms.area")?,
            location: r.location,
            soil_type: r.soil_type,
            total_carbon: parse_u256(&r.total_carbon, "farms.total_carbon")?,
            carbon_debt: parse_u256(&r.carbon_debt, "farms.carbon_debt")?,
            last_reading_at: to_u64(r.last_reading_at, "farms.last_reading_at")?,
            is_active: r.is_active,
            created_at: to_u64(r.created_at, "farms.created_at")?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReadingRow {
    pub id: i64,
    pub farm_id: i64,
    pub amount: String,
    pub source: String,
    pub verification_hash: String,
    pub timestamp: i64,
    pub verified_by: String,
}

impl TryFrom<ReadingRow> for CarbonReading {
    type Error = IndexerError;

    fn try_from(r: ReadingRow) -> Result<Self, Self::Error> {
        Ok(CarbonReading {
            id: to_u64(r.id, "readings.id")?,
            farm_id: to_u64(r.farm_id, "readings.farm_id")?,
            amount: parse_u256(&r.amount, "readings.amount")?,
            source: r.source,
            verification_hash: r.verification_hash,
            timestamp: to_u64(r.timestamp, "readings.timestamp")?,
            verified_by: r.verified_by,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CreditRow {
    pub token_id: i64,
    pub farm_id: i64,
    pub farmer: String,
    pub carbon_amount: String,
    pub methodology: String,
    pub vintage: i64,
    pub minted_at: i64,
    pub is_retired: bool,
    pub retired_at: Option<i64>,
    pub retirement_reason: Option<String>,
    pub token_uri: String,
}

impl TryFrom<CreditRow> for CarbonCredit {
    type Error = IndexerError;

    fn try_from(r: CreditRow) -> Result<Self, Self::Error> {
        Ok(CarbonCredit {
            token_id: to_u64(r.token_id, "credits.token_id")?,
            farm_id: to_u64(r.farm_id, "credits.farm_id")?,
            farmer: r.farmer,
            carbon_amount: parse_u256(&r.carbon_amount, "credits.carbon_amount")?,
            methodology: r.methodology,
            vintage: to_u64(r.vintage, "credits.vintage")?,
            minted_at: to_u64(r.minted_at, "credits.minted_at")?,
            is_retired: r.is_retired,
            retired_at: r
                .retired_at
                .map(|t| to_u64(t, "credits.retired_at"))
                .transpose()?,
            retirement_reason: r.retirement_reason,
            token_uri: r.token_uri,
        })
    }
}

/// Convert a row list, failing on the first bad row.
pub(crate) fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>, IndexerError>
where
    T: TryFrom<R, Error = IndexerError>,
{
    rows.into_iter().map(T::try_from).collect()
}

pub(crate) fn parse_u256(s: &str, column: &str) -> Result<U256, IndexerError> {
    s.trim()
        .parse::<U256>()
        .map_err(|e| IndexerError::Storage(format!("{column}: invalid quantity '{s}': {e}")))
}

pub(crate) fn to_i64(v: u64, column: &str) -> Result<i64, IndexerError> {
    i64::try_from(v).map_err(|_| IndexerError::Storage(format!("{column}: {v} out of range")))
}

fn to_u64(v: i64, column: &str) -> Result<u64, IndexerError> {
    u64::try_from(v).map_err(|_| IndexerError::Storage(format!("{column}: negative value {v}")))
}

/// Normalised copy of an owner address for binding.
pub(crate) fn owner_key(owner: &str) -> String {
    normalize_address(owner)
}

pub(crate) fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// Map a reading insert failure, turning a primary-key clash into
/// [`IndexerError::DuplicateKey`].
pub(crate) fn reading_insert_err(e: sqlx::Error, reading_id: u64) -> IndexerError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => IndexerError::DuplicateKey {
            collection: "readings",
            key: reading_id,
        },
        _ => storage_err(e),
    }
}
