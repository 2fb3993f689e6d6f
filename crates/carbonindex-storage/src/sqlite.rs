//! SQLite mirror backend.
//!
//! Persists farms, readings, credits and the sync cursor to a single SQLite
//! file via `sqlx`, with WAL journaling for concurrent reads.
//!
//! # Usage
//! ```rust,no_run
//! use carbonindex_storage::sqlite::SqliteMirror;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteMirror::open("./mirror.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteMirror::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use carbonindex_core::{
    CarbonCredit, CarbonReading, EcosystemStats, Farm, IndexerError, MirrorStore, Page,
    PageRequest, SyncCursor,
};

use crate::rows::{
    convert, owner_key, parse_u256, reading_insert_err, storage_err, to_i64, CreditRow, FarmRow,
    ReadingRow,
};

const FARM_COLUMNS: &str = "id, owner, name, area, location, soil_type, total_carbon, \
     carbon_debt, last_reading_at, is_active, created_at";

const READING_COLUMNS: &str =
    "id, farm_id, amount, source, verification_hash, timestamp, verified_by";

const CREDIT_COLUMNS: &str = "token_id, farm_id, farmer, carbon_amount, methodology, vintage, \
     minted_at, is_retired, retired_at, retirement_reason, token_uri";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS farms (
        id              INTEGER PRIMARY KEY,
        owner           TEXT    NOT NULL,
        name            TEXT    NOT NULL,
        area            TEXT    NOT NULL,
        location        TEXT    NOT NULL,
        soil_type       TEXT    NOT NULL,
        total_carbon    TEXT    NOT NULL,
        carbon_debt     TEXT    NOT NULL,
        last_reading_at INTEGER NOT NULL,
        is_active       INTEGER NOT NULL,
        created_at      INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_farms_owner ON farms (owner)",
    "CREATE INDEX IF NOT EXISTS idx_farms_created ON farms (created_at DESC, id DESC)",
    "CREATE TABLE IF NOT EXISTS readings (
        id                INTEGER PRIMARY KEY,
        farm_id           INTEGER NOT NULL,
        amount            TEXT    NOT NULL,
        source            TEXT    NOT NULL,
        verification_hash TEXT    NOT NULL,
        timestamp         INTEGER NOT NULL,
        verified_by       TEXT    NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_readings_farm ON readings (farm_id, timestamp DESC)",
    "CREATE TABLE IF NOT EXISTS credits (
        token_id          INTEGER PRIMARY KEY,
        farm_id           INTEGER NOT NULL,
        farmer            TEXT    NOT NULL,
        carbon_amount     TEXT    NOT NULL,
        methodology       TEXT    NOT NULL,
        vintage           INTEGER NOT NULL,
        minted_at         INTEGER NOT NULL,
        is_retired        INTEGER NOT NULL,
        retired_at        INTEGER,
        retirement_reason TEXT,
        token_uri         TEXT    NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_credits_farmer ON credits (farmer, minted_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_credits_farm ON credits (farm_id, minted_at DESC)",
    "CREATE TABLE IF NOT EXISTS sync_state (
        id         INTEGER PRIMARY KEY CHECK (id = 1),
        last_block INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
];

/// SQLite-backed mirror store.
#[derive(Clone)]
pub struct SqliteMirror {
    pool: SqlitePool,
}

impl SqliteMirror {
    /// Open (or create) a database at `path`.
    ///
    /// The path may be a plain file path (`"./mirror.db"`) or a full SQLite
    /// URL (`"sqlite:./mirror.db"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(storage_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        debug!(url = %url, "sqlite mirror opened");
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // every connection to `:memory:` is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| IndexerError::Storage(format!("schema: {e}")))?;
        }
        Ok(())
    }

    async fn count(&self, sql: &str, bind: Option<Bound<'_>>) -> Result<u64, IndexerError> {
        let mut query = sqlx::query(sql);
        query = match bind {
            Some(Bound::Int(v)) => query.bind(v),
            Some(Bound::Text(v)) => query.bind(v),
            None => query,
        };
        let row = query.fetch_one(&self.pool).await.map_err(storage_err)?;
        let n: i64 = row.try_get(0).map_err(storage_err)?;
        Ok(n.max(0) as u64)
    }

    async fn credit_page(
        &self,
        filter: &str,
        bind: Option<Bound<'_>>,
        page: PageRequest,
    ) -> Result<Page<CarbonCredit>, IndexerError> {
        let sql = format!(
            "SELECT {CREDIT_COLUMNS} FROM credits {filter}
             ORDER BY minted_at DESC, token_id DESC LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query_as::<_, CreditRow>(&sql);
        query = match &bind {
            Some(Bound::Int(v)) => query.bind(*v),
            Some(Bound::Text(v)) => query.bind(*v),
            None => query,
        };
        let rows = query
            .bind(i64::from(page.limit))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        let total = self
            .count(&format!("SELECT COUNT(*) FROM credits {filter}"), bind)
            .await?;
        Ok(Page::new(convert(rows)?, total, page))
    }
}

/// A single optional filter parameter.
enum Bound<'a> {
    Int(i64),
    Text(&'a str),
}

#[async_trait]
impl MirrorStore for SqliteMirror {
    async fn upsert_farm(&self, farm: &Farm) -> Result<(), IndexerError> {
        sqlx::query(&format!(
            "INSERT INTO farms ({FARM_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                name = excluded.name,
                area = excluded.area,
                location = excluded.location,
                soil_type = excluded.soil_type,
                total_carbon = excluded.total_carbon,
                carbon_debt = excluded.carbon_debt,
                last_reading_at = excluded.last_reading_at,
                is_active = excluded.is_active,
                created_at = excluded.created_at"
        ))
        .bind(to_i64(farm.id, "farms.id")?)
        .bind(owner_key(&farm.owner))
        .bind(&farm.name)
        .bind(farm.area.to_string())
        .bind(&farm.location)
        .bind(&farm.soil_type)
        .bind(farm.total_carbon.to_string())
        .bind(farm.carbon_debt.to_string())
        .bind(to_i64(farm.last_reading_at, "farms.last_reading_at")?)
        .bind(farm.is_active)
        .bind(to_i64(farm.created_at, "farms.created_at")?)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(farm_id = farm.id, "farm upserted");
        Ok(())
    }

    async fn insert_reading(&self, reading: &CarbonReading) -> Result<(), IndexerError> {
        sqlx::query(&format!(
            "INSERT INTO readings ({READING_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(to_i64(reading.id, "readings.id")?)
        .bind(to_i64(reading.farm_id, "readings.farm_id")?)
        .bind(reading.amount.to_string())
        .bind(&reading.source)
        .bind(&reading.verification_hash)
        .bind(to_i64(reading.timestamp, "readings.timestamp")?)
        .bind(owner_key(&reading.verified_by))
        .execute(&self.pool)
        .await
        .map_err(|e| reading_insert_err(e, reading.id))?;

        debug!(reading_id = reading.id, farm_id = reading.farm_id, "reading inserted");
        Ok(())
    }

    async fn upsert_credit(&self, credit: &CarbonCredit) -> Result<(), IndexerError> {
        let retired_at = credit
            .retired_at
            .map(|t| to_i64(t, "credits.retired_at"))
            .transpose()?;
        sqlx::query(&format!(
            "INSERT INTO credits ({CREDIT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(token_id) DO UPDATE SET
                farm_id = excluded.farm_id,
                farmer = excluded.farmer,
                carbon_amount = excluded.carbon_amount,
                methodology = excluded.methodology,
                vintage = excluded.vintage,
                minted_at = excluded.minted_at,
                is_retired = excluded.is_retired,
                retired_at = excluded.retired_at,
                retirement_reason = excluded.retirement_reason,
                token_uri = excluded.token_uri"
        ))
        .bind(to_i64(credit.token_id, "credits.token_id")?)
        .bind(to_i64(credit.farm_id, "credits.farm_id")?)
        .bind(owner_key(&credit.farmer))
        .bind(credit.carbon_amount.to_string())
        .bind(&credit.methodology)
        .bind(to_i64(credit.vintage, "credits.vintage")?)
        .bind(to_i64(credit.minted_at, "credits.minted_at")?)
        .bind(credit.is_retired)
        .bind(retired_at)
        .bind(&credit.retirement_reason)
        .bind(&credit.token_uri)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(token_id = credit.token_id, "credit upserted");
        Ok(())
    }

    async fn load_cursor(&self) -> Result<Option<SyncCursor>, IndexerError> {
        let row = sqlx::query("SELECT last_block, updated_at FROM sync_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(|r| {
            let block: i64 = r.try_get("last_block").map_err(storage_err)?;
            Ok(SyncCursor {
                block_number: block.max(0) as u64,
                updated_at: r.try_get("updated_at").map_err(storage_err)?,
            })
        })
        .transpose()
    }

    async fn save_cursor(&self, cursor: SyncCursor) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO sync_state (id, last_block, updated_at) VALUES (1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                last_block = excluded.last_block,
                updated_at = excluded.updated_at
             WHERE excluded.last_block >= sync_state.last_block",
        )
        .bind(to_i64(cursor.block_number, "sync_state.last_block")?)
        .bind(cursor.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(block = cursor.block_number, "cursor saved");
        Ok(())
    }

    async fn get_farm(&self, farm_id: u64) -> Result<Option<Farm>, IndexerError> {
        sqlx::query_as::<_, FarmRow>(&format!("SELECT {FARM_COLUMNS} FROM farms WHERE id = ?"))
            .bind(to_i64(farm_id, "farms.id")?)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .map(Farm::try_from)
            .transpose()
    }

    async fn get_farm_by_owner(&self, owner: &str) -> Result<Option<Farm>, IndexerError> {
        sqlx::query_as::<_, FarmRow>(&format!(
            "SELECT {FARM_COLUMNS} FROM farms WHERE owner = ? ORDER BY id LIMIT 1"
        ))
        .bind(owner_key(owner))
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?
        .map(Farm::try_from)
        .transpose()
    }

    async fn list_farms(&self, page: PageRequest) -> Result<Page<Farm>, IndexerError> {
        let rows = sqlx::query_as::<_, FarmRow>(&format!(
            "SELECT {FARM_COLUMNS} FROM farms
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        let total = self.count("SELECT COUNT(*) FROM farms", None).await?;
        Ok(Page::new(convert(rows)?, total, page))
    }

    async fn list_readings(
        &self,
        farm_id: u64,
        page: PageRequest,
    ) -> Result<Page<CarbonReading>, IndexerError> {
        let farm = to_i64(farm_id, "readings.farm_id")?;
        let rows = sqlx::query_as::<_, ReadingRow>(&format!(
            "SELECT {READING_COLUMNS} FROM readings WHERE farm_id = ?
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
        ))
        .bind(farm)
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        let total = self
            .count("SELECT COUNT(*) FROM readings WHERE farm_id = ?", Some(Bound::Int(farm)))
            .await?;
        Ok(Page::new(convert(rows)?, total, page))
    }

    async fn get_credit(&self, token_id: u64) -> Result<Option<CarbonCredit>, IndexerError> {
        sqlx::query_as::<_, CreditRow>(&format!(
            "SELECT {CREDIT_COLUMNS} FROM credits WHERE token_id = ?"
        ))
        .bind(to_i64(token_id, "credits.token_id")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?
        .map(CarbonCredit::try_from)
        .transpose()
    }

    async fn list_credits(&self, page: PageRequest) -> Result<Page<CarbonCredit>, IndexerError> {
        self.credit_page("", None, page).await
    }

    async fn list_credits_by_owner(
        &self,
        owner: &str,
        page: PageRequest,
    ) -> Result<Page<CarbonCredit>, IndexerError> {
        let owner = owner_key(owner);
        self.credit_page("WHERE farmer = ?", Some(Bound::Text(&owner)), page)
            .await
    }

    async fn list_credits_by_farm(
        &self,
        farm_id: u64,
        page: PageRequest,
    ) -> Result<Page<CarbonCredit>, IndexerError> {
        let farm = to_i64(farm_id, "credits.farm_id")?;
        self.credit_page("WHERE farm_id = ?", Some(Bound::Int(farm)), page)
            .await
    }

    async fn ecosystem_stats(&self) -> Result<EcosystemStats, IndexerError> {
        // summed in Rust: TEXT quantities exceed SQLite's integer range
        let rows = sqlx::query("SELECT total_carbon, is_active FROM farms")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut stats = EcosystemStats::default();
        for row in rows {
            let carbon: String = row.try_get("total_carbon").map_err(storage_err)?;
            let active: bool = row.try_get("is_active").map_err(storage_err)?;
            stats.total_farms += 1;
            if active {
                stats.active_farms += 1;
            }
            stats.total_carbon_sequestered = stats
                .total_carbon_sequestered
                .saturating_add(parse_u256(&carbon, "farms.total_carbon")?);
        }
        stats.total_credits = self.count("SELECT COUNT(*) FROM credits", None).await?;
        Ok(stats)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
