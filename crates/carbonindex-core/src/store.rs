//! Mirror store trait and the in-memory backend.
//!
//! Backends persist four collections: farms, readings, credits and the
//! singleton sync cursor. Farms and credits are upserted by natural id (last
//! write wins); readings are append-only and reject duplicate ids with
//! [`IndexerError::DuplicateKey`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::cursor::SyncCursor;
use crate::error::IndexerError;
use crate::types::{
    normalize_address, paginate, CarbonCredit, CarbonReading, EcosystemStats, Farm, Page,
    PageRequest,
};

/// Persistence for the off-chain mirror.
///
/// Implementations: [`MemoryMirrorStore`] here, `SqliteMirror` and
/// `PostgresMirror` in `carbonindex-storage`.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    // ── writes ──

    /// Insert or replace the farm row keyed by `farm.id`.
    async fn upsert_farm(&self, farm: &Farm) -> Result<(), IndexerError>;

    /// Append a reading. Fails with `DuplicateKey` if the id already exists.
    async fn insert_reading(&self, reading: &CarbonReading) -> Result<(), IndexerError>;

    /// Insert or replace the credit row keyed by `credit.token_id`.
    async fn upsert_credit(&self, credit: &CarbonCredit) -> Result<(), IndexerError>;

    async fn load_cursor(&self) -> Result<Option<SyncCursor>, IndexerError>;

    /// Persist the cursor. A lower block number than the stored one is ignored.
    async fn save_cursor(&self, cursor: SyncCursor) -> Result<(), IndexerError>;

    // ── reads ──

    async fn get_farm(&self, farm_id: u64) -> Result<Option<Farm>, IndexerError>;

    /// Case-insensitive owner lookup.
    async fn get_farm_by_owner(&self, owner: &str) -> Result<Option<Farm>, IndexerError>;

    /// Newest farms first.
    async fn list_farms(&self, page: PageRequest) -> Result<Page<Farm>, IndexerError>;

    /// Newest readings first.
    async fn list_readings(
        &self,
        farm_id: u64,
        page: PageRequest,
    ) -> Result<Page<CarbonReading>, IndexerError>;

    async fn get_credit(&self, token_id: u64) -> Result<Option<CarbonCredit>, IndexerError>;

    /// Newest credits first.
    async fn list_credits(&self, page: PageRequest) -> Result<Page<CarbonCredit>, IndexerError>;

    async fn list_credits_by_owner(
        &self,
        owner: &str,
        page: PageRequest,
    ) -> Result<Page<CarbonCredit>, IndexerError>;

    async fn list_credits_by_farm(
        &self,
        farm_id: u64,
        page: PageRequest,
    ) -> Result<Page<CarbonCredit>, IndexerError>;

    async fn ecosystem_stats(&self) -> Result<EcosystemStats, IndexerError>;

    /// Minimal read. `false` on any error.
    async fn health_check(&self) -> bool;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Collections {
    farms: BTreeMap<u64, Farm>,
    readings: BTreeMap<u64, CarbonReading>,
    credits: BTreeMap<u64, CarbonCredit>,
    cursor: Option<SyncCursor>,
}

/// In-memory mirror for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryMirrorStore {
    data: Mutex<Collections>,
    writes: AtomicU64,
    unavailable: AtomicBool,
    reject_readings: AtomicBool,
}

impl MemoryMirrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful write calls so far.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with a storage error (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make reading inserts alone fail with a storage error.
    pub fn set_reject_readings(&self, reject: bool) {
        self.reject_readings.store(reject, Ordering::SeqCst);
    }

    pub fn farm_count(&self) -> usize {
        self.data.lock().map(|d| d.farms.len()).unwrap_or(0)
    }

    pub fn reading_count(&self) -> usize {
        self.data.lock().map(|d| d.readings.len()).unwrap_or(0)
    }

    pub fn credit_count(&self) -> usize {
        self.data.lock().map(|d| d.credits.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Collections>, IndexerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IndexerError::Storage("memory store unavailable".into()));
        }
        self.data
            .lock()
            .map_err(|_| IndexerError::Storage("memory store lock poisoned".into()))
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

fn farms_newest_first(farms: &BTreeMap<u64, Farm>) -> Vec<Farm> {
    let mut rows: Vec<Farm> = farms.values().cloned().collect();
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    rows
}

fn credits_newest_first<'a>(credits: impl Iterator<Item = &'a CarbonCredit>) -> Vec<CarbonCredit> {
    let mut rows: Vec<CarbonCredit> = credits.cloned().collect();
    rows.sort_by(|a, b| b.minted_at.cmp(&a.minted_at).then(b.token_id.cmp(&a.token_id)));
    rows
}

#[async_trait]
impl MirrorStore for MemoryMirrorStore {
    async fn upsert_farm(&self, farm: &Farm) -> Result<(), IndexerError> {
        let mut farm = farm.clone();
        farm.owner = normalize_address(&farm.owner);
        self.lock()?.farms.insert(farm.id, farm);
        self.wrote();
        Ok(())
    }

    async fn insert_reading(&self, reading: &CarbonReading) -> Result<(), IndexerError> {
        if self.reject_readings.load(Ordering::SeqCst) {
            return Err(IndexerError::Storage("readings table is read-only".into()));
        }
        let mut data = self.lock()?;
        if data.readings.contains_key(&reading.id) {
            return Err(IndexerError::DuplicateKey {
                collection: "readings",
                key: reading.id,
            });
        }
        let mut reading = reading.clone();
        reading.verified_by = normalize_address(&reading.verified_by);
        data.readings.insert(reading.id, reading);
        drop(data);
        self.wrote();
        Ok(())
    }

    async fn upsert_credit(&self, credit: &CarbonCredit) -> Result<(), IndexerError> {
        let mut credit = credit.clone();
        credit.farmer = normalize_address(&credit.farmer);
        self.lock()?.credits.insert(credit.token_id, credit);
        self.wrote();
        Ok(())
    }

    async fn load_cursor(&self) -> Result<Option<SyncCursor>, IndexerError> {
        Ok(self.lock()?.cursor)
    }

    async fn save_cursor(&self, cursor: SyncCursor) -> Result<(), IndexerError> {
        let mut data = self.lock()?;
        match data.cursor {
            Some(current) if current.block_number > cursor.block_number => {}
            _ => data.cursor = Some(cursor),
        }
        drop(data);
        self.wrote();
        Ok(())
    }

    async fn get_farm(&self, farm_id: u64) -> Result<Option<Farm>, IndexerError> {
        Ok(self.lock()?.farms.get(&farm_id).cloned())
    }

    async fn get_farm_by_owner(&self, owner: &str) -> Result<Option<Farm>, IndexerError> {
        let owner = normalize_address(owner);
        Ok(self.lock()?.farms.values().find(|f| f.owner == owner).cloned())
    }

    async fn list_farms(&self, page: PageRequest) -> Result<Page<Farm>, IndexerError> {
        let rows = farms_newest_first(&self.lock()?.farms);
        Ok(paginate(&rows, page))
    }

    async fn list_readings(
        &self,
        farm_id: u64,
        page: PageRequest,
    ) -> Result<Page<CarbonReading>, IndexerError> {
        let mut rows: Vec<CarbonReading> = self
            .lock()?
            .readings
            .values()
            .filter(|r| r.farm_id == farm_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(paginate(&rows, page))
    }

    async fn get_credit(&self, token_id: u64) -> Result<Option<CarbonCredit>, IndexerError> {
        Ok(self.lock()?.credits.get(&token_id).cloned())
    }

    async fn list_credits(&self, page: PageRequest) -> Result<Page<CarbonCredit>, IndexerError> {
        let rows = credits_newest_first(self.lock()?.credits.values());
        Ok(paginate(&rows, page))
    }

    async fn list_credits_by_owner(
        &self,
        owner: &str,
        page: PageRequest,
    ) -> Result<Page<CarbonCredit>, IndexerError> {
        let owner = normalize_address(owner);
        let rows = credits_newest_first(self.lock()?.credits.values().filter(|c| c.farmer == owner));
        Ok(paginate(&rows, page))
    }

    async fn list_credits_by_farm(
        &self,
        farm_id: u64,
        page: PageRequest,
    ) -> Result<Page<CarbonCredit>, IndexerError> {
        let rows =
            credits_newest_first(self.lock()?.credits.values().filter(|c| c.farm_id == farm_id));
        Ok(paginate(&rows, page))
    }

    async fn ecosystem_stats(&self) -> Result<EcosystemStats, IndexerError> {
        let data = self.lock()?;
        let mut stats = EcosystemStats::default();
        for farm in data.farms.values() {
            stats.add_farm(farm);
        }
        stats.total_credits = data.credits.len() as u64;
        Ok(stats)
    }

    async fn health_check(&self) -> bool {
        self.lock().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_credit, sample_farm, sample_reading};
    use alloy_primitives::U256;

    #[tokio::test]
    async fn upsert_farm_is_idempotent() {
        let store = MemoryMirrorStore::new();
        let farm = sample_farm(1);
        store.upsert_farm(&farm).await.unwrap();
        store.upsert_farm(&farm).await.unwrap();

        assert_eq!(store.farm_count(), 1);
        assert_eq!(store.get_farm(1).await.unwrap(), Some(farm));
    }

    #[tokio::test]
    async fn upsert_farm_last_write_wins() {
        let store = MemoryMirrorStore::new();
        let mut farm = sample_farm(1);
        store.upsert_farm(&farm).await.unwrap();
        farm.carbon_debt = U256::from(7u64);
        store.upsert_farm(&farm).await.unwrap();

        let stored = store.get_farm(1).await.unwrap().unwrap();
        assert_eq!(stored.carbon_debt, U256::from(7u64));
    }

    #[tokio::test]
    async fn duplicate_reading_rejected() {
        let store = MemoryMirrorStore::new();
        let reading = sample_reading(1, 10);
        store.insert_reading(&reading).await.unwrap();

        let err = store.insert_reading(&reading).await.unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.reading_count(), 1);
    }

    #[tokio::test]
    async fn cursor_never_moves_backward() {
        let store = MemoryMirrorStore::new();
        assert!(store.load_cursor().await.unwrap().is_none());

        store.save_cursor(SyncCursor::new(200)).await.unwrap();
        store.save_cursor(SyncCursor::new(150)).await.unwrap();
        assert_eq!(store.load_cursor().await.unwrap().unwrap().block_number, 200);

        store.save_cursor(SyncCursor::new(250)).await.unwrap();
        assert_eq!(store.load_cursor().await.unwrap().unwrap().block_number, 250);
    }

    #[tokio::test]
    async fn owner_lookup_ignores_case() {
        let store = MemoryMirrorStore::new();
        let mut farm = sample_farm(1);
        farm.owner = "0xABCDEF0000000000000000000000000000000001".into();
        store.upsert_farm(&farm).await.unwrap();

        let found = store
            .get_farm_by_owner("0xabcdef0000000000000000000000000000000001")
            .await
            .unwrap();
        assert_eq!(found.map(|f| f.id), Some(1));
    }

    #[tokio::test]
    async fn lists_are_newest_first_and_paginated() {
        let store = MemoryMirrorStore::new();
        for id in 1..=5 {
            let mut credit = sample_credit(id, 1);
            credit.minted_at = 1_000 + id;
            store.upsert_credit(&credit).await.unwrap();
        }

        let page = store.list_credits(PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.pages(), 3);
        let ids: Vec<u64> = page.data.iter().map(|c| c.token_id).collect();
        assert_eq!(ids, vec![5, 4]);

        let by_farm = store.list_credits_by_farm(2, PageRequest::default()).await.unwrap();
        assert_eq!(by_farm.total, 0);
    }

    #[tokio::test]
    async fn readings_listed_per_farm() {
        let store = MemoryMirrorStore::new();
        store.insert_reading(&sample_reading(1, 1)).await.unwrap();
        store.insert_reading(&sample_reading(1, 2)).await.unwrap();
        store.insert_reading(&sample_reading(2, 3)).await.unwrap();

        let page = store.list_readings(1, PageRequest::default()).await.unwrap();
        let ids: Vec<u64> = page.data.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn stats_cover_farms_and_credits() {
        let store = MemoryMirrorStore::new();
        store.upsert_farm(&sample_farm(1)).await.unwrap();
        let mut inactive = sample_farm(2);
        inactive.is_active = false;
        store.upsert_farm(&inactive).await.unwrap();
        store.upsert_credit(&sample_credit(1, 1)).await.unwrap();

        let stats = store.ecosystem_stats().await.unwrap();
        assert_eq!(stats.total_farms, 2);
        assert_eq!(stats.active_farms, 1);
        assert_eq!(stats.total_credits, 1);
        assert_eq!(
            stats.total_carbon_sequestered,
            sample_farm(1).total_carbon + inactive.total_carbon
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails_health() {
        let store = MemoryMirrorStore::new();
        assert!(store.health_check().await);

        store.set_unavailable(true);
        assert!(!store.health_check().await);
        assert!(store.get_farm(1).await.unwrap_err().is_transient());
    }
}
