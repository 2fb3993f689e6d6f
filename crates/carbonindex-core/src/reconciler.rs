//! Reconciler: pulls registry state from the chain into the mirror.
//!
//! A full pass re-reads every farm, its recent readings and every credit,
//! then advances the cursor to the head observed at the start of the pass.
//! Writes are idempotent, so a pass may overlap with live event handling and
//! both converge on the chain's state.
//!
//! Only one pass runs at a time. A trigger that arrives while a pass is in
//! flight returns [`ReconcileOutcome::Skipped`] immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainEvent, ChainReader, EventPayload};
use crate::cursor::SyncCursor;
use crate::error::IndexerError;
use crate::handler::EventHandler;
use crate::indexer::{GapPolicy, IndexerConfig, ReconcileState};
use crate::store::MirrorStore;

/// Counters for one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Cursor before the pass.
    pub from_block: u64,
    /// Chain head the pass read against; the new cursor.
    pub head: u64,
    pub farms_written: u64,
    pub farm_gaps: u64,
    pub readings_inserted: u64,
    pub duplicate_readings: u64,
    pub credits_written: u64,
    pub credit_gaps: u64,
    /// Credits stored with an empty metadata URI because `tokenURI` failed.
    pub uri_fallbacks: u64,
    pub elapsed: Duration,
}

/// Result of a [`Reconciler::reconcile`] trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another pass was already running.
    Skipped,
    /// The cursor was already at or past the head. Nothing was written.
    CaughtUp { cursor: u64, head: u64 },
    Synced(ReconcileReport),
}

/// Result of a targeted reading sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingOutcome {
    Inserted,
    /// Already mirrored.
    Duplicate,
    /// The farm's latest reading was not the one asked for.
    NotFound,
}

/// Clears the in-progress flag when the pass ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn MirrorStore>,
    config: IndexerConfig,
    in_progress: AtomicBool,
    state: Mutex<ReconcileState>,
}

impl Reconciler {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn MirrorStore>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            chain,
            store,
            config,
            in_progress: AtomicBool::new(false),
            state: Mutex::new(ReconcileState::Idle),
        }
    }

    pub fn state(&self) -> ReconcileState {
        self.state.lock().map(|s| *s).unwrap_or(ReconcileState::Failed)
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn set_state(&self, next: ReconcileState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Run one full pass unless one is already in flight.
    ///
    /// On error the cursor is left where it was, so the next trigger repeats
    /// the work.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, IndexerError> {
        let Some(_guard) = RunGuard::try_acquire(&self.in_progress) else {
            debug!("reconcile already in progress, dropping trigger");
            return Ok(ReconcileOutcome::Skipped);
        };

        self.set_state(ReconcileState::Syncing);
        let result = self.run_pass().await;
        match &result {
            Ok(_) => self.set_state(ReconcileState::Succeeded),
            Err(e) => {
                error!(error = %e, "reconcile pass failed");
                self.set_state(ReconcileState::Failed);
            }
        }
        result
    }

    async fn run_pass(&self) -> Result<ReconcileOutcome, IndexerError> {
        let started = Instant::now();
        let cursor = self.store.load_cursor().await?.unwrap_or_default();
        let head = self.chain.get_block_number().await?;

        if cursor.is_caught_up(head) {
            debug!(cursor = cursor.block_number, head, "mirror already caught up");
            return Ok(ReconcileOutcome::CaughtUp {
                cursor: cursor.block_number,
                head,
            });
        }

        info!(from = cursor.block_number, head, lag = cursor.lag(head), "reconcile pass started");
        let mut report = ReconcileReport {
            from_block: cursor.block_number,
            head,
            ..Default::default()
        };

        self.sync_all_farms(&mut report).await?;
        self.sync_all_credits(&mut report).await?;
        self.store.save_cursor(SyncCursor::new(head)).await?;

        report.elapsed = started.elapsed();
        info!(
            head,
            farms = report.farms_written,
            farm_gaps = report.farm_gaps,
            readings = report.readings_inserted,
            duplicates = report.duplicate_readings,
            credits = report.credits_written,
            credit_gaps = report.credit_gaps,
            uri_fallbacks = report.uri_fallbacks,
            elapsed_ms = millis(report.elapsed),
            "reconcile pass complete"
        );
        Ok(ReconcileOutcome::Synced(report))
    }

    async fn sync_all_farms(&self, report: &mut ReconcileReport) -> Result<(), IndexerError> {
        let total = self.chain.get_total_farms().await?;
        debug!(total, "syncing farms");

        for farm_id in 1..=total {
            let Some(farm) = self.chain.get_farm(farm_id).await? else {
                self.on_gap("farm", farm_id)?;
                report.farm_gaps += 1;
                continue;
            };
            self.store.upsert_farm(&farm).await?;
            report.farms_written += 1;

            let readings = self
                .chain
                .get_recent_readings(farm_id, self.config.recent_readings_depth)
                .await?;
            for reading in &readings {
                match self.store.insert_reading(reading).await {
                    Ok(()) => report.readings_inserted += 1,
                    Err(e) if e.is_duplicate() => report.duplicate_readings += 1,
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    async fn sync_all_credits(&self, report: &mut ReconcileReport) -> Result<(), IndexerError> {
        let total = self.chain.get_total_credits().await?;
        debug!(total, "syncing credits");

        for token_id in 1..=total {
            let Some(mut credit) = self.chain.get_credit_details(token_id).await? else {
                self.on_gap("credit", token_id)?;
                report.credit_gaps += 1;
                continue;
            };
            let (uri, fell_back) = self.token_uri_or_empty(token_id).await;
            credit.token_uri = uri;
            if fell_back {
                report.uri_fallbacks += 1;
            }
            self.store.upsert_credit(&credit).await?;
            report.credits_written += 1;
        }
        Ok(())
    }

    fn on_gap(&self, collection: &'static str, id: u64) -> Result<(), IndexerError> {
        match self.config.gap_policy {
            GapPolicy::Skip => {
                warn!(collection, id, "id not found on chain, skipping");
                Ok(())
            }
            GapPolicy::Abort => Err(IndexerError::Aborted {
                reason: format!("{collection} {id} not found on chain"),
            }),
        }
    }

    async fn token_uri_or_empty(&self, token_id: u64) -> (String, bool) {
        match self.chain.get_token_uri(token_id).await {
            Ok(uri) => (uri, false),
            Err(e) => {
                debug!(token_id, error = %e, "tokenURI unavailable, storing empty");
                (String::new(), true)
            }
        }
    }

    // ── targeted updates ──

    /// Re-read one farm and upsert it. `false` if the chain has no such farm.
    pub async fn sync_farm(&self, farm_id: u64) -> Result<bool, IndexerError> {
        match self.chain.get_farm(farm_id).await? {
            Some(farm) => {
                self.store.upsert_farm(&farm).await?;
                debug!(farm_id, "farm synced");
                Ok(true)
            }
            None => {
                debug!(farm_id, "farm not found on chain");
                Ok(false)
            }
        }
    }

    /// Fetch the farm's latest reading and insert it if it is `reading_id`.
    pub async fn sync_latest_reading(
        &self,
        farm_id: u64,
        reading_id: u64,
    ) -> Result<ReadingOutcome, IndexerError> {
        let latest = self.chain.get_recent_readings(farm_id, 1).await?;
        let Some(reading) = latest.into_iter().find(|r| r.id == reading_id) else {
            debug!(farm_id, reading_id, "reading not the latest on chain");
            return Ok(ReadingOutcome::NotFound);
        };
        match self.store.insert_reading(&reading).await {
            Ok(()) => {
                debug!(farm_id, reading_id, "reading inserted");
                Ok(ReadingOutcome::Inserted)
            }
            Err(e) if e.is_duplicate() => Ok(ReadingOutcome::Duplicate),
            Err(e) => Err(e),
        }
    }

    /// Re-read one credit plus its metadata URI and upsert it.
    pub async fn sync_credit(&self, token_id: u64) -> Result<bool, IndexerError> {
        let Some(mut credit) = self.chain.get_credit_details(token_id).await? else {
            debug!(token_id, "credit not found on chain");
            return Ok(false);
        };
        credit.token_uri = self.token_uri_or_empty(token_id).await.0;
        self.store.upsert_credit(&credit).await?;
        debug!(token_id, retired = credit.is_retired, "credit synced");
        Ok(true)
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event: &ChainEvent) -> Result<(), IndexerError> {
        debug!(kind = %event.kind(), block = event.block_number, "handling event");
        match &event.payload {
            EventPayload::FarmRegistered { farm_id, .. }
            | EventPayload::CarbonDebtUpdated { farm_id, .. } => {
                self.sync_farm(*farm_id).await?;
            }
            EventPayload::CarbonAdded {
                farm_id,
                reading_id,
                ..
            } => {
                self.sync_latest_reading(*farm_id, *reading_id).await?;
                self.sync_farm(*farm_id).await?;
            }
            EventPayload::CreditMinted { token_id, .. }
            | EventPayload::CreditRetired { token_id, .. } => {
                self.sync_credit(*token_id).await?;
            }
        }
        Ok(())
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
