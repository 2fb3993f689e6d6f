//! Programmable chain reader for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{B256, U256};
use async_trait::async_trait;
use tokio::sync::{mpsc, Notify, Semaphore};

use crate::chain::{ChainEvent, ChainEventStream, ChainReader};
use crate::error::IndexerError;
use crate::types::{CarbonCredit, CarbonReading, Farm, FarmStats};

pub(crate) fn address(n: u64) -> String {
    format!("0x{n:040x}")
}

pub(crate) fn sample_farm(id: u64) -> Farm {
    Farm {
        id,
        owner: address(id),
        name: format!("Farm {id}"),
        area: U256::from(100u64),
        location: "Nairobi".into(),
        soil_type: "clay".into(),
        total_carbon: U256::from(1_000u64 * id),
        carbon_debt: U256::from(100u64),
        last_reading_at: 1_700_000_000 + id,
        is_active: true,
        created_at: 1_690_000_000 + id,
    }
}

pub(crate) fn sample_reading(farm_id: u64, id: u64) -> CarbonReading {
    CarbonReading {
        id,
        farm_id,
        amount: U256::from(25u64),
        source: "sensor".into(),
        verification_hash: format!("0x{id:064x}"),
        timestamp: 1_700_000_000 + id,
        verified_by: address(900),
    }
}

pub(crate) fn sample_credit(token_id: u64, farm_id: u64) -> CarbonCredit {
    CarbonCredit {
        token_id,
        farm_id,
        farmer: address(farm_id),
        carbon_amount: U256::from(50u64),
        methodology: "VM0042".into(),
        vintage: 1_672_531_200,
        minted_at: 1_700_100_000 + token_id,
        is_retired: false,
        retired_at: None,
        retirement_reason: None,
        token_uri: String::new(),
    }
}

#[derive(Default)]
struct State {
    farms: BTreeMap<u64, Farm>,
    total_farms: Option<u64>,
    /// Oldest first per farm.
    readings: BTreeMap<u64, Vec<CarbonReading>>,
    credits: BTreeMap<u64, CarbonCredit>,
    total_credits: Option<u64>,
    uris: HashMap<u64, String>,
    failing_farms: HashSet<u64>,
    failing_credits: HashSet<u64>,
    failing_uris: HashSet<u64>,
}

/// In-memory [`ChainReader`] with error injection and a pass gate.
#[derive(Default)]
pub(crate) struct FakeChain {
    head: AtomicU64,
    head_down: AtomicBool,
    state: Mutex<State>,
    events: Mutex<Option<mpsc::UnboundedSender<Result<ChainEvent, IndexerError>>>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    pub(crate) gate_entered: Notify,
    pub(crate) farm_reads: AtomicU64,
}

impl FakeChain {
    pub(crate) fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.set_head(head);
        chain
    }

    pub(crate) fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub(crate) fn set_head_down(&self, down: bool) {
        self.head_down.store(down, Ordering::SeqCst);
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn put_farm(&self, farm: Farm) {
        self.state().farms.insert(farm.id, farm);
    }

    /// Override `getTotalFarms` independently of the stored farms.
    pub(crate) fn set_total_farms(&self, total: u64) {
        self.state().total_farms = Some(total);
    }

    pub(crate) fn push_reading(&self, reading: CarbonReading) {
        self.state().readings.entry(reading.farm_id).or_default().push(reading);
    }

    pub(crate) fn put_credit(&self, credit: CarbonCredit) {
        self.state().credits.insert(credit.token_id, credit);
    }

    pub(crate) fn set_total_credits(&self, total: u64) {
        self.state().total_credits = Some(total);
    }

    pub(crate) fn set_token_uri(&self, token_id: u64, uri: &str) {
        self.state().uris.insert(token_id, uri.to_string());
    }

    pub(crate) fn fail_farm(&self, farm_id: u64) {
        self.state().failing_farms.insert(farm_id);
    }

    pub(crate) fn heal_farm(&self, farm_id: u64) {
        self.state().failing_farms.remove(&farm_id);
    }

    pub(crate) fn fail_credit(&self, token_id: u64) {
        self.state().failing_credits.insert(token_id);
    }

    pub(crate) fn fail_token_uri(&self, token_id: u64) {
        self.state().failing_uris.insert(token_id);
    }

    /// Block the next `get_total_farms` call until [`FakeChain::release`].
    pub(crate) fn hold_passes(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(1024);
        }
    }

    /// Push an event to the current subscriber. Returns `false` if nobody listens.
    pub(crate) fn emit(&self, event: ChainEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(Ok(event)).is_ok(),
            None => false,
        }
    }

    pub(crate) fn emit_error(&self, err: IndexerError) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(Err(err)).is_ok(),
            None => false,
        }
    }

    /// `true` while a subscriber holds the stream.
    pub(crate) fn subscribed(&self) -> bool {
        self.events
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    fn rpc_down(what: &str, id: u64) -> IndexerError {
        IndexerError::Rpc(format!("{what} {id}: connection reset"))
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn get_block_number(&self) -> Result<u64, IndexerError> {
        if self.head_down.load(Ordering::SeqCst) {
            return Err(IndexerError::Rpc("connection refused".into()));
        }
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn get_total_farms(&self) -> Result<u64, IndexerError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.gate_entered.notify_one();
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| IndexerError::Other("gate closed".into()))?;
        }
        let state = self.state();
        Ok(state.total_farms.unwrap_or(state.farms.len() as u64))
    }

    async fn get_farm(&self, farm_id: u64) -> Result<Option<Farm>, IndexerError> {
        self.farm_reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state();
        if state.failing_farms.contains(&farm_id) {
            return Err(Self::rpc_down("farm", farm_id));
        }
        Ok(state.farms.get(&farm_id).cloned())
    }

    async fn get_farm_by_address(&self, owner: &str) -> Result<Option<Farm>, IndexerError> {
        let owner = owner.to_ascii_lowercase();
        Ok(self.state().farms.values().find(|f| f.owner == owner).cloned())
    }

    async fn get_available_carbon(&self, farm_id: u64) -> Result<U256, IndexerError> {
        Ok(self
            .state()
            .farms
            .get(&farm_id)
            .map(Farm::available_carbon)
            .unwrap_or(U256::ZERO))
    }

    async fn get_farm_stats(&self, farm_id: u64) -> Result<Option<FarmStats>, IndexerError> {
        let state = self.state();
        Ok(state.farms.get(&farm_id).map(|farm| FarmStats {
            total_carbon: farm.total_carbon,
            carbon_debt: farm.carbon_debt,
            available_carbon: farm.available_carbon(),
            reading_count: state.readings.get(&farm_id).map_or(0, |r| r.len() as u64),
            credit_count: state.credits.values().filter(|c| c.farm_id == farm_id).count() as u64,
            last_update: farm.last_reading_at,
        }))
    }

    async fn get_recent_readings(
        &self,
        farm_id: u64,
        count: u32,
    ) -> Result<Vec<CarbonReading>, IndexerError> {
        Ok(self
            .state()
            .readings
            .get(&farm_id)
            .map(|r| r.iter().rev().take(count as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_active_farmers(&self) -> Result<Vec<String>, IndexerError> {
        Ok(self
            .state()
            .farms
            .values()
            .filter(|f| f.is_active)
            .map(|f| f.owner.clone())
            .collect())
    }

    async fn get_total_credits(&self) -> Result<u64, IndexerError> {
        let state = self.state();
        Ok(state.total_credits.unwrap_or(state.credits.len() as u64))
    }

    async fn get_credit_details(
        &self,
        token_id: u64,
    ) -> Result<Option<CarbonCredit>, IndexerError> {
        let state = self.state();
        if state.failing_credits.contains(&token_id) {
            return Err(Self::rpc_down("credit", token_id));
        }
        Ok(state.credits.get(&token_id).cloned().map(|mut c| {
            c.token_uri = String::new();
            c
        }))
    }

    async fn get_farm_credits(&self, farm_id: u64) -> Result<Vec<u64>, IndexerError> {
        Ok(self
            .state()
            .credits
            .values()
            .filter(|c| c.farm_id == farm_id)
            .map(|c| c.token_id)
            .collect())
    }

    async fn get_owner_credits(&self, owner: &str) -> Result<Vec<u64>, IndexerError> {
        let owner = owner.to_ascii_lowercase();
        Ok(self
            .state()
            .credits
            .values()
            .filter(|c| c.farmer == owner)
            .map(|c| c.token_id)
            .collect())
    }

    async fn get_token_uri(&self, token_id: u64) -> Result<String, IndexerError> {
        let state = self.state();
        if state.failing_uris.contains(&token_id) {
            return Err(Self::rpc_down("tokenURI", token_id));
        }
        Ok(state.uris.get(&token_id).cloned().unwrap_or_default())
    }

    async fn get_token_owner(&self, token_id: u64) -> Result<Option<String>, IndexerError> {
        Ok(self.state().credits.get(&token_id).map(|c| c.farmer.clone()))
    }

    async fn get_carbon_price(&self) -> Result<U256, IndexerError> {
        Ok(U256::from(25_000_000u64))
    }

    async fn is_proof_verified(&self, _proof_hash: B256) -> Result<bool, IndexerError> {
        Ok(true)
    }

    async fn subscribe(&self) -> Result<ChainEventStream, IndexerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}
