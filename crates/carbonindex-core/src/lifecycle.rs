//! Lifecycle controller: wires the reconciler, live listener and backstop
//! timer together behind `start()` / `stop()`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::chain::ChainReader;
use crate::error::IndexerError;
use crate::handler::EventHandler;
use crate::indexer::{IndexerConfig, LifecycleState, ReconcileState};
use crate::listener::{ListenerHandle, LiveListener};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::MirrorStore;

/// Liveness snapshot for the process health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub chain_connected: bool,
    pub store_reachable: bool,
    pub state: LifecycleState,
    pub last_reconcile: ReconcileState,
    /// Cursor block, if the store could be read.
    pub last_cursor: Option<u64>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.chain_connected && self.store_reachable
    }
}

struct RunningTasks {
    listener: ListenerHandle,
    timer: JoinHandle<()>,
    timer_stop: watch::Sender<bool>,
}

/// Start/stop orchestration.
///
/// ```text
/// Stopped ──start()──▶ Starting ──initial pass ok──▶ Running
///    ▲                    │ initial pass failed          │
///    └────────────────────┘                           stop()
///    └──────────────────── Stopping ◀───────────────────┘
/// ```
pub struct LifecycleController {
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn MirrorStore>,
    reconciler: Arc<Reconciler>,
    config: IndexerConfig,
    state: Mutex<LifecycleState>,
    tasks: tokio::sync::Mutex<Option<RunningTasks>>,
}

impl LifecycleController {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn MirrorStore>,
        config: IndexerConfig,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&chain),
            Arc::clone(&store),
            config.clone(),
        ));
        Ok(Self {
            chain,
            store,
            reconciler,
            config,
            state: Mutex::new(LifecycleState::Stopped),
            tasks: tokio::sync::Mutex::new(None),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state.lock().map(|s| *s).unwrap_or(LifecycleState::Stopped)
    }

    fn set_state(&self, next: LifecycleState) {
        if let Ok(mut state) = self.state.lock() {
            let prev = *state;
            debug!(from = %prev, to = %next, "lifecycle transition");
            *state = next;
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// Run the initial pass, then start the listener and backstop timer.
    ///
    /// A no-op unless the controller is stopped. If the initial pass fails
    /// the controller returns to `Stopped` and the error is returned.
    pub async fn start(&self) -> Result<(), IndexerError> {
        let mut tasks = self.tasks.lock().await;
        if self.state() != LifecycleState::Stopped {
            debug!(state = %self.state(), "start ignored");
            return Ok(());
        }
        self.set_state(LifecycleState::Starting);
        info!("starting indexer");

        match self.reconciler.reconcile().await {
            Ok(ReconcileOutcome::Synced(report)) => {
                info!(head = report.head, "initial reconcile complete");
            }
            Ok(other) => debug!(outcome = ?other, "initial reconcile"),
            Err(e) => {
                self.set_state(LifecycleState::Stopped);
                return Err(e);
            }
        }

        let handler: Arc<dyn EventHandler> = self.reconciler.clone();
        let listener = match LiveListener::spawn(Arc::clone(&self.chain), handler, &self.config).await
        {
            Ok(listener) => listener,
            Err(e) => {
                self.set_state(LifecycleState::Stopped);
                return Err(e);
            }
        };

        let (timer_stop, stop_rx) = watch::channel(false);
        let timer = tokio::spawn(run_backstop(
            Arc::clone(&self.reconciler),
            self.config.reconcile_interval(),
            stop_rx,
        ));

        *tasks = Some(RunningTasks {
            listener,
            timer,
            timer_stop,
        });
        self.set_state(LifecycleState::Running);
        info!(
            interval_secs = self.config.reconcile_interval_secs,
            "indexer running"
        );
        Ok(())
    }

    /// Cancel the timer and unsubscribe, waiting for in-flight work to finish.
    ///
    /// Idempotent. There is no internal deadline; wrap in a timeout to bound it.
    /// Called while `start()` is still in its initial pass, this waits for that
    /// pass to end before stopping.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        let Some(running) = tasks.take() else {
            debug!("stop ignored, not running");
            return;
        };
        self.set_state(LifecycleState::Stopping);
        info!("stopping indexer");

        let _ = running.timer_stop.send(true);
        if let Err(e) = running.timer.await {
            warn!(error = %e, "backstop timer task panicked");
        }
        running.listener.stop().await;

        self.set_state(LifecycleState::Stopped);
        info!("indexer stopped");
    }

    /// Probe the chain and the store.
    pub async fn health(&self) -> HealthReport {
        let chain_connected = self.chain.is_connected().await;
        let store_reachable = self.store.health_check().await;
        let last_cursor = match self.store.load_cursor().await {
            Ok(cursor) => Some(cursor.map_or(0, |c| c.block_number)),
            Err(_) => None,
        };
        HealthReport {
            chain_connected,
            store_reachable,
            state: self.state(),
            last_reconcile: self.reconciler.state(),
            last_cursor,
        }
    }
}

/// Periodic backstop. The first tick fires one period after start.
async fn run_backstop(
    reconciler: Arc<Reconciler>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                // A pass in flight is awaited here, so stop() waits for it too.
                match reconciler.reconcile().await {
                    Ok(ReconcileOutcome::Skipped) => debug!("backstop tick skipped, pass in progress"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "backstop reconcile failed"),
                }
            }
        }
    }
    debug!("backstop timer stopped");
}
