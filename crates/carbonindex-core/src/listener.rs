//! Live listener: routes chain events to a handler with per-entity ordering.
//!
//! One router task reads the [`ChainEventStream`] and hands each event to the
//! lane of its [`EntityKey`]. A lane is a task that applies its queue
//! sequentially, so updates to the same farm or credit land in arrival order.
//! Lanes are opened on demand and retire once their queue is empty, so a
//! handler stuck on one entity never delays another.
//!
//! Queued plus in-flight events are capped by `event_channel_capacity`; the
//! router stops reading the stream while the cap is reached.
//!
//! Stopping the listener drops the stream (which unsubscribes from the
//! chain), then lets every lane drain what is already queued.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::chain::{ChainEvent, ChainEventStream, ChainReader, EntityKey};
use crate::error::IndexerError;
use crate::handler::EventHandler;
use crate::indexer::IndexerConfig;

/// Counters snapshot for the live listener.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub events_received: u64,
    pub events_handled: u64,
    pub handler_errors: u64,
    pub stream_errors: u64,
    /// Lanes opened so far; a busy entity reuses its open lane.
    pub lanes_opened: u64,
}

type SharedStats = Arc<Mutex<ListenerStats>>;

fn bump(stats: &SharedStats, f: impl FnOnce(&mut ListenerStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}

/// An event plus its slot under the in-flight cap.
struct Queued {
    event: ChainEvent,
    _permit: OwnedSemaphorePermit,
}

/// Open lanes by entity. Senders are only used while this lock is held.
type Lanes = Arc<Mutex<HashMap<EntityKey, mpsc::UnboundedSender<Queued>>>>;

fn lock(lanes: &Lanes) -> MutexGuard<'_, HashMap<EntityKey, mpsc::UnboundedSender<Queued>>> {
    lanes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry point for starting a listener.
pub struct LiveListener;

impl LiveListener {
    /// Subscribe to `chain` and start dispatching events to `handler`.
    pub async fn spawn(
        chain: Arc<dyn ChainReader>,
        handler: Arc<dyn EventHandler>,
        config: &IndexerConfig,
    ) -> Result<ListenerHandle, IndexerError> {
        let stream = chain.subscribe().await?;
        Ok(Self::spawn_on(stream, handler, config))
    }

    /// Start dispatching from an already-open stream.
    pub fn spawn_on(
        stream: ChainEventStream,
        handler: Arc<dyn EventHandler>,
        config: &IndexerConfig,
    ) -> ListenerHandle {
        let capacity = config.event_channel_capacity.max(1);
        let stats: SharedStats = Arc::new(Mutex::new(ListenerStats::default()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let router = Router {
            handler,
            limit: Arc::new(Semaphore::new(capacity)),
            lanes: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::clone(&stats),
        };
        let router = tokio::spawn(router.run(stream, shutdown_rx));
        info!(capacity, "live listener started");

        ListenerHandle {
            shutdown: shutdown_tx,
            router,
            stats,
        }
    }
}

/// Owns the listener's tasks.
pub struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    router: JoinHandle<()>,
    stats: SharedStats,
}

impl ListenerHandle {
    pub fn stats(&self) -> ListenerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// `true` once the router and every lane have exited.
    pub fn is_finished(&self) -> bool {
        self.router.is_finished()
    }

    /// Unsubscribe and wait for queued events to finish.
    pub async fn stop(self) -> ListenerStats {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.router.await {
            warn!(error = %e, "listener router task panicked");
        }
        let stats = self.stats.lock().map(|s| s.clone()).unwrap_or_default();
        info!(
            received = stats.events_received,
            handled = stats.events_handled,
            errors = stats.handler_errors,
            lanes = stats.lanes_opened,
            "live listener stopped"
        );
        stats
    }
}

struct Router {
    handler: Arc<dyn EventHandler>,
    limit: Arc<Semaphore>,
    lanes: Lanes,
    stats: SharedStats,
}

impl Router {
    async fn run(self, mut stream: ChainEventStream, mut shutdown: watch::Receiver<bool>) {
        let mut workers = JoinSet::new();
        let mut permit = None;

        loop {
            if permit.is_none() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    acquired = Arc::clone(&self.limit).acquire_owned() => match acquired {
                        Ok(p) => permit = Some(p),
                        Err(_) => break,
                    },
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    debug!("listener shutdown requested");
                    break;
                }
                Some(done) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = done {
                        warn!(error = %e, "listener lane panicked");
                    }
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        bump(&self.stats, |s| s.events_received += 1);
                        if let Some(permit) = permit.take() {
                            self.dispatch(&mut workers, event, permit);
                        }
                    }
                    Some(Err(e)) => {
                        bump(&self.stats, |s| s.stream_errors += 1);
                        warn!(error = %e, "event stream error");
                    }
                    None => {
                        warn!("event stream ended");
                        break;
                    }
                }
            }
        }

        // Unsubscribe first, then let the open lanes drain.
        drop(stream);
        while let Some(done) = workers.join_next().await {
            if let Err(e) = done {
                warn!(error = %e, "listener lane panicked");
            }
        }
        debug!("listener lanes drained");
    }

    fn dispatch(&self, workers: &mut JoinSet<()>, event: ChainEvent, permit: OwnedSemaphorePermit) {
        let key = event.entity();
        let queued = Queued {
            event,
            _permit: permit,
        };

        let mut open = lock(&self.lanes);
        let queued = match open.get(&key) {
            Some(tx) => match tx.send(queued) {
                Ok(()) => return,
                // The lane died without retiring (handler panic); open a new one.
                Err(mpsc::error::SendError(queued)) => queued,
            },
            None => queued,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(queued).is_err() {
            return;
        }
        open.insert(key, tx);
        drop(open);

        bump(&self.stats, |s| s.lanes_opened += 1);
        workers.spawn(run_lane(
            key,
            rx,
            Arc::clone(&self.lanes),
            Arc::clone(&self.handler),
            Arc::clone(&self.stats),
        ));
    }
}

/// Apply one entity's events in order, then retire.
async fn run_lane(
    key: EntityKey,
    mut rx: mpsc::UnboundedReceiver<Queued>,
    lanes: Lanes,
    handler: Arc<dyn EventHandler>,
    stats: SharedStats,
) {
    loop {
        let queued = match rx.try_recv() {
            Ok(queued) => queued,
            Err(_) => {
                let mut open = lock(&lanes);
                match rx.try_recv() {
                    Ok(queued) => queued,
                    Err(_) => {
                        open.remove(&key);
                        break;
                    }
                }
            }
        };

        let event = &queued.event;
        match handler.handle(event).await {
            Ok(()) => bump(&stats, |s| s.events_handled += 1),
            Err(e) => {
                bump(&stats, |s| s.handler_errors += 1);
                warn!(
                    entity = ?key,
                    kind = %event.kind(),
                    block = event.block_number,
                    error = %e,
                    "event handler failed"
                );
            }
        }
    }
    debug!(entity = ?key, "listener lane retired");
}
