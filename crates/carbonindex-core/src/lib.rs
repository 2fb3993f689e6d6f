//! carbonindex-core: keeps an off-chain mirror of the CarbonSeal registry
//! consistent with the chain.
//!
//! # Architecture
//!
//! ```text
//! LifecycleController
//!     ├── Reconciler        (full re-pull, cursor, per-entity sync)
//!     ├── LiveListener      (chain events → per-entity handler lanes)
//!     ├── backstop timer    (periodic Reconciler::reconcile)
//!     ├── ChainReader       (trait; EVM impl in carbonindex-evm)
//!     └── MirrorStore       (trait; memory here, SQL in carbonindex-storage)
//! ```

pub mod chain;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod indexer;
pub mod lifecycle;
pub mod listener;
pub mod reconciler;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainEvent, ChainEventStream, ChainReader, EntityKey, EventKind, EventPayload};
pub use cursor::SyncCursor;
pub use error::IndexerError;
pub use handler::EventHandler;
pub use indexer::{GapPolicy, IndexerConfig, LifecycleState, ReconcileState};
pub use lifecycle::{HealthReport, LifecycleController};
pub use listener::{ListenerHandle, ListenerStats, LiveListener};
pub use reconciler::{ReadingOutcome, ReconcileOutcome, ReconcileReport, Reconciler};
pub use store::{MemoryMirrorStore, MirrorStore};
pub use types::{
    normalize_address, CarbonCredit, CarbonReading, EcosystemStats, Farm, FarmStats, Page,
    PageRequest, MAX_PAGE_LIMIT,
};

/// Unsigned 256-bit integer used for every on-chain quantity.
pub use alloy_primitives::U256;
