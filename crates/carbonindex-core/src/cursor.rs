//! Sync cursor: the last block height a full reconcile completed against.

use serde::{Deserialize, Serialize};

/// Persisted position of the reconciler.
///
/// Absence of a stored cursor is equivalent to `block_number == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Block height at which the last successful pass read the chain.
    pub block_number: u64,
    /// Unix timestamp of when this cursor was saved.
    pub updated_at: i64,
}

impl SyncCursor {
    /// Create a cursor at `block_number`, stamped now.
    pub fn new(block_number: u64) -> Self {
        Self {
            block_number,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Returns `true` if a pass at `head` would find nothing new.
    pub fn is_caught_up(&self, head: u64) -> bool {
        self.block_number >= head
    }

    /// Number of blocks the mirror trails `head` by.
    pub fn lag(&self, head: u64) -> u64 {
        head.saturating_sub(self.block_number)
    }
}

impl Default for SyncCursor {
    fn default() -> Self {
        Self {
            block_number: 0,
            updated_at: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caught_up_when_at_or_past_head() {
        let cursor = SyncCursor::new(100);
        assert!(cursor.is_caught_up(100));
        assert!(cursor.is_caught_up(99)); // head reported behind a load-balanced peer
        assert!(!cursor.is_caught_up(101));
    }

    #[test]
    fn lag_saturates() {
        let cursor = SyncCursor::new(100);
        assert_eq!(cursor.lag(112), 12);
        assert_eq!(cursor.lag(50), 0);
    }

    #[test]
    fn default_is_genesis() {
        let cursor = SyncCursor::default();
        assert_eq!(cursor.block_number, 0);
        assert!(!cursor.is_caught_up(1));
    }
}
