//! Error types for the carbonindex pipeline.

use thiserror::Error;

/// Errors that can occur while reading the chain or writing the mirror.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A row with the same natural key already exists (append-only collections).
    #[error("Duplicate {collection} key {key}")]
    DuplicateKey { collection: &'static str, key: u64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for a duplicate-key rejection, which callers treat as success.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Returns `true` if the error came from chain or store I/O and a later
    /// pass may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_not_transient() {
        let err = IndexerError::DuplicateKey {
            collection: "readings",
            key: 7,
        };
        assert!(err.is_duplicate());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Duplicate readings key 7");
    }

    #[test]
    fn io_errors_are_transient() {
        assert!(IndexerError::Rpc("connection refused".into()).is_transient());
        assert!(IndexerError::Storage("pool timed out".into()).is_transient());
        assert!(!IndexerError::Config("bad address".into()).is_transient());
    }
}
