//! carbonindex-storage: SQL backends for the CarbonSeal mirror.
//!
//! Backends:
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//! - [`postgres`]: PostgreSQL via `sqlx` (shared deployments)
//!
//! The in-memory backend lives in `carbonindex-core` as
//! [`MemoryMirrorStore`]. [`open_mirror`] picks one from a URL.

use std::sync::Arc;

use carbonindex_core::{IndexerError, MemoryMirrorStore, MirrorStore};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod rows;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresMirror;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteMirror;

/// Backend selected by a database URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Sqlite,
    Postgres,
}

impl BackendKind {
    /// `memory`, `sqlite:<path>` or `postgres://…` / `postgresql://…`.
    pub fn from_url(url: &str) -> Result<Self, IndexerError> {
        let url = url.trim();
        if url.is_empty() || url == "memory" || url.starts_with("memory:") {
            Ok(Self::Memory)
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else {
            Err(IndexerError::Config(format!(
                "unsupported database url '{url}' (expected memory, sqlite:<path> or postgres://…)"
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
        }
    }
}

/// Open the mirror named by `url`, creating its schema if needed.
pub async fn open_mirror(url: &str) -> Result<Arc<dyn MirrorStore>, IndexerError> {
    match BackendKind::from_url(url)? {
        BackendKind::Memory => Ok(Arc::new(MemoryMirrorStore::new())),
        BackendKind::Sqlite => open_sqlite(url).await,
        BackendKind::Postgres => open_postgres(url).await,
    }
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(url: &str) -> Result<Arc<dyn MirrorStore>, IndexerError> {
    if url.trim() == "sqlite::memory:" {
        return Ok(Arc::new(SqliteMirror::in_memory().await?));
    }
    Ok(Arc::new(SqliteMirror::open(url.trim()).await?))
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_url: &str) -> Result<Arc<dyn MirrorStore>, IndexerError> {
    Err(IndexerError::Config("built without the `sqlite` feature".into()))
}

#[cfg(feature = "postgres")]
async fn open_postgres(url: &str) -> Result<Arc<dyn MirrorStore>, IndexerError> {
    Ok(Arc::new(PostgresMirror::connect(url.trim()).await?))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_url: &str) -> Result<Arc<dyn MirrorStore>, IndexerError> {
    Err(IndexerError::Config("built without the `postgres` feature".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_url() {
        assert_eq!(BackendKind::from_url("memory").unwrap(), BackendKind::Memory);
        assert_eq!(BackendKind::from_url("sqlite:./m.db").unwrap(), BackendKind::Sqlite);
        assert_eq!(
            BackendKind::from_url("postgresql://u@localhost/db").unwrap(),
            BackendKind::Postgres
        );
        assert!(matches!(
            BackendKind::from_url("mysql://localhost"),
            Err(IndexerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn memory_url_opens_healthy_store() {
        let store = open_mirror("memory").await.unwrap();
        assert!(store.health_check().await);
        assert!(store.load_cursor().await.unwrap().is_none());
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_memory_url_opens() {
        let store = open_mirror("sqlite::memory:").await.unwrap();
        assert!(store.health_check().await);
    }
}
