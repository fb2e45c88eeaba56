//! Storage layer -- SQLite baseline snapshots and the filesystem object store.
//!
//! The baseline store is the only shared mutable state in the system. Writes
//! are compare-and-swap on a version number, so two processes that load the
//! same snapshot cannot silently overwrite each other: the second commit
//! fails with [`StoreError::Conflict`] and the caller reloads.

pub mod files;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use files::FsObjectStore;
pub use memory::MemoryBaselineStore;
pub use sqlite::SqliteBaselineStore;

use crate::baseline::BaselineTable;
use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object '{key}' not found")]
    NotFound { key: String },

    #[error("baseline '{key}' changed since version {expected} was read")]
    Conflict { key: String, expected: u64 },

    #[error("stored baseline '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A stored value and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Durable home of baseline snapshots.
pub trait BaselineStore: Send + Sync {
    /// Current snapshot under `key`, or `None` if nothing was stored yet.
    fn get(&self, key: &str) -> Result<Option<Versioned<BaselineTable>>, StoreError>;

    /// Store `table` under `key` if the current version is `expected_version`
    /// (`0` meaning "absent"). Returns the new version.
    fn put(&self, key: &str, table: &BaselineTable, expected_version: u64) -> Result<u64, StoreError>;
}

/// Supplies the raw tabular bytes of one incoming batch.
pub trait BatchSource: Send + Sync {
    fn fetch_batch(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Receives scored batches rendered as CSV.
pub trait BatchSink: Send + Sync {
    fn put_batch(&self, key: &str, body: &[u8]) -> Result<(), StoreError>;
}

/// Receives per-batch summaries rendered as JSON.
pub trait SummarySink: Send + Sync {
    fn put_summary(&self, key: &str, body: &[u8]) -> Result<(), StoreError>;
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}
