//! SQLite-backed baseline snapshots with optimistic versioning.

use crate::baseline::BaselineTable;
use crate::storage::{open_pool, BaselineStore, Pool, StoreError, Versioned};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::debug;

#[derive(Clone)]
pub struct SqliteBaselineStore {
    pool: Pool,
}

impl SqliteBaselineStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open (or create) the database at `path` and wrap it.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl BaselineStore for SqliteBaselineStore {
    fn get(&self, key: &str) -> Result<Option<Versioned<BaselineTable>>, StoreError> {
        let conn = self.pool.get()?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, body_json FROM baselines WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((version, body)) = row else {
            return Ok(None);
        };

        let table = BaselineTable::from_json(&body).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Some(Versioned {
            value: table,
            version: version as u64,
        }))
    }

    fn put(&self, key: &str, table: &BaselineTable, expected_version: u64) -> Result<u64, StoreError> {
        let body = table.to_json()?;
        let updated_at = table.last_updated.unwrap_or_else(Utc::now).to_rfc3339();
        let new_version = expected_version + 1;

        let conn = self.pool.get()?;
        let changed = if expected_version == 0 {
            conn.execute(
                "INSERT INTO baselines (key, version, body_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO NOTHING",
                params![key, new_version as i64, body, updated_at],
            )?
        } else {
            conn.execute(
                "UPDATE baselines SET version = ?2, body_json = ?3, updated_at = ?4
                 WHERE key = ?1 AND version = ?5",
                params![key, new_version as i64, body, updated_at, expected_version as i64],
            )?
        };

        if changed == 0 {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_version,
            });
        }

        debug!(%key, version = new_version, "Baseline committed");
        Ok(new_version)
    }
}
