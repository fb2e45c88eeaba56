//! In-process baseline store with the same versioning contract as SQLite.

use crate::baseline::BaselineTable;
use crate::storage::{BaselineStore, StoreError, Versioned};
use std::collections::HashMap;
use std::sync::Mutex;

/// Snapshots are kept as serialized JSON so reads go through the same
/// decode path as a durable store.
#[derive(Debug, Default)]
pub struct MemoryBaselineStore {
    entries: Mutex<HashMap<String, (u64, String)>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (u64, String)>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl BaselineStore for MemoryBaselineStore {
    fn get(&self, key: &str) -> Result<Option<Versioned<BaselineTable>>, StoreError> {
        let entries = self.lock()?;
        let Some((version, body)) = entries.get(key) else {
            return Ok(None);
        };
        let table = BaselineTable::from_json(body).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(Versioned {
            value: table,
            version: *version,
        }))
    }

    fn put(&self, key: &str, table: &BaselineTable, expected_version: u64) -> Result<u64, StoreError> {
        let body = table.to_json()?;
        let mut entries = self.lock()?;
        let current = entries.get(key).map(|(v, _)| *v).unwrap_or(0);
        if current != expected_version {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: expected_version,
            });
        }
        let version = expected_version + 1;
        entries.insert(key.to_string(), (version, body));
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_put() {
        let store = MemoryBaselineStore::new();
        let mut table = BaselineTable::new();
        table.entry("wind_speed").update([3.0, 4.0]);

        assert_eq!(store.put("k", &table, 0).unwrap(), 1);
        assert!(matches!(store.put("k", &table, 0), Err(StoreError::Conflict { .. })));
        assert_eq!(store.put("k", &table, 1).unwrap(), 2);

        let got = store.get("k").unwrap().unwrap();
        assert_eq!(got.version, 2);
        assert_eq!(got.value, table);
    }
}
