use crate::baseline::{BaselineTable, StatsError};
use crate::storage::{BaselineStore, StoreError};
use chrono::Utc;
use tracing::{debug, warn};

/// A baseline snapshot together with the store version it was read at.
#[derive(Debug, Clone, Default)]
pub struct LoadedBaseline {
    pub table: BaselineTable,
    /// `0` when the store had no snapshot yet.
    pub version: u64,
}

/// Outcome of folding one batch's values into one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelUpdate {
    pub channel: String,
    pub accepted: usize,
    pub rejected: Vec<StatsError>,
}

/// Loads, updates and saves the baseline snapshot held under one store key.
pub struct BaselineManager<'a> {
    store: &'a dyn BaselineStore,
    key: &'a str,
}

impl<'a> BaselineManager<'a> {
    pub fn new(store: &'a dyn BaselineStore, key: &'a str) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> &str {
        self.key
    }

    /// Fresh read of the current snapshot. A missing snapshot is an empty
    /// table, not an error.
    pub fn load(&self) -> Result<LoadedBaseline, StoreError> {
        match self.store.get(self.key)? {
            Some(versioned) => {
                debug!(key = %self.key, version = versioned.version, channels = versioned.value.len(), "Loaded baseline");
                Ok(LoadedBaseline {
                    table: versioned.value,
                    version: versioned.version,
                })
            }
            None => {
                debug!(key = %self.key, "No baseline stored yet, starting empty");
                Ok(LoadedBaseline::default())
            }
        }
    }

    /// Stamp `last_updated` and write the table, provided the stored version
    /// is still `expected_version`. Returns the new version.
    pub fn save(&self, table: &mut BaselineTable, expected_version: u64) -> Result<u64, StoreError> {
        table.last_updated = Some(Utc::now());
        self.store.put(self.key, table, expected_version)
    }

    /// Fold one batch's non-null values for `channel` into `table` in a single
    /// pass. Unseen channels start from an empty accumulator. Non-finite
    /// values are rejected individually.
    pub fn update(table: &mut BaselineTable, channel: &str, values: &[f64]) -> ChannelUpdate {
        let rejected = table.entry(channel).update(values.iter().copied());
        if !rejected.is_empty() {
            warn!(%channel, rejected = rejected.len(), "Rejected non-finite or overflowing values");
        }
        ChannelUpdate {
            channel: channel.to_string(),
            accepted: values.len() - rejected.len(),
            rejected,
        }
    }
}
