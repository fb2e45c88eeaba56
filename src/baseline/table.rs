use crate::baseline::RunningStat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot key holding the save timestamp. No channel may use it.
pub const LAST_UPDATED_KEY: &str = "last_updated";

/// Snapshot of every channel's learned statistics.
///
/// Serialized as one JSON object: a key per channel plus `last_updated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(flatten)]
    channels: BTreeMap<String, RunningStat>,
}

impl BaselineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: &str) -> Option<&RunningStat> {
        self.channels.get(channel)
    }

    /// Accumulator for `channel`, created empty if the channel is unseen.
    pub fn entry(&mut self, channel: &str) -> &mut RunningStat {
        self.channels.entry(channel.to_string()).or_default()
    }

    pub fn insert(&mut self, channel: impl Into<String>, stat: RunningStat) {
        self.channels.insert(channel.into(), stat);
    }

    /// Observation count for `channel`, `0` when unseen.
    pub fn count(&self, channel: &str) -> u64 {
        self.get(channel).map(RunningStat::count).unwrap_or(0)
    }

    pub fn channels(&self) -> impl Iterator<Item = (&str, &RunningStat)> {
        self.channels.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }
}
