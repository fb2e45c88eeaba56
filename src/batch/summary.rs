use crate::baseline::BaselineTable;
use crate::batch::{round4, ScoredBatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One record per processed batch. Written once next to the scored output
/// and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub run_id: Uuid,
    pub source_key: String,
    pub output_key: String,
    pub processed_at: DateTime<Utc>,
    pub total_rows: usize,
    pub anomaly_count: usize,
    /// `anomaly_count / total_rows` to 4 decimals, `0` for an empty batch.
    pub anomaly_rate: f64,
    /// Observation count of every configured channel after this batch.
    pub baseline_observation_counts: BTreeMap<String, u64>,
}

impl Summary {
    pub fn new(
        run_id: Uuid,
        source_key: &str,
        output_key: &str,
        scored: &ScoredBatch,
        baseline: &BaselineTable,
        channels: &[String],
    ) -> Self {
        let total_rows = scored.total_rows();
        let anomaly_count = scored.anomaly_count();
        Self {
            run_id,
            source_key: source_key.to_string(),
            output_key: output_key.to_string(),
            processed_at: Utc::now(),
            total_rows,
            anomaly_count,
            anomaly_rate: anomaly_rate(anomaly_count, total_rows),
            baseline_observation_counts: channels
                .iter()
                .map(|c| (c.clone(), baseline.count(c)))
                .collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

pub(crate) fn anomaly_rate(anomalies: usize, rows: usize) -> f64 {
    if rows == 0 {
        0.0
    } else {
        round4(anomalies as f64 / rows as f64)
    }
}
