//! Read path over what batch processing already produced: flagged rows from
//! recent scored batches, an aggregate over all summaries, and the current
//! baseline with per-channel maturity.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::baseline::BaselineManager;
use crate::batch::{round4, summary::anomaly_rate, Summary};
use crate::storage::{BaselineStore, FsObjectStore};

/// Scored batches scanned by [`QueryService::recent_anomalies`].
pub const RECENT_FILES: usize = 10;
pub const DEFAULT_RECENT_LIMIT: usize = 50;
/// Summaries listed in [`SummaryReport::most_recent`].
pub const RECENT_SUMMARIES: usize = 5;

const SUMMARY_SUFFIX: &str = "_summary.json";

#[derive(Debug, Clone, Serialize)]
pub struct RecentAnomalies {
    pub count: usize,
    /// One object per flagged row, every output column plus `source_file`.
    pub anomalies: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub files_processed: usize,
    pub total_rows_scored: usize,
    pub total_anomalies: usize,
    pub overall_anomaly_rate: f64,
    pub most_recent: Vec<Summary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelReport {
    pub observations: u64,
    pub mean: f64,
    pub std: f64,
    pub baseline_mature: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineReport {
    pub last_updated: Option<DateTime<Utc>>,
    pub channels: BTreeMap<String, ChannelReport>,
}

#[derive(Clone)]
pub struct QueryService {
    objects: Arc<FsObjectStore>,
    baselines: Arc<dyn BaselineStore>,
    baseline_key: String,
    processed_prefix: String,
    maturity_floor: u64,
}

impl QueryService {
    pub fn new(
        objects: Arc<FsObjectStore>,
        baselines: Arc<dyn BaselineStore>,
        baseline_key: impl Into<String>,
        processed_prefix: impl Into<String>,
        maturity_floor: u64,
    ) -> Self {
        Self {
            objects,
            baselines,
            baseline_key: baseline_key.into(),
            processed_prefix: processed_prefix.into(),
            maturity_floor,
        }
    }

    /// Flagged rows from the most recent scored batches, newest key first.
    pub fn recent_anomalies(&self, limit: usize) -> Result<RecentAnomalies> {
        let mut keys: Vec<String> = self
            .objects
            .list(&self.processed_prefix)?
            .into_iter()
            .filter(|k| k.ends_with(".csv"))
            .collect();
        keys.sort_by(|a, b| b.cmp(a));
        keys.truncate(RECENT_FILES);

        let mut anomalies = Vec::new();
        for key in keys {
            if anomalies.len() >= limit {
                break;
            }
            let body = self.objects.get(&key)?;
            let rows = flagged_rows(&body).with_context(|| format!("failed to read scored batch {key}"))?;
            debug!(%key, flagged = rows.len(), "Scanned scored batch");
            for mut row in rows {
                row.insert("source_file".to_string(), Value::String(key.clone()));
                anomalies.push(row);
            }
        }
        anomalies.truncate(limit);

        Ok(RecentAnomalies {
            count: anomalies.len(),
            anomalies,
        })
    }

    /// Totals across every summary written so far. `None` before the first
    /// batch has been processed.
    pub fn summary_report(&self) -> Result<Option<SummaryReport>> {
        let mut summaries = Vec::new();
        for key in self.objects.list(&self.processed_prefix)? {
            if !key.ends_with(SUMMARY_SUFFIX) {
                continue;
            }
            let body = self.objects.get(&key)?;
            match serde_json::from_slice::<Summary>(&body) {
                Ok(summary) => summaries.push(summary),
                Err(e) => warn!(%key, error = %e, "Skipping unreadable summary"),
            }
        }

        if summaries.is_empty() {
            return Ok(None);
        }

        let total_rows: usize = summaries.iter().map(|s| s.total_rows).sum();
        let total_anomalies: usize = summaries.iter().map(|s| s.anomaly_count).sum();
        let files_processed = summaries.len();

        summaries.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        summaries.truncate(RECENT_SUMMARIES);

        Ok(Some(SummaryReport {
            files_processed,
            total_rows_scored: total_rows,
            total_anomalies,
            overall_anomaly_rate: anomaly_rate(total_anomalies, total_rows),
            most_recent: summaries,
        }))
    }

    /// Current per-channel statistics.
    pub fn baseline_report(&self) -> Result<BaselineReport> {
        let loaded = BaselineManager::new(self.baselines.as_ref(), &self.baseline_key)
            .load()
            .context("failed to load baseline")?;

        let channels = loaded
            .table
            .channels()
            .map(|(name, stat)| {
                (
                    name.to_string(),
                    ChannelReport {
                        observations: stat.count(),
                        mean: round4(stat.mean()),
                        std: round4(stat.std()),
                        baseline_mature: stat.is_mature(self.maturity_floor),
                    },
                )
            })
            .collect();

        Ok(BaselineReport {
            last_updated: loaded.table.last_updated,
            channels,
        })
    }
}

/// Rows of a scored CSV whose `anomaly` column is `true`. A file without
/// that column contributes nothing.
fn flagged_rows(body: &[u8]) -> Result<Vec<Map<String, Value>>> {
    let mut reader = csv::Reader::from_reader(body);
    let headers = reader.headers()?.clone();
    let Some(anomaly_idx) = headers.iter().position(|h| h == "anomaly") else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.get(anomaly_idx) != Some("true") {
            continue;
        }
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.to_string(), cell_value(cell)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn cell_value(cell: &str) -> Value {
    match cell {
        "" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => cell
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(cell.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flagged_rows() {
        let body = b"timestamp,temperature,anomaly\nt0,22.0,false\nt1,40.0,true\nt2,,true\n";
        let rows = flagged_rows(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["timestamp"], Value::String("t1".into()));
        assert_eq!(rows[0]["temperature"], serde_json::json!(40.0));
        assert_eq!(rows[1]["temperature"], Value::Null);
        assert_eq!(rows[1]["anomaly"], Value::Bool(true));
    }

    #[test]
    fn test_file_without_anomaly_column() {
        assert!(flagged_rows(b"temperature\n1.0\n").unwrap().is_empty());
    }

    #[test]
    fn test_cell_value() {
        assert_eq!(cell_value("NaN"), Value::String("NaN".into()));
        assert_eq!(cell_value("-1"), serde_json::json!(-1.0));
        assert_eq!(cell_value("s-1"), Value::String("s-1".into()));
    }
}
