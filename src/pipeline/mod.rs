//! Batch orchestration: load baseline, update, score, write outputs, commit.
//!
//! The baseline is committed with compare-and-swap as the very last step.
//! Anything that fails earlier leaves the stored baseline untouched, and a
//! lost commit race reloads and recomputes the whole batch.

pub mod keys;

pub use keys::OutputLayout;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::baseline::{BaselineManager, BaselineTable, LoadedBaseline};
use crate::batch::{Batch, BatchError, ScoredBatch, Summary};
use crate::config::EngineConfig;
use crate::detect::AnomalyEngine;
use crate::storage::{BaselineStore, BatchSink, BatchSource, FsObjectStore, StoreError, SummarySink};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("malformed batch: {0}")]
    MalformedBatch(#[from] BatchError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error("baseline commit lost to concurrent writers {attempts} times")]
    CommitConflict { attempts: u32 },
}

impl ProcessError {
    /// Whether resubmitting the same batch later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::MalformedBatch(_) => false,
            ProcessError::StoreUnavailable(StoreError::InvalidKey(_) | StoreError::Corrupt { .. }) => false,
            ProcessError::StoreUnavailable(_) => true,
            ProcessError::CommitConflict { .. } => true,
        }
    }
}

/// Whether a batch is scored against the baseline that already includes
/// its own values, or against the baseline as it stood before the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScoringOrder {
    #[default]
    UpdateBeforeScore,
    ScoreBeforeUpdate,
}

impl fmt::Display for ScoringOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringOrder::UpdateBeforeScore => write!(f, "update-before-score"),
            ScoringOrder::ScoreBeforeUpdate => write!(f, "score-before-update"),
        }
    }
}

/// The stores a processor reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub baselines: Arc<dyn BaselineStore>,
    pub source: Arc<dyn BatchSource>,
    pub batches: Arc<dyn BatchSink>,
    pub summaries: Arc<dyn SummarySink>,
}

impl Collaborators {
    /// Batches and summaries all live in one object store.
    pub fn with_object_store(baselines: Arc<dyn BaselineStore>, objects: Arc<FsObjectStore>) -> Self {
        Self {
            baselines,
            source: objects.clone(),
            batches: objects.clone(),
            summaries: objects,
        }
    }
}

/// Processes one batch per call. Cheap to clone and safe to share across
/// threads; every call does a fresh baseline read.
#[derive(Clone)]
pub struct BatchProcessor {
    stores: Collaborators,
    baseline_key: String,
    layout: OutputLayout,
    config: EngineConfig,
    engine: AnomalyEngine,
}

impl BatchProcessor {
    pub fn new(config: EngineConfig, stores: Collaborators, baseline_key: impl Into<String>, layout: OutputLayout) -> Self {
        let engine = AnomalyEngine::new(&config);
        Self {
            stores,
            baseline_key: baseline_key.into(),
            layout,
            config,
            engine,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn baseline_key(&self) -> &str {
        &self.baseline_key
    }

    /// Fetch, score and persist the batch stored under `source_key`.
    pub fn process(&self, source_key: &str) -> Result<Summary, ProcessError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("process_batch", %run_id, key = %source_key);
        let _guard = span.enter();

        info!("Processing batch");
        let bytes = self.stores.source.fetch_batch(source_key)?;
        let batch = Batch::from_csv(&bytes)?;
        info!(rows = batch.len(), columns = ?batch.headers(), "Loaded batch");
        batch.validate(self.config.channels())?;

        let output_key = self.layout.output_key(source_key);
        let summary_key = self.layout.summary_key(&output_key);
        let manager = BaselineManager::new(self.stores.baselines.as_ref(), &self.baseline_key);

        let attempts = self.config.max_commit_attempts();
        for attempt in 1..=attempts {
            let loaded = manager.load()?;
            let result = self.attempt(&manager, loaded, &batch, run_id, source_key, &output_key, &summary_key);
            match result {
                Err(ProcessError::StoreUnavailable(StoreError::Conflict { expected, .. })) => {
                    warn!(attempt, version = expected, "Baseline changed underneath us, recomputing");
                }
                other => return other,
            }
        }

        warn!(attempts, "Giving up on baseline commit");
        Err(ProcessError::CommitConflict { attempts })
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt(
        &self,
        manager: &BaselineManager<'_>,
        loaded: LoadedBaseline,
        batch: &Batch,
        run_id: Uuid,
        source_key: &str,
        output_key: &str,
        summary_key: &str,
    ) -> Result<Summary, ProcessError> {
        let LoadedBaseline { mut table, version } = loaded;
        let scored = self.score(batch, &mut table)?;

        let summary = Summary::new(run_id, source_key, output_key, &scored, &table, self.config.channels());
        let summary_body = summary.to_json().map_err(StoreError::from)?;

        self.stores.batches.put_batch(output_key, &scored.to_csv()?)?;
        self.stores.summaries.put_summary(summary_key, &summary_body)?;
        let committed = manager.save(&mut table, version)?;

        info!(
            anomalies = summary.anomaly_count,
            rows = summary.total_rows,
            version = committed,
            output = %output_key,
            "Done: {}/{} anomalies flagged",
            summary.anomaly_count,
            summary.total_rows
        );
        Ok(summary)
    }

    fn score(&self, batch: &Batch, table: &mut BaselineTable) -> Result<ScoredBatch, BatchError> {
        let mode = self.config.mode();
        match self.config.scoring_order() {
            ScoringOrder::UpdateBeforeScore => {
                self.update_baseline(batch, table)?;
                self.engine.run(batch, table, mode)
            }
            ScoringOrder::ScoreBeforeUpdate => {
                let scored = self.engine.run(batch, table, mode)?;
                self.update_baseline(batch, table)?;
                Ok(scored)
            }
        }
    }

    /// One pass per present channel over its non-null values.
    fn update_baseline(&self, batch: &Batch, table: &mut BaselineTable) -> Result<(), BatchError> {
        for channel in batch.present_channels(self.config.channels()) {
            let values: Vec<f64> = batch
                .numeric_column(channel)?
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .collect();
            if values.is_empty() {
                continue;
            }
            let update = BaselineManager::update(table, channel, &values);
            info!(channel = %channel, accepted = update.accepted, count = table.count(channel), "Baseline updated");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBaselineStore;

    fn processor(dir: &std::path::Path, config: EngineConfig) -> (BatchProcessor, Arc<FsObjectStore>, Arc<MemoryBaselineStore>) {
        let objects = Arc::new(FsObjectStore::new(dir));
        let baselines = Arc::new(MemoryBaselineStore::new());
        let stores = Collaborators::with_object_store(baselines.clone(), objects.clone());
        let processor = BatchProcessor::new(config, stores, "state/baseline.json", OutputLayout::default());
        (processor, objects, baselines)
    }

    #[test]
    fn test_process_writes_outputs_and_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, objects, baselines) = processor(dir.path(), EngineConfig::default());
        objects
            .put("raw/a.csv", b"timestamp,temperature\nt0,21.0\nt1,22.0\nt2,\n")
            .unwrap();

        let summary = processor.process("raw/a.csv").unwrap();
        assert_eq!(summary.output_key, "processed/a.csv");
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.baseline_observation_counts["temperature"], 2);

        assert!(objects.get("processed/a.csv").is_ok());
        assert!(objects.get("processed/a_summary.json").is_ok());

        let stored = baselines.get("state/baseline.json").unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.value.count("temperature"), 2);
        assert!(stored.value.last_updated.is_some());
    }

    #[test]
    fn test_malformed_batch_never_touches_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, objects, baselines) = processor(dir.path(), EngineConfig::default());
        objects.put("raw/bad.csv", b"station,reading\nx,1\n").unwrap();

        let err = processor.process("raw/bad.csv").unwrap_err();
        assert!(matches!(err, ProcessError::MalformedBatch(BatchError::MissingChannels { .. })));
        assert!(!err.is_retryable());
        assert!(baselines.get("state/baseline.json").unwrap().is_none());
        assert!(objects.get("processed/bad.csv").is_err());
    }

    #[test]
    fn test_missing_source_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let (processor, _, _) = processor(dir.path(), EngineConfig::default());
        let err = processor.process("raw/none.csv").unwrap_err();
        assert!(matches!(err, ProcessError::StoreUnavailable(StoreError::NotFound { .. })));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_scoring_order_display() {
        assert_eq!(ScoringOrder::default().to_string(), "update-before-score");
        assert_eq!(ScoringOrder::ScoreBeforeUpdate.to_string(), "score-before-update");
    }
}
