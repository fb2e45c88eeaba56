use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::pipeline::{BatchProcessor, Collaborators, OutputLayout};
use crate::query::QueryService;
use crate::storage::{BaselineStore, FsObjectStore, SqliteBaselineStore};

#[derive(Clone)]
pub struct AppState {
    pub processor: BatchProcessor,
    pub queries: QueryService,
}

impl AppState {
    /// Wire the processor and query service to one baseline store and one
    /// object store.
    pub fn new(config: &AppConfig, baselines: Arc<dyn BaselineStore>, objects: Arc<FsObjectStore>) -> Result<Self> {
        let engine = config.engine_config().context("invalid [engine] configuration")?;
        let queries = QueryService::new(
            objects.clone(),
            baselines.clone(),
            config.storage.baseline_key.clone(),
            config.storage.processed_prefix.clone(),
            engine.maturity_floor(),
        );
        let processor = BatchProcessor::new(
            engine,
            Collaborators::with_object_store(baselines, objects),
            config.storage.baseline_key.clone(),
            OutputLayout::from_config(&config.storage),
        );
        Ok(Self { processor, queries })
    }

    /// SQLite baseline store at `db_path`, object store rooted at `data_dir`.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let db_path = config.storage.db_path.to_string_lossy();
        let baselines = SqliteBaselineStore::open(&db_path)
            .with_context(|| format!("failed to open baseline database {db_path}"))?;
        let objects = FsObjectStore::new(&config.storage.data_dir);
        Self::new(config, Arc::new(baselines), Arc::new(objects))
    }
}
