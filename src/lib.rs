//! Sensorbase -- streaming per-channel baselines and anomaly scoring for
//! batches of multi-channel sensor readings.
//!
//! Each batch updates a Welford baseline per channel, is scored with a
//! z-score test per channel and a batch-local isolation forest, and is
//! written back out with a consensus `anomaly` column and a summary.

pub mod api;
pub mod baseline;
pub mod batch;
pub mod config;
pub mod detect;
pub mod pipeline;
pub mod query;
pub mod storage;

use anyhow::{Context, Result};

use crate::api::AppState;
use crate::config::AppConfig;

/// Start the HTTP service over the configured stores.
pub async fn serve(config: &AppConfig) -> Result<()> {
    tracing::info!(db_path = %config.storage.db_path.display(), data_dir = %config.storage.data_dir.display(), "Initializing stores");
    let state = AppState::open(config)?;
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;

    tracing::info!(%addr, "Sensorbase listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
