//! API route definitions.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::state::AppState;
use crate::pipeline::ProcessError;
use crate::query::DEFAULT_RECENT_LIMIT;
use crate::storage::StoreError;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/batches", post(process_batch))
        .route("/anomalies/recent", get(recent_anomalies))
        .route("/anomalies/summary", get(anomaly_summary))
        .route("/baseline/current", get(current_baseline))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

/// Error rendered inside the usual envelope.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "data": null,
            "meta": {
                "error": self.message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<ProcessError> for ApiError {
    fn from(e: ProcessError) -> Self {
        let status = match &e {
            ProcessError::MalformedBatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ProcessError::CommitConflict { .. } => StatusCode::CONFLICT,
            ProcessError::StoreUnavailable(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ProcessError::StoreUnavailable(StoreError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            ProcessError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        Self::new(status, e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        let message = format!("{e:#}");
        error!(error = %message, "Query failed");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        error!(error = %e, "Worker task failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "worker task failed")
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub key: String,
}

async fn process_batch(State(state): State<AppState>, Json(req): Json<ProcessRequest>) -> Result<Json<Value>, ApiError> {
    let processor = state.processor.clone();
    let summary = tokio::task::spawn_blocking(move || processor.process(&req.key)).await??;
    Ok(Json(json!({ "data": summary, "meta": meta() })))
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub limit: Option<usize>,
}

async fn recent_anomalies(State(state): State<AppState>, Query(params): Query<RecentParams>) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    let queries = state.queries.clone();
    let recent = tokio::task::spawn_blocking(move || queries.recent_anomalies(limit)).await??;
    Ok(Json(json!({
        "data": recent.anomalies,
        "meta": { "total": recent.count, "limit": limit }
    })))
}

async fn anomaly_summary(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let queries = state.queries.clone();
    let report = tokio::task::spawn_blocking(move || queries.summary_report()).await??;
    Ok(Json(match report {
        Some(report) => json!({ "data": report, "meta": meta() }),
        None => json!({ "data": null, "meta": { "message": "no processed files yet" } }),
    }))
}

async fn current_baseline(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let queries = state.queries.clone();
    let report = tokio::task::spawn_blocking(move || queries.baseline_report()).await??;
    Ok(Json(json!({ "data": report, "meta": meta() })))
}
