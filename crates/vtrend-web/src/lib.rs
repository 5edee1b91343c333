//! Thin axum trigger surface over the pipeline operations.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vtrend_core::HourlySnapshot;
use vtrend_sync::{
    retention::DEFAULT_RETENTION_DAYS, DeletionReport, ErrorKind, FleetSummary, PipelineError,
    StatsPipeline,
};

pub const CRATE_NAME: &str = "vtrend-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: StatsPipeline,
    /// Cancelled on shutdown; retention scans in flight stop at the next record.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(pipeline: StatsPipeline) -> Self {
        Self {
            pipeline,
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats/update-all", post(update_all_handler))
        .route("/stats/competitions/{id}/update", post(update_competition_handler))
        .route("/admin/snapshots/hourly", post(hourly_snapshot_handler))
        .route("/admin/aggregation/daily", post(daily_aggregation_handler))
        .route("/admin/snapshots/cleanup", delete(cleanup_handler))
        .route("/admin/snapshots/range", delete(delete_range_handler))
        .route("/admin/competitions/{id}/history", delete(delete_history_handler))
        .route("/admin/storage-stats", get(storage_stats_handler))
        .route("/admin/backup-info", get(backup_info_handler))
        .with_state(Arc::new(state))
}

/// Serves until Ctrl-C, then cancels in-flight retention work and drains.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "http trigger surface listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("ctrl-c handler unavailable; shutting down");
            }
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Provider => StatusCode::BAD_GATEWAY,
        ErrorKind::Storage | ErrorKind::Initialization => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            error!(kind = %kind, error = %self.0, "request failed");
        }
        let body = json!({ "success": false, "kind": kind.as_str(), "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FleetResponse {
    success_count: usize,
    total_count: usize,
    failed_competitions: Vec<String>,
    run_id: String,
}

impl From<FleetSummary> for FleetResponse {
    fn from(summary: FleetSummary) -> Self {
        Self {
            success_count: summary.success_count,
            total_count: summary.total_count,
            failed_competitions: summary.failed_competitions,
            run_id: summary.run_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum HourlyOutcome {
    Single(HourlySnapshot),
    Fleet(FleetResponse),
}

#[derive(Debug, Serialize)]
struct DeletedCounts {
    snapshots: u64,
}

#[derive(Debug, Serialize)]
struct DeletionResponse {
    deleted: DeletedCounts,
    scanned: u64,
    cancelled: bool,
}

impl From<DeletionReport> for DeletionResponse {
    fn from(report: DeletionReport) -> Self {
        Self {
            deleted: DeletedCounts {
                snapshots: report.deleted,
            },
            scanned: report.scanned,
            cancelled: report.cancelled,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct HourlyQuery {
    competition_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CleanupQuery {
    days: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RangeQuery {
    start_date: Option<String>,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfirmQuery {
    confirm: Option<String>,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pipeline.health())
}

async fn update_all_handler(State(state): State<Arc<AppState>>) -> ApiResult<FleetResponse> {
    let summary = state.pipeline.update_all_active_competitions().await?;
    Ok(Json(summary.into()))
}

async fn update_competition_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<vtrend_sync::StatsUpdate> {
    Ok(Json(state.pipeline.update_competition_stats(&id).await?))
}

async fn hourly_snapshot_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HourlyQuery>,
) -> ApiResult<HourlyOutcome> {
    let outcome = match query.competition_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => HourlyOutcome::Single(state.pipeline.save_competition_hourly_snapshot(&id).await?),
        None => HourlyOutcome::Fleet(state.pipeline.update_all_active_competitions().await?.into()),
    };
    Ok(Json(outcome))
}

async fn daily_aggregation_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<vtrend_core::DailySystemStats> {
    Ok(Json(state.pipeline.save_daily_aggregation().await?))
}

async fn cleanup_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<DeletionResponse> {
    let days = match query.days.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_RETENTION_DAYS,
        Some(raw) => raw.parse::<i64>().map_err(|_| {
            PipelineError::validation(format!("days must be a positive integer, got `{raw}`"))
        })?,
    };
    let cancel = state.shutdown.child_token();
    let report = state
        .pipeline
        .cleanup_snapshots_older_than(days, &cancel)
        .await?;
    Ok(Json(report.into()))
}

async fn delete_range_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<DeletionResponse> {
    let (Some(start), Some(end)) = (query.start_date, query.end_date) else {
        return Err(PipelineError::validation("start_date and end_date are required").into());
    };
    let cancel = state.shutdown.child_token();
    let report = state
        .pipeline
        .delete_data_by_dates(&start, &end, &cancel)
        .await?;
    Ok(Json(report.into()))
}

async fn delete_history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ConfirmQuery>,
) -> ApiResult<DeletionResponse> {
    let confirmed = matches!(query.confirm.as_deref(), Some("yes" | "true" | "1"));
    let cancel = state.shutdown.child_token();
    let report = state
        .pipeline
        .delete_competition_history_data(&id, confirmed, &cancel)
        .await?;
    Ok(Json(report.into()))
}

async fn storage_stats_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<vtrend_sync::StorageStats> {
    Ok(Json(state.pipeline.get_storage_stats().await?))
}

async fn backup_info_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<vtrend_sync::BackupAdvice> {
    Ok(Json(state.pipeline.backup_info().await?))
}
