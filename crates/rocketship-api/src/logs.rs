// Log ingestion HTTP route

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use rocketship_contracts::LogEntry;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::runs::store_error_response;
use crate::AppState;

/// Request to append a log entry to a run
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddLogRequest {
    pub workflow_id: String,
    pub message: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub test_name: Option<String>,
    #[serde(default)]
    pub step_name: Option<String>,
}

/// Response carrying the appended log's sequence id
#[derive(Debug, Serialize, ToSchema)]
pub struct AddLogResponse {
    pub log_id: i64,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/runs/:run_id/logs", post(add_log))
        .with_state(state)
}

/// POST /v1/runs/{run_id}/logs - Append a log entry
#[utoipa::path(
    post,
    path = "/v1/runs/{run_id}/logs",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    request_body = AddLogRequest,
    responses(
        (status = 201, description = "Log appended", body = AddLogResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "logs"
)]
pub async fn add_log(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(request): Json<AddLogRequest>,
) -> Response {
    let entry = LogEntry {
        run_id,
        workflow_id: request.workflow_id,
        test_name: request.test_name,
        step_name: request.step_name,
        message: request.message,
        color: request.color,
        bold: request.bold,
        timestamp: Utc::now(),
    };

    match state.service.store().append_log(entry).await {
        Ok(log_id) => (StatusCode::CREATED, Json(AddLogResponse { log_id })).into_response(),
        Err(error) => store_error_response(error),
    }
}
