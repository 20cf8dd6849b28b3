// Step upsert HTTP route

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::put,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rocketship_contracts::{StepRecord, StepStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::runs::store_error_response;
use crate::AppState;

/// Request to upsert a step record
///
/// Keyed by `(run_id, workflow_id, step_index)`; repeating the call with
/// the same key updates the existing row.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertStepRequest {
    pub workflow_id: String,
    pub step_index: i32,
    pub name: String,
    pub plugin: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub assertions_passed: i32,
    #[serde(default)]
    pub assertions_failed: i32,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub assertions: Option<String>,
    #[serde(default)]
    pub variables: Option<String>,
    #[serde(default)]
    pub step_config: Option<String>,
}

/// Response carrying the step row id
#[derive(Debug, Serialize, ToSchema)]
pub struct UpsertStepResponse {
    pub step_id: Uuid,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/runs/:run_id/steps", put(upsert_step))
        .with_state(state)
}

/// PUT /v1/runs/{run_id}/steps - Upsert a step record
#[utoipa::path(
    put,
    path = "/v1/runs/{run_id}/steps",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    request_body = UpsertStepRequest,
    responses(
        (status = 200, description = "Step upserted", body = UpsertStepResponse),
        (status = 500, description = "Internal server error")
    ),
    tag = "steps"
)]
pub async fn upsert_step(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(request): Json<UpsertStepRequest>,
) -> Response {
    let record = StepRecord {
        run_id,
        workflow_id: request.workflow_id,
        step_index: request.step_index,
        name: request.name,
        plugin: request.plugin,
        status: request.status,
        started_at: request.started_at,
        ended_at: request.ended_at,
        duration_ms: request.duration_ms,
        error_message: request.error_message,
        assertions_passed: request.assertions_passed,
        assertions_failed: request.assertions_failed,
        request: request.request,
        response: request.response,
        assertions: request.assertions,
        variables: request.variables,
        step_config: request.step_config,
    };

    match state.service.store().upsert_step(record).await {
        Ok(step_id) => (StatusCode::OK, Json(UpsertStepResponse { step_id })).into_response(),
        Err(error) => store_error_response(error),
    }
}
