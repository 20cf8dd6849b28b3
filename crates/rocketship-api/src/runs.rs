// Run CRUD HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rocketship_contracts::{Run, RunContext, RunFilter, RunOrder, RunOrderBy, RunStatus};
use rocketship_dsl::Suite;
use rocketship_engine::RunConfig;
use rocketship_store::StoreError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::service::CreateRunError;
use crate::AppState;

/// Request to create a run
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRunRequest {
    /// The parsed suite document (YAML suites are submitted as their
    /// JSON object form)
    pub suite: serde_json::Value,

    #[serde(default)]
    pub context: RunContext,

    /// Run tests concurrently (default true)
    #[serde(default)]
    pub parallel: Option<bool>,
}

/// Response from creating a run
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateRunResponse {
    pub run_id: Uuid,
}

/// Query parameters for listing runs
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListRunsParams {
    pub project_id: Option<String>,
    pub source: Option<String>,
    pub branch: Option<String>,
    pub status: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// "started_at" (default) or "duration"
    pub order_by: Option<String>,
    #[serde(default)]
    pub ascending: bool,
    pub limit: Option<i64>,
}

/// Error body for run lookup failures
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub(crate) fn store_error_response(error: StoreError) -> Response {
    let (status, code) = match &error {
        StoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        StoreError::AmbiguousIdentifier(_) => (StatusCode::CONFLICT, "ambiguous_identifier"),
        StoreError::InvalidIdentifier(_) => (StatusCode::BAD_REQUEST, "invalid_identifier"),
        _ => {
            tracing::error!(error = %error, "store operation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    };
    (
        status,
        Json(ErrorBody {
            code: code.to_string(),
            message: error.to_string(),
        }),
    )
        .into_response()
}

/// Create run routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/runs", get(list_runs).post(create_run))
        .route("/v1/runs/:id_or_prefix", get(get_run))
        .route("/v1/runs/:run_id/cancel", post(cancel_run))
        .with_state(state)
}

/// POST /v1/runs - Validate a suite, persist the run, launch execution
#[utoipa::path(
    post,
    path = "/v1/runs",
    request_body = CreateRunRequest,
    responses(
        (status = 201, description = "Run created and launched", body = CreateRunResponse),
        (status = 400, description = "Suite failed parsing or validation", body = ErrorBody),
        (status = 500, description = "Internal server error")
    ),
    tag = "runs"
)]
pub async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> Response {
    let suite: Suite = match serde_json::from_value(request.suite) {
        Ok(suite) => suite,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    code: "invalid_suite".to_string(),
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    };

    let config = RunConfig {
        parallel: request.parallel.unwrap_or(true),
    };

    match state
        .service
        .create_run(suite, request.context, config)
        .await
    {
        Ok(run) => (
            StatusCode::CREATED,
            Json(CreateRunResponse { run_id: run.id }),
        )
            .into_response(),
        Err(CreateRunError::Validation(errors)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                code: "validation_failed".to_string(),
                message: errors.to_string(),
            }),
        )
            .into_response(),
        Err(CreateRunError::Store(error)) => store_error_response(error),
    }
}

/// GET /v1/runs - List runs with filters and ordering
#[utoipa::path(
    get,
    path = "/v1/runs",
    params(
        ("project_id" = Option<String>, Query, description = "Filter by project"),
        ("source" = Option<String>, Query, description = "Filter by source"),
        ("branch" = Option<String>, Query, description = "Filter by branch"),
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("since" = Option<String>, Query, description = "Started at or after (RFC 3339)"),
        ("until" = Option<String>, Query, description = "Started at or before (RFC 3339)"),
        ("order_by" = Option<String>, Query, description = "started_at (default) or duration"),
        ("ascending" = Option<bool>, Query, description = "Ascending order (default false)"),
        ("limit" = Option<i64>, Query, description = "Max results")
    ),
    responses(
        (status = 200, description = "List of runs", body = Vec<Run>),
        (status = 400, description = "Invalid filter", body = ErrorBody),
        (status = 500, description = "Internal server error")
    ),
    tag = "runs"
)]
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<ListRunsParams>,
) -> Response {
    let status = match params
        .status
        .as_deref()
        .map(|s| s.parse::<RunStatus>())
        .transpose()
    {
        Ok(status) => status,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    code: "invalid_filter".to_string(),
                    message: e,
                }),
            )
                .into_response()
        }
    };

    let filter = RunFilter {
        project_id: params.project_id,
        source: params.source,
        branch: params.branch,
        status,
        since: params.since,
        until: params.until,
    };
    let order = RunOrder {
        order_by: match params.order_by.as_deref() {
            Some("duration") => RunOrderBy::Duration,
            _ => RunOrderBy::StartedAt,
        },
        ascending: params.ascending,
    };

    match state
        .service
        .store()
        .list_runs(&filter, order, params.limit)
        .await
    {
        Ok(runs) => Json(runs).into_response(),
        Err(error) => store_error_response(error),
    }
}

/// GET /v1/runs/{id_or_prefix} - Fetch a run with nested tests and steps
#[utoipa::path(
    get,
    path = "/v1/runs/{id_or_prefix}",
    params(
        ("id_or_prefix" = String, Path, description = "Run id or unique prefix (min 12 chars)")
    ),
    responses(
        (status = 200, description = "Run found", body = Run),
        (status = 404, description = "Run not found", body = ErrorBody),
        (status = 409, description = "Prefix matches more than one run", body = ErrorBody),
        (status = 500, description = "Internal server error")
    ),
    tag = "runs"
)]
pub async fn get_run(
    State(state): State<AppState>,
    Path(id_or_prefix): Path<String>,
) -> Response {
    match state.service.store().find_run(&id_or_prefix).await {
        Ok(run) => Json(run).into_response(),
        Err(error) => store_error_response(error),
    }
}

/// POST /v1/runs/{run_id}/cancel - Signal cancellation
#[utoipa::path(
    post,
    path = "/v1/runs/{run_id}/cancel",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 202, description = "Cancellation signaled"),
        (status = 404, description = "Run not found", body = ErrorBody),
        (status = 500, description = "Internal server error")
    ),
    tag = "runs"
)]
pub async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    match state.service.cancel_run(run_id).await {
        Ok(_signaled) => StatusCode::ACCEPTED.into_response(),
        Err(error) => store_error_response(error),
    }
}
