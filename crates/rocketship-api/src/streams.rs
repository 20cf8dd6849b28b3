// Live streaming HTTP routes (SSE)
// On subscribe, persisted rows replay from sequence zero, then the
// stream tails new writes by polling the change cursor. Step upserts
// re-emit the row, so subscribers see every status transition.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::{
    stream::{self, Stream},
    StreamExt,
};
use std::{convert::Infallible, time::Duration};
use uuid::Uuid;

use crate::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/runs/:run_id/logs/stream", get(stream_logs))
        .route("/v1/runs/:run_id/steps/stream", get(stream_steps))
        .with_state(state)
}

/// GET /v1/runs/{run_id}/logs/stream - Replay then tail log entries
#[utoipa::path(
    get,
    path = "/v1/runs/{run_id}/logs/stream",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Log event stream", content_type = "text/event-stream"),
        (status = 404, description = "Run not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "streams"
)]
pub async fn stream_logs(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, StatusCode> {
    // Verify the run exists before subscribing
    state
        .service
        .store()
        .get_run(run_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    tracing::info!(%run_id, "log stream subscribed");
    let store = state.service.store().clone();

    let stream = stream::unfold(0i64, move |cursor| {
        let store = store.clone();
        async move {
            match store.list_logs_since(run_id, cursor).await {
                Ok(batch) if !batch.is_empty() => {
                    let next_cursor = batch.last().unwrap().id;
                    let events: Vec<Result<SseEvent, Infallible>> = batch
                        .into_iter()
                        .map(|log| {
                            let json = serde_json::to_string(&log.entry)
                                .unwrap_or_else(|_| "{}".to_string());
                            Ok(SseEvent::default()
                                .event("log")
                                .data(json)
                                .id(log.id.to_string()))
                        })
                        .collect();
                    Some((stream::iter(events), next_cursor))
                }
                Ok(_) => {
                    // Nothing new; wait before the next poll
                    tokio::time::sleep(POLL_INTERVAL).await;
                    Some((stream::iter(vec![]), cursor))
                }
                Err(e) => {
                    tracing::error!(%run_id, error = %e, "log stream poll failed");
                    None
                }
            }
        }
    })
    .flatten();

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /v1/runs/{run_id}/steps/stream - Replay then tail step transitions
#[utoipa::path(
    get,
    path = "/v1/runs/{run_id}/steps/stream",
    params(
        ("run_id" = Uuid, Path, description = "Run ID")
    ),
    responses(
        (status = 200, description = "Step event stream", content_type = "text/event-stream"),
        (status = 404, description = "Run not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "streams"
)]
pub async fn stream_steps(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, StatusCode> {
    state
        .service
        .store()
        .get_run(run_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    tracing::info!(%run_id, "step stream subscribed");
    let store = state.service.store().clone();

    let stream = stream::unfold(0i64, move |cursor| {
        let store = store.clone();
        async move {
            match store.list_steps_since(run_id, cursor).await {
                Ok(batch) if !batch.is_empty() => {
                    let next_cursor = batch.last().unwrap().update_seq;
                    let events: Vec<Result<SseEvent, Infallible>> = batch
                        .into_iter()
                        .map(|step| {
                            let json = serde_json::to_string(&step.record)
                                .unwrap_or_else(|_| "{}".to_string());
                            Ok(SseEvent::default()
                                .event("step")
                                .data(json)
                                .id(step.update_seq.to_string()))
                        })
                        .collect();
                    Some((stream::iter(events), next_cursor))
                }
                Ok(_) => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                    Some((stream::iter(vec![]), cursor))
                }
                Err(e) => {
                    tracing::error!(%run_id, error = %e, "step stream poll failed");
                    None
                }
            }
        }
    })
    .flatten();

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
