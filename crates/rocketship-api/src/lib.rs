//! # Engine Service
//!
//! The operator-facing facade over the test-execution core: run
//! submission, step/log ingestion from the reporters, filter/sort
//! queries, unique-prefix lookup, and server-push streaming of logs and
//! step transitions. Token-protected deployments reject unauthenticated
//! calls with a dedicated `token_required` code.

pub mod auth;
pub mod discovery;
pub mod logs;
pub mod runs;
pub mod service;
pub mod steps;
pub mod streams;

pub use auth::AuthConfig;
pub use service::{CreateRunError, EngineService};

use std::sync::Arc;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<EngineService>,
    pub auth_required: bool,
}

/// Assemble the full API router
pub fn router(state: AppState, auth: AuthConfig) -> axum::Router {
    use axum::middleware;

    // Discovery stays open so clients can learn that a token is needed
    let open = axum::Router::new()
        .route("/v1/discovery", axum::routing::get(discovery::get_discovery))
        .with_state(state.clone());

    let protected = axum::Router::new()
        .merge(runs::routes(state.clone()))
        .merge(logs::routes(state.clone()))
        .merge(steps::routes(state.clone()))
        .merge(streams::routes(state))
        .layer(middleware::from_fn_with_state(auth, auth::require_bearer));

    open.merge(protected)
}
