// Discovery HTTP route
// Stays outside the auth layer so clients can negotiate capabilities and
// learn whether a token is required before authenticating.

use axum::{extract::State, Json};
use rocketship_contracts::Discovery;

use crate::AppState;

/// GET /v1/discovery - Capability and version negotiation
#[utoipa::path(
    get,
    path = "/v1/discovery",
    responses(
        (status = 200, description = "Engine capabilities", body = Discovery)
    ),
    tag = "discovery"
)]
pub async fn get_discovery(State(state): State<AppState>) -> Json<Discovery> {
    Json(Discovery::current(
        env!("CARGO_PKG_VERSION"),
        state.auth_required,
    ))
}
