// =============================================================================
// Lifecycle Controller REST surface (spec §6 / §4.F)
// =============================================================================
//
// The bearer credential doubles as the upstream session: `user_id` and
// `enctoken` are exactly the `(user, token)` pair `start`/`restart` need to
// open the ticker connection, so no separate request body is required.
// =============================================================================

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;

use crate::error::{success, GatewayResult};
use crate::session::AuthUser;
use crate::state::AppState;

pub async fn start(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> GatewayResult<impl IntoResponse> {
    state.lifecycle.start(&user.user_id, &user.enctoken).await?;
    Ok(success(serde_json::json!({ "is_running": true })))
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> GatewayResult<impl IntoResponse> {
    state.lifecycle.stop(&user.user_id).await?;
    Ok(success(serde_json::json!({ "is_running": false })))
}

pub async fn restart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> GatewayResult<impl IntoResponse> {
    state.lifecycle.restart(&user.user_id, &user.enctoken).await?;
    Ok(success(serde_json::json!({ "is_running": state.lifecycle.status() })))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> GatewayResult<impl IntoResponse> {
    Ok(success(serde_json::json!({ "is_running": state.lifecycle.status() })))
}
