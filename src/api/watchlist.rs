// =============================================================================
// Watchlist CRUD REST surface (spec §6 / §4.B)
// =============================================================================

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::{success, GatewayResult};
use crate::session::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InstrumentsBody {
    instruments: Vec<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> GatewayResult<impl IntoResponse> {
    let entries = state.watchlist.list(&user.user_id).await?;
    Ok(success(entries))
}

pub async fn add(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<InstrumentsBody>,
) -> GatewayResult<impl IntoResponse> {
    let outcome = state.watchlist.add(&user.user_id, &body.instruments).await?;
    Ok(success(serde_json::json!({
        "inserted": outcome.inserted,
        "updated": outcome.updated,
        "missing": outcome.missing,
    })))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<InstrumentsBody>,
) -> GatewayResult<impl IntoResponse> {
    let count = state.watchlist.delete(&user.user_id, &body.instruments).await?;
    Ok(success(serde_json::json!({ "deleted": count })))
}
