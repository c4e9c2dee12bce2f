// =============================================================================
// Session REST surface (spec §6 / §3)
// =============================================================================

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::{success, GatewayError, GatewayResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    user_id: String,
    password: String,
}

pub async fn token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenRequest>,
) -> GatewayResult<impl IntoResponse> {
    let enctoken = state.session.issue_token(&body.user_id, &body.password).await?;
    Ok(success(serde_json::json!({ "user_id": body.user_id, "enctoken": enctoken })))
}

#[derive(Debug, Deserialize)]
pub struct TotpRequest {
    user_id: String,
    totp: String,
}

pub async fn totp(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TotpRequest>,
) -> GatewayResult<impl IntoResponse> {
    let ok = state.session.verify_totp(&body.user_id, &body.totp).await?;
    if !ok {
        return Err(GatewayError::AuthorizationException("invalid TOTP".into()));
    }
    Ok(success(serde_json::json!({ "verified": true })))
}

#[derive(Debug, Deserialize)]
pub struct ValidRequest {
    user_id: String,
    enctoken: String,
}

pub async fn valid(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidRequest>,
) -> GatewayResult<impl IntoResponse> {
    let ok = state.session.verify(&body.user_id, &body.enctoken).await;
    Ok(success(serde_json::json!({ "valid": ok })))
}
