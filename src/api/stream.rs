// =============================================================================
// SSE tick stream REST surface (spec §6 / §4.E `attach`)
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::Json;
use serde::Deserialize;

use crate::error::GatewayResult;
use crate::session::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    instruments: Vec<String>,
}

pub async fn stream_ticks(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<StreamRequest>,
) -> GatewayResult<Sse<crate::fanout::SseSubscription>> {
    if !state.lifecycle.status() {
        state.lifecycle.start(&user.user_id, &user.enctoken).await?;
    }

    let resolved = state.registry.lookup_by_symbols(&body.instruments).await?;
    let subscription = state.fanout.attach(resolved).await?;

    Ok(Sse::new(subscription).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    ))
}
