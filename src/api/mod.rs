// =============================================================================
// REST + SSE API Endpoints — Axum
// =============================================================================
//
// All routes require a valid `Authorization: Bearer <user_id>:<enctoken>`
// credential except `/health`, matching the teacher's `rest.rs` split between
// a public health route and everything else behind `AuthBearer`. CORS is
// permissive, same as the teacher's development configuration.
// =============================================================================

mod instruments;
mod quote;
mod session;
mod stream;
mod ticker_control;
mod watchlist;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/instruments/query", get(instruments::query))
        .route("/instruments/info", get(instruments::info))
        .route("/instruments/fno/segment_names/:expiry", get(instruments::segment_names))
        .route("/instruments/fno/optionchain", get(instruments::option_chain))
        .route(
            "/ticker/instruments",
            get(watchlist::list).post(watchlist::add).delete(watchlist::delete),
        )
        .route("/ticker/start", get(ticker_control::start))
        .route("/ticker/stop", get(ticker_control::stop))
        .route("/ticker/restart", get(ticker_control::restart))
        .route("/ticker/status", get(ticker_control::status))
        .route("/quote", get(quote::quote))
        .route("/quote/ohlc", get(quote::quote_ohlc))
        .route("/quote/ltp", get(quote::quote_ltp))
        .route("/stream/ticks", post(stream::stream_ticks))
        .route("/session/token", post(session::token))
        .route("/session/totp", post(session::totp))
        .route("/session/valid", post(session::valid))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}
