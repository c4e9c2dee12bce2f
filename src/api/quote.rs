// =============================================================================
// Quote snapshot read-through REST surface (spec §6)
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::error::{success, GatewayError, GatewayResult};
use crate::session::AuthUser;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    symbols: String,
}

fn split_symbols(raw: &str) -> GatewayResult<Vec<String>> {
    let list: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if list.is_empty() {
        return Err(GatewayError::InputException("symbols must not be empty".into()));
    }
    Ok(list)
}

pub async fn quote(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<QuoteParams>,
) -> GatewayResult<impl IntoResponse> {
    let symbols = split_symbols(&params.symbols)?;
    let rows = state.tick_store.get_by_symbols(&symbols).await?;
    let by_symbol: HashMap<String, _> = rows.into_iter().map(|r| (r.symbol.clone(), r)).collect();
    Ok(success(by_symbol))
}

pub async fn quote_ohlc(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<QuoteParams>,
) -> GatewayResult<impl IntoResponse> {
    let symbols = split_symbols(&params.symbols)?;
    let rows = state.tick_store.get_by_symbols(&symbols).await?;
    let by_symbol: HashMap<String, serde_json::Value> = rows
        .into_iter()
        .map(|r| {
            (
                r.symbol.clone(),
                serde_json::json!({ "last_price": r.last_price, "ohlc": r.ohlc }),
            )
        })
        .collect();
    Ok(success(by_symbol))
}

pub async fn quote_ltp(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Query(params): Query<QuoteParams>,
) -> GatewayResult<impl IntoResponse> {
    let symbols = split_symbols(&params.symbols)?;
    let rows = state.tick_store.get_by_symbols(&symbols).await?;
    let by_symbol: HashMap<String, f64> = rows.into_iter().map(|r| (r.symbol.clone(), r.last_price)).collect();
    Ok(success(by_symbol))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_symbols_trims_and_drops_empties() {
        let out = split_symbols(" NSE:RELIANCE ,,NSE:TCS").unwrap();
        assert_eq!(out, vec!["NSE:RELIANCE".to_string(), "NSE:TCS".to_string()]);
    }

    #[test]
    fn split_symbols_rejects_all_empty() {
        assert!(split_symbols(" , ,").is_err());
    }
}
