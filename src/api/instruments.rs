// =============================================================================
// Instrument Registry REST surface (spec §6)
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{success, GatewayError, GatewayResult};
use crate::state::AppState;
use crate::types::{Instrument, InstrumentFilter};

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    tradingsymbol: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
    #[serde(default)]
    strike: Option<f64>,
    #[serde(default)]
    segment: Option<String>,
    #[serde(default)]
    instrument_type: Option<String>,
    /// `i` = instrument_token only, `t` = tradingsymbol only, `it` = both.
    #[serde(default)]
    details: Option<String>,
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> GatewayResult<impl IntoResponse> {
    let expiry = parse_optional_expiry(params.expiry.as_deref())?;

    let filter = InstrumentFilter {
        exchange: params.exchange,
        tradingsymbol: params.tradingsymbol,
        name: params.name,
        expiry,
        strike: params.strike,
        segment: params.segment,
        instrument_type: params.instrument_type,
    };

    let rows = state.registry.query(&filter).await?;
    Ok(success(shape_for_details(rows, params.details.as_deref())))
}

fn shape_for_details(rows: Vec<Instrument>, details: Option<&str>) -> serde_json::Value {
    match details {
        Some("i") => serde_json::json!(rows.iter().map(|r| r.instrument_token).collect::<Vec<_>>()),
        Some("t") => serde_json::json!(rows.iter().map(Instrument::symbol).collect::<Vec<_>>()),
        Some("it") => serde_json::json!(rows
            .iter()
            .map(|r| serde_json::json!({"instrument_token": r.instrument_token, "symbol": r.symbol()}))
            .collect::<Vec<_>>()),
        _ => serde_json::json!(rows),
    }
}

fn parse_optional_expiry(raw: Option<&str>) -> GatewayResult<Option<NaiveDate>> {
    match raw {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| GatewayError::InputException(format!("expiry '{s}' must match YYYY-MM-DD"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct InfoParams {
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    t: Option<String>,
}

pub async fn info(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InfoParams>,
) -> GatewayResult<impl IntoResponse> {
    match (params.s, params.t) {
        (Some(_), Some(_)) => Err(GatewayError::InputException(
            "specify either 's' (symbol) or 't' (token), not both".into(),
        )),
        (Some(symbols), None) => {
            let list: Vec<String> = symbols.split(',').map(str::to_string).collect();
            let resolved = state.registry.lookup_by_symbols(&list).await?;
            let by_symbol: HashMap<String, i64> = resolved;
            Ok(success(by_symbol))
        }
        (None, Some(tokens)) => {
            let list: Vec<i64> = tokens
                .split(',')
                .filter_map(|t| t.trim().parse().ok())
                .collect();
            let resolved = state.registry.lookup_by_tokens(&list).await?;
            Ok(success(resolved))
        }
        (None, None) => Err(GatewayError::InputException(
            "specify 's' (symbol) or 't' (token)".into(),
        )),
    }
}

pub async fn segment_names(
    State(state): State<Arc<AppState>>,
    Path(expiry): Path<String>,
) -> GatewayResult<impl IntoResponse> {
    let expiry = NaiveDate::parse_from_str(&expiry, "%Y-%m-%d")
        .map_err(|_| GatewayError::InputException(format!("expiry '{expiry}' must match YYYY-MM-DD")))?;
    let map = state.registry.segment_names(expiry).await?;
    Ok(success(map))
}

#[derive(Debug, Deserialize)]
pub struct OptionChainParams {
    exchange: String,
    name: String,
    expiry: String,
}

pub async fn option_chain(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OptionChainParams>,
) -> GatewayResult<impl IntoResponse> {
    let expiry = NaiveDate::parse_from_str(&params.expiry, "%Y-%m-%d")
        .map_err(|_| GatewayError::InputException(format!("expiry '{}' must match YYYY-MM-DD", params.expiry)))?;
    let rows = state
        .registry
        .option_chain(&params.exchange, &params.name, expiry)
        .await?;
    Ok(success(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_optional_expiry_accepts_none_and_valid_date() {
        assert_eq!(parse_optional_expiry(None).unwrap(), None);
        assert!(parse_optional_expiry(Some("2024-10-31")).unwrap().is_some());
    }

    #[test]
    fn parse_optional_expiry_rejects_malformed_date() {
        assert!(parse_optional_expiry(Some("31-10-2024")).is_err());
    }
}
