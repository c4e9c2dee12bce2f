// =============================================================================
// Shared domain types used across the market-data gateway
// =============================================================================

use serde::{Deserialize, Serialize};

/// Detail level requested from the upstream for a set of tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickMode {
    Ltp,
    Quote,
    Full,
}

impl std::fmt::Display for TickMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ltp => write!(f, "ltp"),
            Self::Quote => write!(f, "quote"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Open/high/low/close for an instrument's session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// A single price/quantity/orders level of market depth.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: u32,
    pub orders: u16,
}

/// Five-level buy/sell market depth, as carried by `full` mode ticks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Depth {
    pub buy: [DepthLevel; 5],
    pub sell: [DepthLevel; 5],
}

/// A single decoded market-data message for one instrument, as delivered by
/// the upstream ticker client's `on_tick` callback.
///
/// Field population depends on `mode`: `Ltp` carries only `last_price`;
/// `Quote` adds totals/volume/ohlc; `Full` adds open interest and `depth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_token: u32,
    pub mode: TickMode,
    pub is_tradable: bool,
    pub is_index: bool,
    /// Exchange timestamp (seconds since epoch), when present.
    pub timestamp: Option<i64>,
    pub last_trade_time: Option<i64>,
    pub last_price: f64,
    pub last_traded_quantity: Option<u32>,
    pub total_buy_quantity: Option<u32>,
    pub total_sell_quantity: Option<u32>,
    pub volume: Option<u32>,
    pub average_trade_price: Option<f64>,
    pub oi: Option<u32>,
    pub oi_day_high: Option<u32>,
    pub oi_day_low: Option<u32>,
    pub net_change: Option<f64>,
    pub ohlc: Option<Ohlc>,
    pub depth: Option<Depth>,
}

/// Instrument master record, loaded in bulk from the upstream CSV.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Instrument {
    pub instrument_token: i64,
    pub exchange: String,
    pub tradingsymbol: String,
    pub name: String,
    /// `None` when the instrument has no expiry (e.g. equities).
    pub expiry: Option<chrono::NaiveDate>,
    pub strike: f64,
    pub segment: String,
    pub instrument_type: String,
    pub lot_size: i32,
    pub tick_size: f64,
    pub last_price: f64,
}

impl Instrument {
    /// Canonical `exchange:tradingsymbol` form used as the external symbol key.
    pub fn symbol(&self) -> String {
        format!("{}:{}", self.exchange, self.tradingsymbol)
    }
}

/// Filter used by `Instrument Registry::query`. Empty fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstrumentFilter {
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub tradingsymbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub expiry: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub instrument_type: Option<String>,
}

/// A single `(user_id, symbol)` watchlist row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WatchlistEntry {
    pub user_id: String,
    pub symbol: String,
    pub instrument_token: i64,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Last-value snapshot persisted per instrument token.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TickSnapshotRow {
    pub instrument_token: i64,
    pub symbol: String,
    pub mode: String,
    pub is_tradable: bool,
    pub is_index: bool,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub last_trade_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_price: f64,
    pub last_traded_quantity: Option<i64>,
    pub total_buy_quantity: Option<i64>,
    pub total_sell_quantity: Option<i64>,
    pub volume: Option<i64>,
    pub average_trade_price: Option<f64>,
    pub oi: Option<i64>,
    pub oi_day_high: Option<i64>,
    pub oi_day_low: Option<i64>,
    pub net_change: Option<f64>,
    pub ohlc: Option<serde_json::Value>,
    pub depth: Option<serde_json::Value>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Round-half-away-from-zero to 2 decimal places — the gateway's adopted
/// rounding convention for `net_change` (portable across stores lacking a
/// native half-to-even primitive; see DESIGN.md).
pub fn round_half_away_from_zero_2dp(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let rounded = (x.abs() * 100.0 + 0.5).floor() / 100.0;
    rounded * sign
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_matches_spec_scenario() {
        assert!((round_half_away_from_zero_2dp(1.23456) - 1.23).abs() < 1e-9);
        assert!((round_half_away_from_zero_2dp(-0.005) - (-0.01)).abs() < 1e-9);
    }

    #[test]
    fn symbol_is_exchange_colon_tradingsymbol() {
        let inst = Instrument {
            instrument_token: 738561,
            exchange: "NSE".into(),
            tradingsymbol: "RELIANCE".into(),
            name: "RELIANCE INDUSTRIES".into(),
            expiry: None,
            strike: 0.0,
            segment: "EQ".into(),
            instrument_type: "EQ".into(),
            lot_size: 1,
            tick_size: 0.05,
            last_price: 2500.0,
        };
        assert_eq!(inst.symbol(), "NSE:RELIANCE");
    }
}
