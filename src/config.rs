// =============================================================================
// Environment configuration — fatal-on-missing for required infra vars
// =============================================================================
//
// Unlike the tunable, hot-reloadable JSON config of a strategy engine, a
// gateway's configuration is fixed for the lifetime of the process: server
// port, database DSN, upstream credentials. Missing required variables are a
// startup-time fatal error (spec §6) rather than a soft default, since there
// is no safe default for "which database do I write ticks to".
// =============================================================================

use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub log_level: String,

    pub database_url: String,
    pub db_log_level: String,

    /// In-process pub/sub is always available; this address is accepted for
    /// forward-compatibility with a networked broker (see DESIGN.md) and
    /// logged but not dialed by the in-memory bridge implementation.
    pub pubsub_addr: String,

    pub upstream_ws_url: String,
    pub upstream_user_id: String,
    pub upstream_enctoken_env: String,

    /// HTTP source for the instrument-master CSV consumed by 4.A.refresh().
    pub instruments_csv_url: String,
    /// HTTP source for the configured NSE index list (4.G "indices refresh").
    pub indices_url: String,
    /// Comma-separated NSE index names whose constituents feed the
    /// watchlist universe refresh (spec §4.G item d).
    pub nse_index_constituents: Vec<String>,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// `dotenv` should already have been invoked by the caller so that a
    /// `.env` file in the working directory can supply these variables in
    /// development. Any required variable that is missing causes the process
    /// to exit non-zero after logging which variable was absent.
    pub fn load_from_env() -> Self {
        let bind_addr =
            std::env::var("GATEWAY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
        let log_level = std::env::var("GATEWAY_LOG_LEVEL").unwrap_or_else(|_| "info".into());

        let database_url = require_env("DATABASE_URL");
        let db_log_level = std::env::var("DATABASE_LOG_LEVEL").unwrap_or_else(|_| "warn".into());

        let pubsub_addr =
            std::env::var("PUBSUB_ADDR").unwrap_or_else(|_| "in-process".into());

        let upstream_ws_url = std::env::var("UPSTREAM_WS_URL")
            .unwrap_or_else(|_| "wss://ws.kite.trade".into());
        let upstream_user_id = require_env("UPSTREAM_USER_ID");
        let upstream_enctoken_env =
            std::env::var("UPSTREAM_ENCTOKEN_VAR").unwrap_or_else(|_| "UPSTREAM_ENCTOKEN".into());

        let instruments_csv_url = std::env::var("INSTRUMENTS_CSV_URL")
            .unwrap_or_else(|_| "https://api.kite.trade/instruments".into());
        let indices_url = std::env::var("INDICES_URL")
            .unwrap_or_else(|_| "https://api.kite.trade/indices".into());
        let nse_index_constituents = std::env::var("NSE_INDEX_CONSTITUENTS")
            .unwrap_or_else(|_| "NIFTY 50,NIFTY BANK".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let cfg = Self {
            bind_addr,
            log_level,
            database_url,
            db_log_level,
            pubsub_addr,
            upstream_ws_url,
            upstream_user_id,
            upstream_enctoken_env,
            instruments_csv_url,
            indices_url,
            nse_index_constituents,
        };

        info!(
            bind_addr = %cfg.bind_addr,
            upstream_ws_url = %cfg.upstream_ws_url,
            "configuration loaded"
        );

        cfg
    }
}

/// Read a required environment variable, exiting the process if absent.
///
/// This is deliberately a hard exit rather than a returned `Result`: every
/// caller of `Config::load_from_env` is `main`, and there is nothing useful
/// to do with a gateway that is missing its database DSN besides refuse to
/// start.
fn require_env(key: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => {
            error!(var = key, "required environment variable is missing — refusing to start");
            std::process::exit(1);
        }
    }
}
