// =============================================================================
// Persistence layer — Postgres via sqlx
// =============================================================================

pub mod indices;
pub mod instruments;
pub mod state_kv;
pub mod ticks;
pub mod watchlist;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Connect to Postgres and run pending migrations.
///
/// Mirrors the sibling services' pattern of a single shared `PgPool` handed
/// to every repository at construction time rather than a global.
pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    // ticker_data is truncated at startup (spec §3: "table ... truncated at
    // startup"); this runs once per process, after migrations so the table
    // is guaranteed to exist.
    sqlx::query("TRUNCATE TABLE ticker_data")
        .execute(&pool)
        .await?;

    info!("database connected, migrations applied, ticker_data truncated");
    Ok(pool)
}
