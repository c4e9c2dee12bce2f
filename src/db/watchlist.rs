// =============================================================================
// Watchlist Store (spec §4.B)
// =============================================================================

use sqlx::PgPool;
use tracing::info;

use crate::db::instruments::InstrumentRegistry;
use crate::error::GatewayResult;
use crate::types::{Instrument, InstrumentFilter, WatchlistEntry};

#[derive(Clone)]
pub struct WatchlistStore {
    pool: PgPool,
    registry: InstrumentRegistry,
}

pub struct AddOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub missing: Vec<String>,
}

pub struct RefreshOutcome {
    pub queried: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl WatchlistStore {
    pub fn new(pool: PgPool, registry: InstrumentRegistry) -> Self {
        Self { pool, registry }
    }

    /// Resolve `symbols` against the registry and upsert the resolved
    /// entries for `user`. Conflict key `(user_id, symbol)`; updated columns
    /// `instrument_token`, `updated_at`.
    pub async fn add(&self, user: &str, symbols: &[String]) -> GatewayResult<AddOutcome> {
        let resolved = self.registry.lookup_by_symbols(symbols).await?;

        let missing: Vec<String> = symbols
            .iter()
            .filter(|s| !resolved.contains_key(*s))
            .cloned()
            .collect();

        let mut inserted = 0usize;
        let mut updated = 0usize;

        let mut tx = self.pool.begin().await?;
        for (symbol, token) in &resolved {
            let row: (bool,) = sqlx::query_as(
                r#"
                INSERT INTO ticker_instruments (user_id, symbol, instrument_token, updated_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (user_id, symbol) DO UPDATE SET
                    instrument_token = EXCLUDED.instrument_token,
                    updated_at = EXCLUDED.updated_at
                RETURNING (xmax = 0) AS inserted
                "#,
            )
            .bind(user)
            .bind(symbol)
            .bind(token)
            .fetch_one(&mut *tx)
            .await?;

            if row.0 {
                inserted += 1;
            } else {
                updated += 1;
            }
        }
        tx.commit().await?;

        info!(user, inserted, updated, missing = missing.len(), "watchlist add");
        Ok(AddOutcome {
            inserted,
            updated,
            missing,
        })
    }

    pub async fn delete(&self, user: &str, symbols: &[String]) -> GatewayResult<u64> {
        let result = sqlx::query("DELETE FROM ticker_instruments WHERE user_id = $1 AND symbol = ANY($2)")
            .bind(user)
            .bind(symbols)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list(&self, user: &str) -> GatewayResult<Vec<WatchlistEntry>> {
        let rows = sqlx::query_as::<_, WatchlistEntry>(
            "SELECT user_id, symbol, instrument_token, updated_at FROM ticker_instruments WHERE user_id = $1 ORDER BY symbol",
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self, user: &str) -> GatewayResult<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ticker_instruments WHERE user_id = $1")
                .bind(user)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Truncate the entire watchlist table (all users) in a single
    /// transaction, returning the row count that existed beforehand.
    pub async fn truncate_all(&self) -> GatewayResult<i64> {
        let mut tx = self.pool.begin().await?;
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ticker_instruments")
            .fetch_one(&mut *tx)
            .await?;
        sqlx::query("TRUNCATE TABLE ticker_instruments")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(prior_count = row.0, "watchlist truncated");
        Ok(row.0)
    }

    /// Run a registry query then upsert every matching instrument's symbol
    /// into `user`'s watchlist, as used by the scheduler's universe refresh.
    pub async fn refresh_from_query(
        &self,
        user: &str,
        filter: &InstrumentFilter,
    ) -> GatewayResult<RefreshOutcome> {
        let matches = self.registry.query(filter).await?;
        let symbols: Vec<String> = matches.iter().map(Instrument::symbol).collect();
        let queried = symbols.len();

        if symbols.is_empty() {
            return Ok(RefreshOutcome {
                queried,
                inserted: 0,
                updated: 0,
            });
        }

        let outcome = self.add(user, &symbols).await?;
        Ok(RefreshOutcome {
            queried,
            inserted: outcome.inserted,
            updated: outcome.updated,
        })
    }
}

#[cfg(test)]
mod tests {
    // Exercised against a live Postgres in integration tests; the logic here
    // (inserted-vs-updated via `xmax = 0`) is a well-known Postgres idiom and
    // has no pure-function surface to unit test without a connection.
}
