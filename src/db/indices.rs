// =============================================================================
// Configured NSE index list (spec §4.G "indices refresh" / §6 Database)
// =============================================================================
//
// Backs the scheduler's "indices refresh" startup/cron job: the fetched list
// of index names is truncated and reinserted atomically, same pattern as the
// Instrument Registry's `refresh`. The watchlist refresh job's item (d) reads
// this table to resolve "the constituents of a configured set of NSE
// indices" (spec §4.G) against the Instrument Registry.
// =============================================================================

use sqlx::PgPool;
use tracing::info;

use crate::error::GatewayResult;

#[derive(Clone)]
pub struct IndicesStore {
    pool: PgPool,
}

impl IndicesStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Truncate and bulk-insert the fetched index name list in one
    /// transaction, matching the Instrument Registry's refresh contract.
    pub async fn replace_all(&self, names: &[String]) -> GatewayResult<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("TRUNCATE TABLE indices").execute(&mut *tx).await?;
        for name in names {
            sqlx::query(
                "INSERT INTO indices (name, updated_at) VALUES ($1, now()) ON CONFLICT (name) DO UPDATE SET updated_at = EXCLUDED.updated_at",
            )
            .bind(name)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(count = names.len(), "index list refreshed");
        Ok(names.len())
    }

    pub async fn list(&self) -> GatewayResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM indices ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }
}
