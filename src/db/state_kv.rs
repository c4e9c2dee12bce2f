// =============================================================================
// Scheduler state table — job idempotency markers (spec §4.G)
// =============================================================================

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::GatewayResult;

#[derive(Clone)]
pub struct StateStore {
    pool: PgPool,
}

impl StateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str) -> GatewayResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM state WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn get_timestamp(&self, key: &str) -> GatewayResult<Option<DateTime<Utc>>> {
        let value = self.get(key).await?;
        Ok(value.and_then(|v| DateTime::parse_from_rfc3339(&v).ok().map(|d| d.with_timezone(&Utc))))
    }

    pub async fn set_now(&self, key: &str) -> GatewayResult<()> {
        let value = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO state (key, value, updated_at) VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
