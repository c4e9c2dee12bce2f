// =============================================================================
// TickSnapshot store (spec §3 / §4.D) — last-value-per-instrument
// =============================================================================
//
// Exclusively written by the Ingestion Pipeline's flusher; read by the quote
// endpoints and indirectly observed (via NOTIFY) by the change-notification
// bridge. The underlying table is UNLOGGED: durability is traded for write
// throughput, per spec §9.
// =============================================================================

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::GatewayResult;
use crate::types::{Tick, TickSnapshotRow};

/// A tick ready to be written: the upstream `Tick` plus the symbol resolved
/// by the pipeline's processor stage and the moment it was accepted.
#[derive(Debug, Clone)]
pub struct PersistedTick {
    pub symbol: String,
    pub tick: Tick,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TickStore {
    pool: PgPool,
}

impl TickStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert every row in `batch`, keyed on `instrument_token`, updating all
    /// mutable columns. Callers are expected to have already deduplicated by
    /// `instrument_token` keeping the entry with the largest `updated_at`
    /// (spec §4.D flush contract) — this method does not re-dedup.
    pub async fn upsert_batch(&self, batch: &[PersistedTick]) -> GatewayResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for row in batch {
            let t = &row.tick;
            let ohlc_json = t.ohlc.map(|o| serde_json::to_value(o).unwrap_or_default());
            let depth_json = t
                .depth
                .as_ref()
                .map(|d| serde_json::to_value(d).unwrap_or_default());

            sqlx::query(
                r#"
                INSERT INTO ticker_data (
                    instrument_token, symbol, mode, is_tradable, is_index,
                    timestamp, last_trade_time, last_price, last_traded_quantity,
                    total_buy_quantity, total_sell_quantity, volume,
                    average_trade_price, oi, oi_day_high, oi_day_low, net_change,
                    ohlc, depth, updated_at
                ) VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20
                )
                ON CONFLICT (instrument_token) DO UPDATE SET
                    symbol = EXCLUDED.symbol,
                    mode = EXCLUDED.mode,
                    is_tradable = EXCLUDED.is_tradable,
                    is_index = EXCLUDED.is_index,
                    timestamp = EXCLUDED.timestamp,
                    last_trade_time = EXCLUDED.last_trade_time,
                    last_price = EXCLUDED.last_price,
                    last_traded_quantity = EXCLUDED.last_traded_quantity,
                    total_buy_quantity = EXCLUDED.total_buy_quantity,
                    total_sell_quantity = EXCLUDED.total_sell_quantity,
                    volume = EXCLUDED.volume,
                    average_trade_price = EXCLUDED.average_trade_price,
                    oi = EXCLUDED.oi,
                    oi_day_high = EXCLUDED.oi_day_high,
                    oi_day_low = EXCLUDED.oi_day_low,
                    net_change = EXCLUDED.net_change,
                    ohlc = EXCLUDED.ohlc,
                    depth = EXCLUDED.depth,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(t.instrument_token as i64)
            .bind(&row.symbol)
            .bind(t.mode.to_string())
            .bind(t.is_tradable)
            .bind(t.is_index)
            .bind(t.timestamp.map(ts_to_datetime))
            .bind(t.last_trade_time.map(ts_to_datetime))
            .bind(t.last_price)
            .bind(t.last_traded_quantity.map(i64::from))
            .bind(t.total_buy_quantity.map(i64::from))
            .bind(t.total_sell_quantity.map(i64::from))
            .bind(t.volume.map(i64::from))
            .bind(t.average_trade_price)
            .bind(t.oi.map(i64::from))
            .bind(t.oi_day_high.map(i64::from))
            .bind(t.oi_day_low.map(i64::from))
            .bind(t.net_change)
            .bind(ohlc_json)
            .bind(depth_json)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Truncate the entire snapshot table, used by the scheduler's daily
    /// tick-table truncate job.
    pub async fn truncate(&self) -> GatewayResult<()> {
        sqlx::query("TRUNCATE TABLE ticker_data")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_by_symbols(&self, symbols: &[String]) -> GatewayResult<Vec<TickSnapshotRow>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, TickSnapshotRow>(
            "SELECT * FROM ticker_data WHERE symbol = ANY($1)",
        )
        .bind(symbols)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn ts_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

/// Deduplicate a batch by `instrument_token`, keeping the entry with the
/// largest `updated_at` (spec §4.D / §8 scenario 3).
pub fn dedup_keep_latest(batch: Vec<PersistedTick>) -> Vec<PersistedTick> {
    use std::collections::HashMap;

    let mut by_token: HashMap<u32, PersistedTick> = HashMap::with_capacity(batch.len());
    for item in batch {
        by_token
            .entry(item.tick.instrument_token)
            .and_modify(|existing| {
                if item.updated_at > existing.updated_at {
                    *existing = item.clone();
                }
            })
            .or_insert(item);
    }
    by_token.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TickMode;

    fn tick(token: u32, price: f64) -> Tick {
        Tick {
            instrument_token: token,
            mode: TickMode::Ltp,
            is_tradable: true,
            is_index: false,
            timestamp: None,
            last_trade_time: None,
            last_price: price,
            last_traded_quantity: None,
            total_buy_quantity: None,
            total_sell_quantity: None,
            volume: None,
            average_trade_price: None,
            oi: None,
            oi_day_high: None,
            oi_day_low: None,
            net_change: None,
            ohlc: None,
            depth: None,
        }
    }

    #[test]
    fn dedup_keeps_entry_with_largest_updated_at() {
        let base = Utc::now();
        let batch = vec![
            PersistedTick {
                symbol: "NSE:RELIANCE".into(),
                tick: tick(738561, 100.0),
                updated_at: base,
            },
            PersistedTick {
                symbol: "NSE:RELIANCE".into(),
                tick: tick(738561, 101.0),
                updated_at: base + chrono::Duration::microseconds(1),
            },
            PersistedTick {
                symbol: "NSE:RELIANCE".into(),
                tick: tick(738561, 102.0),
                updated_at: base + chrono::Duration::microseconds(2),
            },
        ];

        let result = dedup_keep_latest(batch);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].tick.last_price, 102.0);
    }

    #[test]
    fn dedup_preserves_distinct_tokens() {
        let base = Utc::now();
        let batch = vec![
            PersistedTick {
                symbol: "NSE:RELIANCE".into(),
                tick: tick(738561, 100.0),
                updated_at: base,
            },
            PersistedTick {
                symbol: "NSE:TCS".into(),
                tick: tick(2953217, 3500.0),
                updated_at: base,
            },
        ];
        let result = dedup_keep_latest(batch);
        assert_eq!(result.len(), 2);
    }
}
