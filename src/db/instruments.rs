// =============================================================================
// Instrument Registry (spec §4.A)
// =============================================================================
//
// Master list + symbol<->token lookups + option-chain queries. Backed by the
// `instruments` table. `refresh` is the only writer; everything else is a
// read path shared by the REST handlers and the scheduler's watchlist
// universe rebuild.
// =============================================================================

use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::{PgPool, QueryBuilder};
use tracing::{info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::types::{Instrument, InstrumentFilter};

/// Batch size for bulk-insert during `refresh`, per spec §4.A.
const REFRESH_BATCH_SIZE: usize = 500;

#[derive(Clone)]
pub struct InstrumentRegistry {
    pool: PgPool,
}

/// Result of a `refresh()` call: how many rows made it in before a failure,
/// if any.
pub struct RefreshOutcome {
    pub inserted: usize,
    pub error: Option<String>,
}

impl InstrumentRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Truncate the instrument table and bulk-insert `records` in batches of
    /// [`REFRESH_BATCH_SIZE`]. If a batch fails the truncate already
    /// happened and prior batches already committed, so the returned count
    /// reflects exactly what is now in the table — never a rolled-back
    /// phantom total.
    pub async fn refresh(&self, records: Vec<Instrument>) -> GatewayResult<RefreshOutcome> {
        sqlx::query("TRUNCATE TABLE instruments")
            .execute(&self.pool)
            .await?;

        let mut inserted = 0usize;

        for batch in records.chunks(REFRESH_BATCH_SIZE) {
            match self.insert_batch(batch).await {
                Ok(n) => inserted += n,
                Err(e) => {
                    warn!(error = %e, inserted, "instrument refresh batch failed, stopping early");
                    return Ok(RefreshOutcome {
                        inserted,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(inserted, "instrument registry refreshed");
        Ok(RefreshOutcome {
            inserted,
            error: None,
        })
    }

    async fn insert_batch(&self, batch: &[Instrument]) -> GatewayResult<usize> {
        let mut tx = self.pool.begin().await?;

        for inst in batch {
            sqlx::query(
                r#"
                INSERT INTO instruments (
                    instrument_token, exchange, tradingsymbol, name, expiry,
                    strike, segment, instrument_type, lot_size, tick_size, last_price
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (instrument_token) DO UPDATE SET
                    exchange = EXCLUDED.exchange,
                    tradingsymbol = EXCLUDED.tradingsymbol,
                    name = EXCLUDED.name,
                    expiry = EXCLUDED.expiry,
                    strike = EXCLUDED.strike,
                    segment = EXCLUDED.segment,
                    instrument_type = EXCLUDED.instrument_type,
                    lot_size = EXCLUDED.lot_size,
                    tick_size = EXCLUDED.tick_size,
                    last_price = EXCLUDED.last_price
                "#,
            )
            .bind(inst.instrument_token)
            .bind(&inst.exchange)
            .bind(&inst.tradingsymbol)
            .bind(&inst.name)
            .bind(inst.expiry)
            .bind(inst.strike)
            .bind(&inst.segment)
            .bind(&inst.instrument_type)
            .bind(inst.lot_size)
            .bind(inst.tick_size)
            .bind(inst.last_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len())
    }

    /// token -> symbol, for every token that resolves.
    pub async fn lookup_by_tokens(
        &self,
        tokens: &[i64],
    ) -> GatewayResult<HashMap<i64, String>> {
        if tokens.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT instrument_token, exchange, tradingsymbol FROM instruments WHERE instrument_token = ANY($1)",
        )
        .bind(tokens)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(token, exch, sym)| (token, format!("{exch}:{sym}")))
            .collect())
    }

    /// symbol -> token. Unknown symbols are silently skipped; a malformed
    /// `exchange:symbol` string (missing the colon) is a hard error.
    pub async fn lookup_by_symbols(
        &self,
        symbols: &[String],
    ) -> GatewayResult<HashMap<String, i64>> {
        let mut pairs = Vec::with_capacity(symbols.len());
        for sym in symbols {
            let (exchange, tradingsymbol) = sym.split_once(':').ok_or_else(|| {
                GatewayError::InputException(format!("malformed symbol '{sym}', expected EXCHANGE:SYMBOL"))
            })?;
            pairs.push((exchange.to_string(), tradingsymbol.to_string()));
        }

        if pairs.is_empty() {
            return Ok(HashMap::new());
        }

        let mut out = HashMap::new();
        for (exchange, tradingsymbol) in &pairs {
            let row: Option<(i64,)> = sqlx::query_as(
                "SELECT instrument_token FROM instruments WHERE exchange = $1 AND tradingsymbol = $2",
            )
            .bind(exchange)
            .bind(tradingsymbol)
            .fetch_optional(&self.pool)
            .await?;

            if let Some((token,)) = row {
                out.insert(format!("{exchange}:{tradingsymbol}"), token);
            }
        }

        Ok(out)
    }

    /// Exact-match filter query; non-empty fields are ANDed together.
    pub async fn query(&self, filter: &InstrumentFilter) -> GatewayResult<Vec<Instrument>> {
        let mut qb = QueryBuilder::new(
            "SELECT instrument_token, exchange, tradingsymbol, name, expiry, strike, \
             segment, instrument_type, lot_size, tick_size, last_price FROM instruments WHERE 1=1",
        );

        if let Some(v) = &filter.exchange {
            qb.push(" AND exchange = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.tradingsymbol {
            qb.push(" AND tradingsymbol = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.name {
            qb.push(" AND name = ").push_bind(v.clone());
        }
        if let Some(v) = filter.expiry {
            qb.push(" AND expiry = ").push_bind(v);
        }
        if let Some(v) = filter.strike {
            qb.push(" AND strike = ").push_bind(v);
        }
        if let Some(v) = &filter.segment {
            qb.push(" AND segment = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.instrument_type {
            qb.push(" AND instrument_type = ").push_bind(v.clone());
        }

        let rows: Vec<Instrument> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    /// Nearest future (`expiry >= given`, ascending, limit 1) concatenated
    /// with all CE/PE options at the exact expiry, ordered by strike
    /// ascending.
    pub async fn option_chain(
        &self,
        exchange: &str,
        name: &str,
        expiry: NaiveDate,
    ) -> GatewayResult<Vec<Instrument>> {
        let future: Option<Instrument> = sqlx::query_as(
            r#"
            SELECT instrument_token, exchange, tradingsymbol, name, expiry, strike,
                   segment, instrument_type, lot_size, tick_size, last_price
            FROM instruments
            WHERE exchange = $1 AND name = $2 AND instrument_type = 'FUT' AND expiry >= $3
            ORDER BY expiry ASC
            LIMIT 1
            "#,
        )
        .bind(exchange)
        .bind(name)
        .bind(expiry)
        .fetch_optional(&self.pool)
        .await?;

        let mut options: Vec<Instrument> = sqlx::query_as(
            r#"
            SELECT instrument_token, exchange, tradingsymbol, name, expiry, strike,
                   segment, instrument_type, lot_size, tick_size, last_price
            FROM instruments
            WHERE exchange = $1 AND name = $2 AND instrument_type IN ('CE', 'PE') AND expiry = $3
            ORDER BY strike ASC, instrument_type ASC
            "#,
        )
        .bind(exchange)
        .bind(name)
        .bind(expiry)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(options.len() + 1);
        if let Some(f) = future {
            out.push(f);
        }
        out.append(&mut options);
        Ok(out)
    }

    /// Segment → distinct underlying names with an F&O instrument expiring
    /// on `expiry`, backing `/instruments/fno/segment_names/:expiry`.
    pub async fn segment_names(&self, expiry: NaiveDate) -> GatewayResult<HashMap<String, Vec<String>>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT DISTINCT segment, name FROM instruments
            WHERE instrument_type IN ('FUT', 'CE', 'PE') AND expiry = $1
            ORDER BY segment, name
            "#,
        )
        .bind(expiry)
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<String, Vec<String>> = HashMap::new();
        for (segment, name) in rows {
            out.entry(segment).or_default().push(name);
        }
        Ok(out)
    }

    /// Distinct `"exchange:name"` underlyings with an option expiring on
    /// `expiry`.
    pub async fn option_chain_names(&self, expiry: NaiveDate) -> GatewayResult<Vec<String>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT DISTINCT exchange, name FROM instruments
            WHERE instrument_type IN ('CE', 'PE') AND expiry = $1
            ORDER BY exchange, name
            "#,
        )
        .bind(expiry)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(exchange, name)| format!("{exchange}:{name}"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_symbol_is_rejected_before_any_query() {
        // split_once is the same logic lookup_by_symbols relies on; exercise
        // it directly so the error path is covered without a database.
        let bad = "XYZBAD";
        assert!(bad.split_once(':').is_none());
    }
}
