// =============================================================================
// Instrument-master CSV import (spec §4.A refresh source; §1 scope note:
// only the *origin* of the CSV bytes is a thin external call — the parsing
// and registry write are fully in-scope)
// =============================================================================

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use crate::types::Instrument;

#[derive(Debug, Deserialize)]
struct InstrumentRecord {
    instrument_token: i64,
    exchange: String,
    tradingsymbol: String,
    name: String,
    #[serde(default)]
    expiry: String,
    #[serde(default)]
    strike: f64,
    segment: String,
    instrument_type: String,
    #[serde(default)]
    lot_size: i32,
    #[serde(default)]
    tick_size: f64,
    #[serde(default)]
    last_price: f64,
}

/// Download and parse the newline-delimited instrument-master CSV. Rows
/// that fail to parse are logged and skipped rather than aborting the whole
/// import — a handful of malformed rows should not block a refresh that
/// otherwise has tens of thousands of valid ones.
pub async fn fetch_instruments(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<Instrument>> {
    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    Ok(parse_instruments_csv(&body))
}

fn parse_instruments_csv(body: &str) -> Vec<Instrument> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(body.as_bytes());
    let mut out = Vec::new();

    for result in reader.deserialize::<InstrumentRecord>() {
        match result {
            Ok(rec) => {
                let expiry = if rec.expiry.trim().is_empty() {
                    None
                } else {
                    NaiveDate::parse_from_str(rec.expiry.trim(), "%Y-%m-%d").ok()
                };
                out.push(Instrument {
                    instrument_token: rec.instrument_token,
                    exchange: rec.exchange,
                    tradingsymbol: rec.tradingsymbol,
                    name: rec.name,
                    expiry,
                    strike: rec.strike,
                    segment: rec.segment,
                    instrument_type: rec.instrument_type,
                    lot_size: rec.lot_size,
                    tick_size: rec.tick_size,
                    last_price: rec.last_price,
                });
            }
            Err(e) => warn!(error = %e, "skipping malformed instrument CSV row"),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_rows_and_skips_malformed_ones() {
        let csv = "instrument_token,exchange,tradingsymbol,name,expiry,strike,segment,instrument_type,lot_size,tick_size,last_price\n\
                    738561,NSE,RELIANCE,RELIANCE INDUSTRIES,,0,EQ,EQ,1,0.05,2500.0\n\
                    not-a-number,NFO,BADROW,BAD ROW,,0,NFO-FUT,FUT,1,0.05,0\n";
        let rows = parse_instruments_csv(csv);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tradingsymbol, "RELIANCE");
        assert_eq!(rows[0].expiry, None);
    }

    #[test]
    fn parses_expiry_date() {
        let csv = "instrument_token,exchange,tradingsymbol,name,expiry,strike,segment,instrument_type,lot_size,tick_size,last_price\n\
                    123,NFO,NIFTY24OCTFUT,NIFTY,2024-10-31,0,NFO-FUT,FUT,50,0.05,0\n";
        let rows = parse_instruments_csv(csv);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].expiry, NaiveDate::from_ymd_opt(2024, 10, 31));
    }
}
