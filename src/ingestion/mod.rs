// =============================================================================
// Ingestion Pipeline (spec §4.D)
// =============================================================================
//
// Single producer (the upstream ticker's `on_tick` callback), three
// consumer tasks: processor, flusher, capacity monitor. The processor never
// blocks the producer beyond the channel enqueue itself; the in-flight
// batch is owned exclusively by the processor/flusher pair, matching the
// teacher's convention of giving each subsystem its own guarded state rather
// than a shared `AppState` field.
// =============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Duration;
use tracing::warn;

use crate::db::ticks::{dedup_keep_latest, PersistedTick, TickStore};
use crate::types::{round_half_away_from_zero_2dp, Tick};

/// Bounded channel depth between the upstream callback and the processor
/// task (spec §4.D).
pub const CHANNEL_CAPACITY: usize = 100_000;
/// Flush on batch size reaching this threshold.
pub const FLUSH_BATCH_SIZE: usize = 1_000;
/// Flush on this periodic tick, whichever trigger fires first.
pub const FLUSH_INTERVAL: Duration = Duration::from_micros(100);
/// Capacity monitor cadence.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(10);
/// Fill fraction at or above which the monitor emits a warning.
pub const MONITOR_FILL_THRESHOLD: f64 = 0.5;

/// Resolves an instrument token to its canonical symbol against the current
/// subscription map. Decouples the pipeline from the Fan-out Bus / Watchlist
/// Store's concrete types (spec §9 cyclic-reference note).
#[async_trait]
pub trait SymbolResolver: Send + Sync {
    async fn resolve(&self, token: u32) -> Option<String>;
}

/// Owns the ingest channel's sending half; the processor, flusher, and
/// monitor tasks are spawned once at construction and run for the lifetime
/// of the process.
pub struct IngestionPipeline {
    sender: mpsc::Sender<Tick>,
}

impl IngestionPipeline {
    pub fn spawn(store: TickStore, resolver: Arc<dyn SymbolResolver>) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let batch: Arc<SyncMutex<Vec<PersistedTick>>> = Arc::new(SyncMutex::new(Vec::new()));
        let flush_notify = Arc::new(Notify::new());

        tokio::spawn(run_processor(rx, resolver, batch.clone(), flush_notify.clone()));
        tokio::spawn(run_flusher(store, batch, flush_notify));
        tokio::spawn(run_monitor(tx.clone()));

        Self { sender: tx }
    }

    /// Clone of the sending half, handed to the Lifecycle Controller so it
    /// can wire the upstream ticker's `on_tick` callback into this pipeline.
    pub fn sender(&self) -> mpsc::Sender<Tick> {
        self.sender.clone()
    }
}

async fn run_processor(
    mut rx: mpsc::Receiver<Tick>,
    resolver: Arc<dyn SymbolResolver>,
    batch: Arc<SyncMutex<Vec<PersistedTick>>>,
    flush_notify: Arc<Notify>,
) {
    while let Some(mut tick) = rx.recv().await {
        let symbol = match resolver.resolve(tick.instrument_token).await {
            Some(s) => s,
            None => {
                warn!(token = tick.instrument_token, "no symbol for token, dropping tick");
                continue;
            }
        };

        tick.net_change = tick.net_change.map(round_half_away_from_zero_2dp);

        let persisted = PersistedTick {
            symbol,
            tick,
            updated_at: Utc::now(),
        };

        let should_flush = {
            let mut guard = batch.lock();
            guard.push(persisted);
            guard.len() >= FLUSH_BATCH_SIZE
        };
        if should_flush {
            flush_notify.notify_one();
        }
    }
}

async fn run_flusher(
    store: TickStore,
    batch: Arc<SyncMutex<Vec<PersistedTick>>>,
    flush_notify: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = flush_notify.notified() => {}
        }

        let drained: Vec<PersistedTick> = {
            let mut guard = batch.lock();
            if guard.is_empty() {
                continue;
            }
            std::mem::take(&mut *guard)
        };

        let count = drained.len();
        let deduped = dedup_keep_latest(drained);
        if let Err(e) = store.upsert_batch(&deduped).await {
            warn!(error = %e, count, "tick flush failed, batch dropped");
        }
    }
}

async fn run_monitor(sender: mpsc::Sender<Tick>) {
    let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        ticker.tick().await;
        let fill = fill_fraction(CHANNEL_CAPACITY, sender.capacity());
        if fill >= MONITOR_FILL_THRESHOLD {
            warn!(fill, "ingestion channel fill at or above warning threshold");
        }
    }
}

/// Fraction of `capacity` currently occupied, given the channel's reported
/// free `available` permits. Split out as a pure function for testing.
fn fill_fraction(capacity: usize, available: usize) -> f64 {
    let in_flight = capacity.saturating_sub(available);
    in_flight as f64 / capacity as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_fraction_at_half_capacity_is_half() {
        assert!((fill_fraction(100_000, 50_000) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn fill_fraction_empty_channel_is_zero() {
        assert_eq!(fill_fraction(100_000, 100_000), 0.0);
    }

    #[test]
    fn fill_fraction_full_channel_is_one() {
        assert_eq!(fill_fraction(100_000, 0), 1.0);
    }
}
