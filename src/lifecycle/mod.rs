// =============================================================================
// Lifecycle Controller (spec §4.F)
// =============================================================================
//
// Owns the single upstream connection's state machine. Grounded in the
// teacher's `main.rs` reconnect-loop-with-backoff idiom, generalized here
// into an explicit state enum behind one lock, per spec §5's "one mutex"
// shared-resource policy. `LifecycleController` is itself the
// `SubscriptionActuator` the Fan-out Bus depends on, so `attach` can always
// reach whichever client instance is currently live without caring about
// restarts.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::db::watchlist::WatchlistStore;
use crate::error::{GatewayError, GatewayResult};
use crate::fanout::{FanoutBus, SubscriptionActuator};
use crate::ticker::client::WebSocketTickerClient;
use crate::ticker::{TickerClient, TickerEvent};
use crate::types::{Tick, TickMode};

const RECONNECT_MAX: u32 = 10;
const CONNECT_DEADLINE: Duration = Duration::from_secs(10);
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STOP_DRAIN_DELAY: Duration = Duration::from_secs(1);
const RESTART_SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerState {
    Idle,
    Connected,
    Disconnected,
    Failed,
}

pub struct LifecycleController {
    /// Serializes `start`/`stop`/`restart` so transitions never overlap.
    transition_lock: AsyncMutex<()>,
    status: Arc<SyncMutex<TickerState>>,
    client: SyncMutex<Option<Arc<dyn TickerClient>>>,
    is_running: Arc<AtomicBool>,
    watchlist: WatchlistStore,
    fanout: SyncMutex<Option<Arc<FanoutBus>>>,
    ingest_tx: mpsc::Sender<Tick>,
    ws_url: String,
}

impl LifecycleController {
    pub fn new(watchlist: WatchlistStore, ingest_tx: mpsc::Sender<Tick>, ws_url: String) -> Arc<Self> {
        Arc::new(Self {
            transition_lock: AsyncMutex::new(()),
            status: Arc::new(SyncMutex::new(TickerState::Idle)),
            client: SyncMutex::new(None),
            is_running: Arc::new(AtomicBool::new(false)),
            watchlist,
            fanout: SyncMutex::new(None),
            ingest_tx,
            ws_url,
        })
    }

    /// Wired in after construction since `FanoutBus::new` itself needs an
    /// `Arc<dyn SubscriptionActuator>` pointing back at this controller —
    /// breaking what would otherwise be an unconstructible cycle.
    pub fn attach_fanout(&self, fanout: Arc<FanoutBus>) {
        *self.fanout.lock() = Some(fanout);
    }

    /// The boolean the REST `/ticker/status` endpoint reports.
    pub fn status(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    async fn resolve_universe(&self, user: &str) -> GatewayResult<Vec<u32>> {
        let entries = self.watchlist.list(user).await?;
        Ok(entries.iter().map(|e| e.instrument_token as u32).collect())
    }

    pub async fn start(&self, user: &str, token: &str) -> GatewayResult<()> {
        let _permit = self.transition_lock.lock().await;
        if self.is_running.load(Ordering::SeqCst) {
            return Err(GatewayError::TickerException(
                "ticker is already running".into(),
            ));
        }

        let tokens = self.resolve_universe(user).await?;

        let (events_tx, events_rx) = mpsc::channel::<TickerEvent>(4096);
        let client: Arc<dyn TickerClient> =
            Arc::new(WebSocketTickerClient::new(self.ws_url.clone(), events_tx));
        client.set_reconnect_max(RECONNECT_MAX);
        client
            .connect(user, token)
            .await
            .map_err(|e| GatewayError::TickerException(e.to_string()))?;

        *self.client.lock() = Some(client.clone());
        *self.status.lock() = TickerState::Idle;

        let serve_client = client.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_client.serve().await {
                warn!(error = %e, "ticker serve loop exited with error");
            }
        });

        let fanout = self.fanout.lock().clone();
        tokio::spawn(run_event_loop(
            events_rx,
            self.status.clone(),
            fanout,
            self.ingest_tx.clone(),
            self.is_running.clone(),
        ));

        let deadline = Instant::now() + CONNECT_DEADLINE;
        loop {
            if *self.status.lock() == TickerState::Connected {
                break;
            }
            if Instant::now() >= deadline {
                *self.client.lock() = None;
                return Err(GatewayError::TickerException(
                    "timed out waiting for upstream on_connect".into(),
                ));
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }

        client
            .subscribe(&tokens)
            .await
            .map_err(|e| GatewayError::TickerException(e.to_string()))?;
        client
            .set_mode(TickMode::Full, &tokens)
            .await
            .map_err(|e| GatewayError::TickerException(e.to_string()))?;

        self.is_running.store(true, Ordering::SeqCst);
        info!(user, tokens = tokens.len(), "ticker started");
        Ok(())
    }

    pub async fn stop(&self, user: &str) -> GatewayResult<()> {
        let _permit = self.transition_lock.lock().await;
        let client = self.client.lock().clone();

        if let Some(client) = client {
            let tokens = self.resolve_universe(user).await.unwrap_or_default();
            let _ = client.unsubscribe(&tokens).await;
            let _ = client.close().await;
            let _ = client.stop().await;
        }

        tokio::time::sleep(STOP_DRAIN_DELAY).await;

        *self.client.lock() = None;
        *self.status.lock() = TickerState::Idle;
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(fanout) = self.fanout.lock().clone() {
            fanout.mark_disconnected();
        }

        info!(user, "ticker stopped");
        Ok(())
    }

    pub async fn restart(&self, user: &str, token: &str) -> GatewayResult<()> {
        if self.is_running.load(Ordering::SeqCst) {
            self.stop(user).await?;
            tokio::time::sleep(RESTART_SETTLE_DELAY).await;
        }
        self.start(user, token).await
    }
}

async fn run_event_loop(
    mut rx: mpsc::Receiver<TickerEvent>,
    status: Arc<SyncMutex<TickerState>>,
    fanout: Option<Arc<FanoutBus>>,
    ingest_tx: mpsc::Sender<Tick>,
    is_running: Arc<AtomicBool>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            TickerEvent::Connected => {
                *status.lock() = TickerState::Connected;
                if let Some(f) = &fanout {
                    f.mark_connected();
                }
            }
            TickerEvent::Closed { code, reason } => {
                *status.lock() = TickerState::Disconnected;
                info!(code, reason = %reason, "ticker closed");
                if let Some(f) = &fanout {
                    f.mark_disconnected();
                }
            }
            TickerEvent::Error(message) => {
                warn!(error = %message, "ticker error");
            }
            TickerEvent::Reconnecting { attempt, delay_ms } => {
                info!(attempt, delay_ms, "ticker reconnecting");
            }
            TickerEvent::NoReconnect { attempt } => {
                warn!(attempt, "ticker reconnect budget exhausted, marking FAILED");
                *status.lock() = TickerState::Failed;
                is_running.store(false, Ordering::SeqCst);
                if let Some(f) = &fanout {
                    f.mark_disconnected();
                }
            }
            TickerEvent::Tick(tick) => {
                if let Some(f) = &fanout {
                    f.broadcast(&tick);
                }
                if ingest_tx.send(tick).await.is_err() {
                    warn!("ingestion pipeline closed, dropping tick");
                }
            }
        }
    }
}

#[async_trait]
impl SubscriptionActuator for LifecycleController {
    async fn subscribe(&self, tokens: &[u32]) -> anyhow::Result<()> {
        let client = self.client.lock().clone();
        match client {
            Some(c) => c.subscribe(tokens).await,
            None => Err(anyhow::anyhow!("ticker is not running")),
        }
    }

    async fn set_mode(&self, mode: TickMode, tokens: &[u32]) -> anyhow::Result<()> {
        let client = self.client.lock().clone();
        match client {
            Some(c) => c.set_mode(mode, tokens).await,
            None => Err(anyhow::anyhow!("ticker is not running")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_state_variants_are_distinct() {
        assert_ne!(TickerState::Idle, TickerState::Connected);
        assert_ne!(TickerState::Disconnected, TickerState::Failed);
    }
}
