// =============================================================================
// WebSocketTickerClient — concrete upstream ticker (spec §4.C)
// =============================================================================
//
// Reconnect-loop shape lifted from the teacher's `market_data/trade_stream.rs`
// (`tokio_tungstenite::connect_async`, read-loop returning on disconnect for
// caller-driven reconnect) generalized with the bounded-attempt / backoff
// policy the Lifecycle Controller (4.F) expects the client to own internally.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::codec;
use super::{TickerClient, TickerEvent};
use crate::types::TickMode;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;

fn backoff_for_attempt(attempt: u32) -> u64 {
    (INITIAL_BACKOFF_MS.saturating_mul(attempt as u64)).min(MAX_BACKOFF_MS)
}

pub struct WebSocketTickerClient {
    base_url: String,
    events: mpsc::Sender<TickerEvent>,
    reconnect_max: AtomicU32,
    stop_flag: Arc<AtomicBool>,
    credentials: SyncMutex<Option<(String, String)>>,
    subscribed: SyncMutex<Vec<u32>>,
    mode_by_token: SyncMutex<HashMap<u32, TickMode>>,
    writer: AsyncMutex<Option<WsWriter>>,
}

impl WebSocketTickerClient {
    pub fn new(base_url: impl Into<String>, events: mpsc::Sender<TickerEvent>) -> Self {
        Self {
            base_url: base_url.into(),
            events,
            reconnect_max: AtomicU32::new(10),
            stop_flag: Arc::new(AtomicBool::new(false)),
            credentials: SyncMutex::new(None),
            subscribed: SyncMutex::new(Vec::new()),
            mode_by_token: SyncMutex::new(HashMap::new()),
            writer: AsyncMutex::new(None),
        }
    }

    async fn send_command(&self, value: serde_json::Value) -> anyhow::Result<()> {
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            writer.send(Message::Text(value.to_string())).await?;
        }
        Ok(())
    }

    async fn resubscribe_all(&self) {
        let tokens = self.subscribed.lock().clone();
        if tokens.is_empty() {
            return;
        }
        let _ = self
            .send_command(serde_json::json!({"a": "subscribe", "v": tokens}))
            .await;

        let by_mode = self.mode_by_token.lock().clone();
        let mut grouped: HashMap<TickMode, Vec<u32>> = HashMap::new();
        for (token, mode) in by_mode {
            grouped.entry(mode).or_default().push(token);
        }
        for (mode, toks) in grouped {
            let _ = self
                .send_command(serde_json::json!({"a": "mode", "v": [mode.to_string(), toks]}))
                .await;
        }
    }

    async fn run_connection(&self) -> ConnectionOutcome {
        let (user, enctoken) = match self.credentials.lock().clone() {
            Some(c) => c,
            None => {
                return ConnectionOutcome::Error("connect() was never called".into());
            }
        };

        let url = format!("{}?user_id={}&enctoken={}", self.base_url, user, enctoken);
        let (ws_stream, _) = match connect_async(&url).await {
            Ok(pair) => pair,
            Err(e) => return ConnectionOutcome::Error(e.to_string()),
        };

        let _ = self.events.send(TickerEvent::Connected).await;
        info!(url = %self.base_url, "ticker connected");

        let (write, mut read) = ws_stream.split();
        *self.writer.lock().await = Some(write);
        self.resubscribe_all().await;

        loop {
            if self.stop_flag.load(Ordering::Relaxed) {
                *self.writer.lock().await = None;
                return ConnectionOutcome::Stopped;
            }

            match read.next().await {
                Some(Ok(Message::Binary(data))) => {
                    for tick in codec::decode_frame(&data) {
                        if self.events.send(TickerEvent::Tick(tick)).await.is_err() {
                            *self.writer.lock().await = None;
                            return ConnectionOutcome::Stopped;
                        }
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    debug!("ticker heartbeat frame");
                }
                Some(Ok(Message::Text(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1000, String::new()));
                    *self.writer.lock().await = None;
                    return ConnectionOutcome::Closed { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    *self.writer.lock().await = None;
                    return ConnectionOutcome::Error(e.to_string());
                }
                None => {
                    *self.writer.lock().await = None;
                    return ConnectionOutcome::Closed {
                        code: 1006,
                        reason: "stream ended".into(),
                    };
                }
            }
        }
    }
}

enum ConnectionOutcome {
    Stopped,
    Closed { code: u16, reason: String },
    Error(String),
}

#[async_trait]
impl TickerClient for WebSocketTickerClient {
    async fn connect(&self, user: &str, enctoken: &str) -> anyhow::Result<()> {
        *self.credentials.lock() = Some((user.to_string(), enctoken.to_string()));
        Ok(())
    }

    async fn serve(&self) -> anyhow::Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if self.stop_flag.load(Ordering::Relaxed) {
                return Ok(());
            }

            match self.run_connection().await {
                ConnectionOutcome::Stopped => return Ok(()),
                ConnectionOutcome::Closed { code, reason } => {
                    let _ = self
                        .events
                        .send(TickerEvent::Closed { code, reason })
                        .await;
                }
                ConnectionOutcome::Error(message) => {
                    warn!(error = %message, "ticker connection error");
                    let _ = self.events.send(TickerEvent::Error(message)).await;
                }
            }

            if self.stop_flag.load(Ordering::Relaxed) {
                return Ok(());
            }

            attempt += 1;
            let max = self.reconnect_max.load(Ordering::Relaxed);
            if attempt > max {
                let _ = self.events.send(TickerEvent::NoReconnect { attempt }).await;
                return Ok(());
            }

            let delay_ms = backoff_for_attempt(attempt);
            let _ = self
                .events
                .send(TickerEvent::Reconnecting { attempt, delay_ms })
                .await;
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    async fn subscribe(&self, tokens: &[u32]) -> anyhow::Result<()> {
        {
            let mut subscribed = self.subscribed.lock();
            for t in tokens {
                if !subscribed.contains(t) {
                    subscribed.push(*t);
                }
            }
        }
        self.send_command(serde_json::json!({"a": "subscribe", "v": tokens}))
            .await
    }

    async fn set_mode(&self, mode: TickMode, tokens: &[u32]) -> anyhow::Result<()> {
        {
            let mut by_mode = self.mode_by_token.lock();
            for t in tokens {
                by_mode.insert(*t, mode);
            }
        }
        self.send_command(serde_json::json!({"a": "mode", "v": [mode.to_string(), tokens]}))
            .await
    }

    async fn unsubscribe(&self, tokens: &[u32]) -> anyhow::Result<()> {
        {
            let mut subscribed = self.subscribed.lock();
            subscribed.retain(|t| !tokens.contains(t));
            let mut by_mode = self.mode_by_token.lock();
            for t in tokens {
                by_mode.remove(t);
            }
        }
        self.send_command(serde_json::json!({"a": "unsubscribe", "v": tokens}))
            .await
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            let _ = writer.send(Message::Close(None)).await;
        }
        *guard = None;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.close().await
    }

    fn set_reconnect_max(&self, n: u32) {
        self.reconnect_max.store(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        assert_eq!(backoff_for_attempt(1), 1_000);
        assert_eq!(backoff_for_attempt(5), 5_000);
        assert_eq!(backoff_for_attempt(100), MAX_BACKOFF_MS);
    }
}
