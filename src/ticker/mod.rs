// =============================================================================
// Upstream Ticker Client — capability surface (spec §4.C)
// =============================================================================
//
// The spec treats the upstream ticker as an external collaborator: "assumed
// library; interface only". `TickerClient` is that interface boundary. A
// concrete `WebSocketTickerClient` is provided (see `client.rs`), grounded in
// the teacher's `tokio-tungstenite`-based stream tasks, but every caller
// (Lifecycle Controller, Fan-out Bus) depends only on the trait — per the
// cyclic-reference note in spec §9, callbacks are wrapped into a typed
// channel of `TickerEvent`s so the state machine becomes a plain
// `tokio::select!` loop rather than reentrant callback invocations.
// =============================================================================

pub mod client;
pub mod codec;

use async_trait::async_trait;

use crate::types::{TickMode, Tick};

/// Everything the upstream can tell us, flattened into one channel-friendly
/// enum. This is the wrapped form of spec §4.C's six callbacks
/// (`on_connect`, `on_close`, `on_error`, `on_reconnect`, `on_no_reconnect`,
/// `on_tick`).
#[derive(Debug, Clone)]
pub enum TickerEvent {
    Connected,
    Closed { code: u16, reason: String },
    Error(String),
    Reconnecting { attempt: u32, delay_ms: u64 },
    NoReconnect { attempt: u32 },
    Tick(Tick),
}

/// The capability surface consumed by the Lifecycle Controller (4.F).
///
/// Implementations own exactly one upstream connection; `serve` blocks until
/// the connection is terminally closed (either via `stop()` or exhausting
/// the reconnect budget) and emits every state transition as a
/// [`TickerEvent`] on the channel supplied at construction.
#[async_trait]
pub trait TickerClient: Send + Sync {
    async fn connect(&self, user: &str, enctoken: &str) -> anyhow::Result<()>;

    /// Blocking serve loop. Returns once the client is terminally closed.
    async fn serve(&self) -> anyhow::Result<()>;

    async fn subscribe(&self, tokens: &[u32]) -> anyhow::Result<()>;
    async fn set_mode(&self, mode: TickMode, tokens: &[u32]) -> anyhow::Result<()>;
    async fn unsubscribe(&self, tokens: &[u32]) -> anyhow::Result<()>;

    /// Close the current socket (library may reconnect, depending on
    /// `set_reconnect_max`).
    async fn close(&self) -> anyhow::Result<()>;

    /// Terminally stop: no further reconnect attempts, `serve()` returns.
    async fn stop(&self) -> anyhow::Result<()>;

    fn set_reconnect_max(&self, n: u32);
}
