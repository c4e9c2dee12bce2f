// =============================================================================
// Kite Ticker Gateway — Main Entry Point
// =============================================================================
//
// Startup order matters here because of the Fan-out Bus / Lifecycle
// Controller cyclic reference (spec §9): the Lifecycle Controller is built
// first (it can implement `SubscriptionActuator` on its own), the Fan-out Bus
// is built second holding the controller as its actuator, and the Lifecycle
// Controller is handed the finished bus last via `attach_fanout`.
// =============================================================================

mod api;
mod bridge;
mod config;
mod db;
mod error;
mod fanout;
mod ingestion;
mod lifecycle;
mod scheduler;
mod session;
mod state;
mod ticker;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::bridge::ChangeBridge;
use crate::config::Config;
use crate::db::indices::IndicesStore;
use crate::db::instruments::InstrumentRegistry;
use crate::db::state_kv::StateStore;
use crate::db::ticks::TickStore;
use crate::db::watchlist::WatchlistStore;
use crate::fanout::{FanoutBus, SubscriptionActuator};
use crate::ingestion::{IngestionPipeline, SymbolResolver};
use crate::lifecycle::LifecycleController;
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::session::InMemorySessionService;
use crate::state::AppState;

/// Bridges the Ingestion Pipeline's `SymbolResolver` dependency (spec §9) to
/// the Instrument Registry without coupling the two modules directly.
struct RegistrySymbolResolver {
    registry: InstrumentRegistry,
}

#[async_trait]
impl SymbolResolver for RegistrySymbolResolver {
    async fn resolve(&self, token: u32) -> Option<String> {
        let resolved = self
            .registry
            .lookup_by_tokens(&[token as i64])
            .await
            .unwrap_or_default();
        resolved.get(&(token as i64)).cloned()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("kite-ticker-gateway starting up");

    let config = Config::load_from_env();

    // ── Persistence ───────────────────────────────────────────────────────
    let pool = db::connect(&config.database_url).await?;

    let registry = InstrumentRegistry::new(pool.clone());
    let watchlist = WatchlistStore::new(pool.clone(), registry.clone());
    let tick_store = TickStore::new(pool.clone());
    let state_store = StateStore::new(pool.clone());
    let indices_store = IndicesStore::new(pool.clone());

    // ── Ingestion pipeline (built first so the Lifecycle Controller can
    //    be handed its sender at construction) ─────────────────────────────
    let resolver: Arc<dyn SymbolResolver> = Arc::new(RegistrySymbolResolver {
        registry: registry.clone(),
    });
    let ingestion = IngestionPipeline::spawn(tick_store.clone(), resolver);

    // ── Lifecycle Controller / Fan-out Bus (cyclic reference, see module
    //    docs) ────────────────────────────────────────────────────────────
    let lifecycle = LifecycleController::new(watchlist.clone(), ingestion.sender(), config.upstream_ws_url.clone());
    let fanout = FanoutBus::new(lifecycle.clone() as Arc<dyn SubscriptionActuator>);
    lifecycle.attach_fanout(fanout.clone());

    // ── Change-notification bridge ───────────────────────────────────────
    let bridge = Arc::new(ChangeBridge::new());
    {
        let bridge = bridge.clone();
        let database_url = config.database_url.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.run(&database_url).await {
                warn!(error = %e, "change-notification bridge exited");
            }
        });
    }

    // ── Scheduler ─────────────────────────────────────────────────────────
    let scheduler = Scheduler::new(
        registry.clone(),
        watchlist.clone(),
        state_store.clone(),
        tick_store.clone(),
        indices_store.clone(),
        lifecycle.clone(),
        SchedulerConfig {
            http_client: reqwest::Client::new(),
            instruments_csv_url: config.instruments_csv_url.clone(),
            indices_url: config.indices_url.clone(),
            nse_index_constituents: config.nse_index_constituents.clone(),
            service_user: config.upstream_user_id.clone(),
            service_token_env: config.upstream_enctoken_env.clone(),
        },
    );
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                warn!(error = %e, "scheduler exited");
            }
        });
    }

    // ── HTTP surface ──────────────────────────────────────────────────────
    let app_state = Arc::new(AppState {
        registry,
        watchlist,
        tick_store,
        state_store,
        lifecycle,
        fanout,
        bridge,
        session: Arc::new(InMemorySessionService::new()),
    });

    let router = api::router(app_state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gateway shut down complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install ctrl-c handler");
        return;
    }
    warn!("shutdown signal received");
}
