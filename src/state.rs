// =============================================================================
// AppState — construction-time wiring for every subsystem handle
// =============================================================================
//
// This repo's analogue of the teacher's `app_state.rs`: one struct holding
// `Arc`-wrapped handles to every subsystem, built once in `main` and passed
// to the router as shared state (spec §5/§9).
// =============================================================================

use std::sync::Arc;

use axum::extract::FromRef;

use crate::bridge::ChangeBridge;
use crate::db::instruments::InstrumentRegistry;
use crate::db::state_kv::StateStore;
use crate::db::ticks::TickStore;
use crate::db::watchlist::WatchlistStore;
use crate::fanout::FanoutBus;
use crate::lifecycle::LifecycleController;
use crate::session::SessionService;

pub struct AppState {
    pub registry: InstrumentRegistry,
    pub watchlist: WatchlistStore,
    pub tick_store: TickStore,
    pub state_store: StateStore,
    pub lifecycle: Arc<LifecycleController>,
    pub fanout: Arc<FanoutBus>,
    pub bridge: Arc<ChangeBridge>,
    pub session: Arc<dyn SessionService>,
}

impl FromRef<Arc<AppState>> for Arc<dyn SessionService> {
    fn from_ref(state: &Arc<AppState>) -> Self {
        state.session.clone()
    }
}
