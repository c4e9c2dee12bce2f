// =============================================================================
// Scheduler (spec §4.G)
// =============================================================================
//
// Two job classes: one-shot startup jobs (fixed delay in seconds, fired once
// per process) and cron-expressed recurring jobs (server local time),
// matching spec's table exactly. Built on `tokio-cron-scheduler`, the crate
// already present in the wider example pack's service manifests for this
// exact "cron + startup" shape. Overlapping runs of the same job name are
// prevented with a per-job `tokio::sync::Mutex` and `try_lock` (spec §5:
// "non-overlapping per job name").
// =============================================================================

mod csv_import;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::db::indices::IndicesStore;
use crate::db::instruments::InstrumentRegistry;
use crate::db::state_kv::StateStore;
use crate::db::ticks::TickStore;
use crate::db::watchlist::WatchlistStore;
use crate::lifecycle::LifecycleController;
use crate::types::InstrumentFilter;

const INSTRUMENTS_MARKER: &str = "instruments_refresh_last_run";
const INDICES_MARKER: &str = "indices_refresh_last_run";

pub struct SchedulerConfig {
    pub http_client: reqwest::Client,
    pub instruments_csv_url: String,
    pub indices_url: String,
    pub nse_index_constituents: Vec<String>,
    pub service_user: String,
    pub service_token_env: String,
}

pub struct Scheduler {
    registry: InstrumentRegistry,
    watchlist: WatchlistStore,
    state: StateStore,
    tick_store: TickStore,
    indices: IndicesStore,
    lifecycle: Arc<LifecycleController>,
    cfg: SchedulerConfig,

    instruments_guard: Arc<AsyncMutex<()>>,
    indices_guard: Arc<AsyncMutex<()>>,
    watchlist_guard: Arc<AsyncMutex<()>>,
    tick_truncate_guard: Arc<AsyncMutex<()>>,
    ticker_start_guard: Arc<AsyncMutex<()>>,
    ticker_stop_guard: Arc<AsyncMutex<()>>,
}

impl Scheduler {
    pub fn new(
        registry: InstrumentRegistry,
        watchlist: WatchlistStore,
        state: StateStore,
        tick_store: TickStore,
        indices: IndicesStore,
        lifecycle: Arc<LifecycleController>,
        cfg: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            watchlist,
            state,
            tick_store,
            indices,
            lifecycle,
            cfg,
            instruments_guard: Arc::new(AsyncMutex::new(())),
            indices_guard: Arc::new(AsyncMutex::new(())),
            watchlist_guard: Arc::new(AsyncMutex::new(())),
            tick_truncate_guard: Arc::new(AsyncMutex::new(())),
            ticker_start_guard: Arc::new(AsyncMutex::new(())),
            ticker_stop_guard: Arc::new(AsyncMutex::new(())),
        })
    }

    /// Spawn the startup one-shot jobs (fixed-delay, fire once) and start the
    /// cron scheduler for the recurring jobs. Returns once both are running;
    /// the cron scheduler itself runs for the lifetime of the process.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        self.spawn_startup_jobs();

        let mut sched = JobScheduler::new().await?;

        sched.add(self.cron_job("0 0 8 * * Mon,Tue,Wed,Thu,Fri", {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.run_instruments_refresh().await }
            }
        })?).await?;

        sched.add(self.cron_job("0 1 8 * * Mon,Tue,Wed,Thu,Fri", {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.run_indices_refresh().await }
            }
        })?).await?;

        sched.add(self.cron_job("0 2 8 * * Mon,Tue,Wed,Thu,Fri", {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.run_watchlist_refresh().await }
            }
        })?).await?;

        sched.add(self.cron_job("0 55 8 * * Mon,Tue,Wed,Thu,Fri", {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.run_ticker_start().await }
            }
        })?).await?;

        sched.add(self.cron_job("0 59 23 * * Mon,Tue,Wed,Thu,Fri", {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.run_ticker_stop().await }
            }
        })?).await?;

        sched.start().await?;
        info!("scheduler started");
        Ok(())
    }

    fn cron_job<F, Fut>(&self, schedule: &str, f: F) -> anyhow::Result<Job>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let job = Job::new_async(schedule, move |_uuid, _lock| Box::pin(f()))?;
        Ok(job)
    }

    fn spawn_startup_jobs(self: &Arc<Self>) {
        let startups: [(u64, &'static str); 5] = [
            (1, "instruments refresh"),
            (5, "indices refresh"),
            (19, "watchlist refresh"),
            (25, "tick-table truncate"),
            (28, "ticker start"),
        ];
        for (delay, name) in startups {
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(delay)).await;
                info!(job = name, delay, "running startup job");
                match name {
                    "instruments refresh" => this.run_instruments_refresh().await,
                    "indices refresh" => this.run_indices_refresh().await,
                    "watchlist refresh" => this.run_watchlist_refresh().await,
                    "tick-table truncate" => this.run_tick_truncate().await,
                    "ticker start" => this.run_ticker_start().await,
                    _ => unreachable!(),
                }
            });
        }
    }

    async fn run_instruments_refresh(&self) {
        let Ok(guard) = self.instruments_guard.try_lock() else {
            warn!(job = "instruments refresh", "skipped, overlapping run in progress");
            return;
        };

        if let Some(ts) = self.state.get_timestamp(INSTRUMENTS_MARKER).await.ok().flatten() {
            let now = chrono::Utc::now();
            if ts.date_naive() == now.date_naive() && now.time() >= chrono::NaiveTime::from_hms_opt(8, 5, 0).unwrap() {
                info!(job = "instruments refresh", "skipped, already ran today past 08:05");
                return;
            }
        }

        match csv_import::fetch_instruments(&self.cfg.http_client, &self.cfg.instruments_csv_url).await {
            Ok(records) => match self.registry.refresh(records).await {
                Ok(outcome) => {
                    info!(job = "instruments refresh", inserted = outcome.inserted, error = ?outcome.error, "done");
                    let _ = self.state.set_now(INSTRUMENTS_MARKER).await;
                }
                Err(e) => warn!(job = "instruments refresh", error = %e, "registry write failed"),
            },
            Err(e) => warn!(job = "instruments refresh", error = %e, "CSV fetch failed"),
        }
        drop(guard);
    }

    async fn run_indices_refresh(&self) {
        let Ok(guard) = self.indices_guard.try_lock() else {
            warn!(job = "indices refresh", "skipped, overlapping run in progress");
            return;
        };

        if let Some(ts) = self.state.get_timestamp(INDICES_MARKER).await.ok().flatten() {
            if ts.date_naive() == chrono::Utc::now().date_naive() {
                info!(job = "indices refresh", "skipped, already ran today");
                return;
            }
        }

        match fetch_index_names(&self.cfg.http_client, &self.cfg.indices_url).await {
            Ok(names) => match self.indices.replace_all(&names).await {
                Ok(count) => {
                    info!(job = "indices refresh", count, "done");
                    let _ = self.state.set_now(INDICES_MARKER).await;
                }
                Err(e) => warn!(job = "indices refresh", error = %e, "index list persist failed"),
            },
            Err(e) => warn!(job = "indices refresh", error = %e, "index list fetch failed"),
        }
        drop(guard);
    }

    async fn run_watchlist_refresh(&self) {
        let Ok(guard) = self.watchlist_guard.try_lock() else {
            warn!(job = "watchlist refresh", "skipped, overlapping run in progress");
            return;
        };

        if let Err(e) = self.watchlist.truncate_all().await {
            warn!(job = "watchlist refresh", error = %e, "truncate failed, aborting cycle");
            return;
        }

        let mut queried = 0usize;
        let mut inserted = 0usize;
        let mut updated = 0usize;

        let filters = [
            InstrumentFilter {
                segment: Some("INDICES".into()),
                ..Default::default()
            },
            InstrumentFilter {
                exchange: Some("NFO".into()),
                instrument_type: Some("FUT".into()),
                ..Default::default()
            },
            InstrumentFilter {
                exchange: Some("MCX".into()),
                instrument_type: Some("FUT".into()),
                ..Default::default()
            },
        ];

        for filter in &filters {
            match self.watchlist.refresh_from_query(&self.cfg.service_user, filter).await {
                Ok(outcome) => {
                    queried += outcome.queried;
                    inserted += outcome.inserted;
                    updated += outcome.updated;
                }
                Err(e) => warn!(job = "watchlist refresh", error = %e, "query failed, continuing cycle"),
            }
        }

        // Item (d): constituents of a configured set of NSE indices, resolved
        // via the Instrument Registry. The persisted index list (refreshed by
        // the "indices refresh" job) is the candidate set; the static
        // `nse_index_constituents` config narrows it when non-empty, so an
        // operator can pin a subset without waiting on the next indices fetch.
        let persisted_indices = self.indices.list().await.unwrap_or_default();
        let configured = narrow_index_universe(persisted_indices, &self.cfg.nse_index_constituents);

        for name in &configured {
            let filter = InstrumentFilter {
                exchange: Some("NSE".into()),
                name: Some(name.clone()),
                ..Default::default()
            };
            match self.watchlist.refresh_from_query(&self.cfg.service_user, &filter).await {
                Ok(outcome) => {
                    queried += outcome.queried;
                    inserted += outcome.inserted;
                    updated += outcome.updated;
                }
                Err(e) => warn!(job = "watchlist refresh", index = %name, error = %e, "constituent query failed, continuing cycle"),
            }
        }

        info!(job = "watchlist refresh", queried, inserted, updated, "cycle complete");
        drop(guard);
    }

    async fn run_tick_truncate(&self) {
        let Ok(_guard) = self.tick_truncate_guard.try_lock() else {
            warn!(job = "tick-table truncate", "skipped, overlapping run in progress");
            return;
        };
        if let Err(e) = self.tick_store.truncate().await {
            warn!(job = "tick-table truncate", error = %e, "truncate failed");
        } else {
            info!(job = "tick-table truncate", "done");
        }
    }

    async fn run_ticker_start(&self) {
        let Ok(_guard) = self.ticker_start_guard.try_lock() else {
            warn!(job = "ticker start", "skipped, overlapping run in progress");
            return;
        };
        let token = std::env::var(&self.cfg.service_token_env).unwrap_or_default();
        if token.is_empty() {
            warn!(job = "ticker start", "no service-account token available, skipping");
            return;
        }
        match self.lifecycle.start(&self.cfg.service_user, &token).await {
            Ok(()) => info!(job = "ticker start", "done"),
            Err(e) => warn!(job = "ticker start", error = %e, "start failed"),
        }
    }

    async fn run_ticker_stop(&self) {
        let Ok(_guard) = self.ticker_stop_guard.try_lock() else {
            warn!(job = "ticker stop", "skipped, overlapping run in progress");
            return;
        };
        match self.lifecycle.stop(&self.cfg.service_user).await {
            Ok(()) => info!(job = "ticker stop", "done"),
            Err(e) => warn!(job = "ticker stop", error = %e, "stop failed"),
        }
    }
}

/// The candidate set for watchlist item (d): the persisted index list,
/// narrowed to the statically configured names when that list is non-empty
/// (an operator-pinned subset ahead of the next "indices refresh"). Falls
/// back to the full persisted list when either side is empty.
fn narrow_index_universe(persisted: Vec<String>, configured: &[String]) -> Vec<String> {
    if configured.is_empty() {
        return persisted;
    }
    configured
        .iter()
        .filter(|name| persisted.is_empty() || persisted.contains(name))
        .cloned()
        .collect()
}

async fn fetch_index_names(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<String>> {
    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    Ok(body
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruments_marker_cutoff_is_eight_oh_five() {
        let cutoff = chrono::NaiveTime::from_hms_opt(8, 5, 0).unwrap();
        assert_eq!(cutoff.to_string(), "08:05:00");
    }

    #[test]
    fn narrow_index_universe_falls_back_to_full_list_when_unconfigured() {
        let persisted = vec!["NIFTY 50".to_string(), "NIFTY BANK".to_string()];
        assert_eq!(narrow_index_universe(persisted.clone(), &[]), persisted);
    }

    #[test]
    fn narrow_index_universe_pins_to_configured_subset() {
        let persisted = vec!["NIFTY 50".to_string(), "NIFTY BANK".to_string(), "NIFTY IT".to_string()];
        let configured = vec!["NIFTY BANK".to_string()];
        assert_eq!(narrow_index_universe(persisted, &configured), vec!["NIFTY BANK".to_string()]);
    }

    #[test]
    fn narrow_index_universe_uses_configured_list_before_first_fetch() {
        let configured = vec!["NIFTY 50".to_string()];
        assert_eq!(narrow_index_universe(Vec::new(), &configured), configured);
    }
}
