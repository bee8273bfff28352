//! Retention sweeper -- periodic purge of aged telemetry and audit rows.
//!
//! Runs beside the workers on a fixed interval and never touches their path:
//! each sweep is a single blocking purge call on its own pool connection.
//! Telemetry and z-score history share the short retention window; drift
//! events keep their own, longer one. Baselines and health states are never
//! purged.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::storage::Store;

pub async fn run_sweeper(store: Store, cfg: Arc<Config>, mut shutdown: watch::Receiver<bool>) {
    // interval() panics on zero; floor the period at one second.
    let period = cfg.sweep_interval().max(std::time::Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; skip it so startup stays quiet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep_once(&store, &cfg).await;
            }
            _ = shutdown.changed() => {
                info!("retention sweeper stopping");
                break;
            }
        }
    }
}

async fn sweep_once(store: &Store, cfg: &Config) {
    let now_ms = Utc::now().timestamp_millis();
    let telemetry_cutoff = now_ms - cfg.telemetry_retention().as_millis() as i64;
    let events_cutoff = now_ms - cfg.drift_events_retention().as_millis() as i64;

    let store = store.clone();
    match tokio::task::spawn_blocking(move || store.purge(telemetry_cutoff, events_cutoff)).await {
        Ok(Ok(outcome)) => {
            debug!(
                telemetry = outcome.telemetry_rows,
                zscores = outcome.zscore_rows,
                events = outcome.event_rows,
                "retention sweep complete"
            );
        }
        Ok(Err(e)) => warn!(error = %e, "retention sweep failed"),
        Err(e) => error!(error = %e, "retention sweep task failed"),
    }
}
