//! DriftWatch -- statistical drift detection for service telemetry.
//!
//! This crate provides the core library for telemetry ingestion, rolling
//! z-score baselines, per-service health state machines, and the durable
//! audit trail of drift events.

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod sim;
pub mod storage;
pub mod sweeper;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use crate::api::AppState;
use crate::config::Config;
use crate::ingest::IngestPipeline;
use crate::storage::Store;

/// Start the DriftWatch daemon: store, worker pool, sweeper, and API server.
/// Runs until interrupted, then drains the ingest queue before returning.
pub async fn serve(bind: &str, db_path: &Path, config: Config) -> Result<()> {
    let config = Arc::new(config);

    tracing::info!(db = %db_path.display(), "Initializing database");
    let store = Store::open(db_path)?;

    let pipeline = IngestPipeline::start(store.clone(), config.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper_handle = tokio::spawn(sweeper::run_sweeper(
        store.clone(),
        config.clone(),
        shutdown_rx,
    ));

    let state = AppState {
        store,
        queue: pipeline.queue(),
        stats: pipeline.stats(),
        config: config.clone(),
        started_at: Instant::now(),
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "DriftWatch listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Edge is closed; drain the pipeline and stop the sweeper.
    tracing::info!("shutting down: draining ingest queue");
    let _ = shutdown_tx.send(true);
    pipeline.shutdown(config.drain_timeout()).await;
    let _ = sweeper_handle.await;
    tracing::info!("DriftWatch stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
