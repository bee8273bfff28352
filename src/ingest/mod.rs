//! Ingestion pipeline -- bounded sharded queue feeding a fixed worker pool.

pub mod context;
pub mod queue;
pub(crate) mod worker;

pub use queue::{EnqueueOutcome, IngestQueue};

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::storage::Store;

/// Shared ingestion counters, surfaced on the system-status endpoint.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    processed: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    depth: AtomicI64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct IngestCounters {
    pub received: u64,
    pub processed: u64,
    pub rejected: u64,
    pub dropped: u64,
}

impl IngestStats {
    pub(crate) fn note_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_enqueued(&self) {
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dequeued(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn note_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> IngestCounters {
        IngestCounters {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Samples currently buffered across all shards.
    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Relaxed).max(0) as u64
    }
}

/// The queue plus its worker pool. Owns worker handles for drain-on-shutdown.
pub struct IngestPipeline {
    queue: Arc<IngestQueue>,
    stats: Arc<IngestStats>,
    workers: Vec<JoinHandle<()>>,
}

impl IngestPipeline {
    /// Build the sharded queue and spawn one worker per shard.
    pub fn start(store: Store, cfg: Arc<Config>) -> Self {
        let stats = Arc::new(IngestStats::default());
        let (queue, receivers) =
            IngestQueue::new(cfg.ingest.queue_capacity, cfg.ingest.workers, stats.clone());
        let queue = Arc::new(queue);

        let mut workers = Vec::with_capacity(receivers.len());
        for (worker_id, rx) in receivers.into_iter().enumerate() {
            workers.push(tokio::spawn(worker::worker_loop(
                worker_id,
                store.clone(),
                cfg.clone(),
                rx,
                stats.clone(),
            )));
        }
        info!(workers = workers.len(), capacity = cfg.ingest.queue_capacity, "ingest pipeline started");

        Self {
            queue,
            stats,
            workers,
        }
    }

    pub fn queue(&self) -> Arc<IngestQueue> {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Stop accepting, then let workers drain their shards up to `drain_timeout`.
    pub async fn shutdown(mut self, drain_timeout: Duration) {
        self.queue.close();
        let deadline = tokio::time::Instant::now() + drain_timeout;
        for handle in &mut self.workers {
            if tokio::time::timeout_at(deadline, &mut *handle).await.is_err() {
                warn!("drain deadline exceeded; stopping worker");
                handle.abort();
            }
        }
        info!("ingest pipeline stopped");
    }
}
