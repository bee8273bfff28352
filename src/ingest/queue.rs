//! Bounded ingest queue, sharded by service.
//!
//! Each worker owns one shard (a bounded mpsc channel); a sample's shard is
//! chosen by hashing its `service_id`, so samples for one service always land
//! on the same worker in accept order. Enqueue never blocks: a full shard is
//! a visible rejection the edge surfaces as backpressure, never an unbounded
//! buffer.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use crate::ingest::IngestStats;
use crate::storage::Sample;

/// Result of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// The target shard is at capacity; the caller should retry with backoff.
    QueueFull,
    /// Shutdown has begun; the edge is no longer accepting samples.
    ShuttingDown,
}

pub struct IngestQueue {
    shards: RwLock<Vec<mpsc::Sender<Sample>>>,
    shard_count: usize,
    stats: Arc<IngestStats>,
}

impl IngestQueue {
    /// Build the queue and hand back one receiver per shard. Total capacity
    /// is divided evenly across shards (at least one slot each).
    pub fn new(
        capacity: usize,
        shard_count: usize,
        stats: Arc<IngestStats>,
    ) -> (Self, Vec<mpsc::Receiver<Sample>>) {
        let shard_count = shard_count.max(1);
        let per_shard = (capacity / shard_count).max(1);

        let mut senders = Vec::with_capacity(shard_count);
        let mut receivers = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let (tx, rx) = mpsc::channel(per_shard);
            senders.push(tx);
            receivers.push(rx);
        }

        (
            Self {
                shards: RwLock::new(senders),
                shard_count,
                stats,
            },
            receivers,
        )
    }

    pub fn enqueue(&self, sample: Sample) -> EnqueueOutcome {
        self.stats.note_received();
        let Ok(shards) = self.shards.read() else {
            return EnqueueOutcome::ShuttingDown;
        };
        if shards.is_empty() {
            self.stats.note_rejected();
            return EnqueueOutcome::ShuttingDown;
        }
        let idx = shard_for(&sample.service_id, self.shard_count);
        match shards[idx].try_send(sample) {
            Ok(()) => {
                self.stats.note_enqueued();
                EnqueueOutcome::Accepted
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.note_rejected();
                EnqueueOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.note_rejected();
                EnqueueOutcome::ShuttingDown
            }
        }
    }

    /// Stop accepting and let workers drain what is already buffered.
    pub fn close(&self) {
        if let Ok(mut shards) = self.shards.write() {
            shards.clear();
        }
    }

    pub fn is_open(&self) -> bool {
        self.shards.read().map(|s| !s.is_empty()).unwrap_or(false)
    }
}

fn shard_for(service_id: &str, shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    service_id.hash(&mut hasher);
    (hasher.finish() as usize) % shard_count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(service_id: &str, n: i64) -> Sample {
        Sample {
            service_id: service_id.to_string(),
            timestamp_ms: n,
            latency_ms: 100.0,
            payload_kb: 1.0,
            ingested_at_ms: n,
        }
    }

    #[test]
    fn full_shard_rejects_instead_of_blocking() {
        let stats = Arc::new(IngestStats::default());
        let (queue, _rx) = IngestQueue::new(10, 1, stats.clone());

        let mut accepted = 0;
        let mut rejected = 0;
        for i in 0..1000 {
            match queue.enqueue(sample("svc", i)) {
                EnqueueOutcome::Accepted => accepted += 1,
                EnqueueOutcome::QueueFull => rejected += 1,
                EnqueueOutcome::ShuttingDown => panic!("queue closed unexpectedly"),
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(rejected, 990);

        let counters = stats.counters();
        assert_eq!(counters.received, 1000);
        assert_eq!(counters.rejected, 990);
        assert_eq!(stats.depth(), 10);
    }

    #[test]
    fn one_service_always_lands_on_one_shard() {
        let stats = Arc::new(IngestStats::default());
        let (queue, mut receivers) = IngestQueue::new(400, 4, stats);

        for i in 0..100 {
            assert_eq!(queue.enqueue(sample("checkout", i)), EnqueueOutcome::Accepted);
        }

        let mut occupied = 0;
        for rx in &mut receivers {
            let mut count = 0;
            while rx.try_recv().is_ok() {
                count += 1;
            }
            if count > 0 {
                assert_eq!(count, 100);
                occupied += 1;
            }
        }
        assert_eq!(occupied, 1);
    }

    #[test]
    fn shard_preserves_accept_order() {
        let stats = Arc::new(IngestStats::default());
        let (queue, mut receivers) = IngestQueue::new(100, 1, stats);

        for i in 0..50 {
            assert_eq!(queue.enqueue(sample("svc", i)), EnqueueOutcome::Accepted);
        }
        let rx = &mut receivers[0];
        for i in 0..50 {
            assert_eq!(rx.try_recv().unwrap().timestamp_ms, i);
        }
    }

    #[test]
    fn closed_queue_stops_accepting() {
        let stats = Arc::new(IngestStats::default());
        let (queue, _rx) = IngestQueue::new(10, 1, stats);
        assert!(queue.is_open());
        queue.close();
        assert!(!queue.is_open());
        assert_eq!(
            queue.enqueue(sample("svc", 0)),
            EnqueueOutcome::ShuttingDown
        );
    }
}
