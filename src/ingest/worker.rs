//! Worker loop and the per-sample processing step.
//!
//! Each worker owns one queue shard and the contexts for every service that
//! hashes to it, so per-service processing is serialized without locks. The
//! step feeds a scratch copy of the state machine and commits the whole
//! write-set in one transaction; the scratch state is adopted only after the
//! commit succeeds, so a failed write never advances in-memory counters past
//! durable state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::analysis::{compute_baseline, score_sample};
use crate::config::Config;
use crate::detect::{DriftEvent, Transition};
use crate::ingest::context::ServiceContext;
use crate::ingest::IngestStats;
use crate::storage::{HealthRecord, ObservationWrite, Sample, Store, StoreError};

/// What happened to one dequeued sample.
#[derive(Debug)]
pub(crate) enum StepResult {
    Processed { transition: Option<Transition> },
    Dropped,
}

pub(crate) async fn worker_loop(
    worker_id: usize,
    store: Store,
    cfg: Arc<Config>,
    mut rx: mpsc::Receiver<Sample>,
    stats: Arc<IngestStats>,
) {
    let mut contexts: HashMap<String, ServiceContext> = HashMap::new();

    while let Some(sample) = rx.recv().await {
        stats.note_dequeued();
        let service_id = sample.service_id.clone();

        let ctx = match contexts.remove(&service_id) {
            Some(ctx) => ctx,
            None => {
                let store = store.clone();
                let cfg = cfg.clone();
                let sid = service_id.clone();
                match tokio::task::spawn_blocking(move || ServiceContext::load(&store, &cfg, &sid))
                    .await
                {
                    Ok(Ok(ctx)) => ctx,
                    Ok(Err(e)) => {
                        warn!(%service_id, error = %e, "failed to load service context; dropping sample");
                        stats.note_dropped();
                        continue;
                    }
                    Err(e) => {
                        error!(%service_id, error = %e, "context load task failed; dropping sample");
                        stats.note_dropped();
                        continue;
                    }
                }
            }
        };

        let store_for_step = store.clone();
        let cfg_for_step = cfg.clone();
        let (ctx, result) = match tokio::task::spawn_blocking(move || {
            let mut ctx = ctx;
            let result = process_sample(&store_for_step, &cfg_for_step, &mut ctx, sample);
            (ctx, result)
        })
        .await
        {
            Ok(pair) => pair,
            Err(e) => {
                error!(%service_id, error = %e, "processing task failed; dropping sample");
                stats.note_dropped();
                continue;
            }
        };

        match &result {
            StepResult::Processed { transition } => {
                stats.note_processed();
                if let Some(t) = transition {
                    info!(
                        %service_id,
                        from = %t.from,
                        to = %t.to,
                        "state transition"
                    );
                }
            }
            StepResult::Dropped => stats.note_dropped(),
        }

        contexts.insert(service_id, ctx);
    }

    debug!(worker = worker_id, "ingest worker drained and stopped");
}

/// Process one sample end to end: persist it, maybe refresh the baseline,
/// score it, feed the state machine, and commit the unit. The context is
/// mutated only when the commit lands.
pub(crate) fn process_sample(
    store: &Store,
    cfg: &Config,
    ctx: &mut ServiceContext,
    sample: Sample,
) -> StepResult {
    let now_ms = Utc::now().timestamp_millis();
    let new_count = ctx.sample_count + 1;
    let mut since_refresh = ctx.samples_since_refresh + 1;

    let mut machine = ctx.machine.clone();
    let mut baseline = ctx.baseline.clone();

    // Refresh the baseline when the minimum is first crossed, then on cadence.
    let refresh_due = match &baseline {
        None => new_count >= cfg.baseline.min_samples,
        Some(_) => since_refresh >= cfg.baseline.recalc_interval,
    };
    let mut refreshed = None;
    if refresh_due {
        // The current sample joins the latest W-1 persisted ones.
        let prior = match store.recent_samples(&sample.service_id, cfg.baseline.window_size - 1) {
            Ok(samples) => samples,
            Err(e) => {
                warn!(service_id = %sample.service_id, error = %e, "baseline window read failed; dropping sample");
                return StepResult::Dropped;
            }
        };
        let mut latencies = Vec::with_capacity(prior.len() + 1);
        let mut payloads = Vec::with_capacity(prior.len() + 1);
        latencies.push(sample.latency_ms);
        payloads.push(sample.payload_kb);
        for s in &prior {
            latencies.push(s.latency_ms);
            payloads.push(s.payload_kb);
        }
        if let Some(mut b) = compute_baseline(
            &sample.service_id,
            &latencies,
            &payloads,
            cfg.baseline.min_samples,
            now_ms,
        ) {
            if let Some(existing) = &baseline {
                b.created_at_ms = existing.created_at_ms;
            }
            baseline = Some(b.clone());
            refreshed = Some(b);
            since_refresh = 0;
        }
    }

    // First baseline moves the service out of INSUFFICIENT_DATA; that sample
    // is not additionally scored. Otherwise score against the cached baseline.
    let mut zscores = None;
    let transition = if ctx.baseline.is_none() && baseline.is_some() {
        let count = baseline.as_ref().map(|b| b.sample_count).unwrap_or(0);
        machine.baseline_ready(count)
    } else if let Some(b) = &baseline {
        let z = score_sample(sample.latency_ms, sample.payload_kb, b);
        zscores = Some(z);
        machine.observe(z)
    } else {
        None
    };

    let mut health = None;
    if !ctx.health_persisted {
        health = Some(HealthRecord {
            service_id: sample.service_id.clone(),
            state: machine.state(),
            transition_timestamp_ms: now_ms,
            metadata: serde_json::json!({"reason": "newly_tracked"}),
        });
    }
    let mut event = None;
    if let Some(t) = &transition {
        health = Some(HealthRecord {
            service_id: sample.service_id.clone(),
            state: t.to,
            transition_timestamp_ms: now_ms,
            metadata: t.reason.to_metadata(),
        });
        event = Some(DriftEvent {
            id: None,
            service_id: sample.service_id.clone(),
            detected_at_ms: now_ms,
            previous_state: t.from,
            new_state: t.to,
            trigger_samples: t.trigger_samples.clone(),
            metadata: t.reason.to_metadata(),
        });
    }

    let write = ObservationWrite {
        sample,
        zscores,
        baseline: refreshed,
        health,
        event,
    };

    if !commit_with_retry(store, cfg, &write) {
        return StepResult::Dropped;
    }

    // Commit landed; adopt the scratch state.
    ctx.machine = machine;
    ctx.baseline = baseline;
    ctx.sample_count = new_count;
    ctx.samples_since_refresh = since_refresh;
    ctx.health_persisted = true;
    StepResult::Processed { transition }
}

/// Commit the write-set, retrying transient failures with exponential
/// backoff. Fatal failures and retry exhaustion drop the sample.
fn commit_with_retry(store: &Store, cfg: &Config, write: &ObservationWrite) -> bool {
    let mut attempt: u32 = 0;
    loop {
        match store.apply_observation(write) {
            Ok(()) => return true,
            Err(e @ StoreError::Busy(_)) if attempt < cfg.ingest.store_retry_limit => {
                attempt += 1;
                let backoff = Duration::from_millis(50u64 << attempt.min(6));
                debug!(
                    service_id = %write.sample.service_id,
                    error = %e,
                    attempt,
                    "transient store failure; backing off"
                );
                std::thread::sleep(backoff);
            }
            Err(e) => {
                warn!(
                    service_id = %write.sample.service_id,
                    error = %e,
                    transient = e.is_transient(),
                    "store write failed; dropping sample"
                );
                return false;
            }
        }
    }
}
