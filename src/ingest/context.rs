//! Per-service in-memory context.
//!
//! Bundles everything a worker needs to process one service's samples: the
//! cached baseline, the state machine, and the refresh bookkeeping. Contexts
//! are rehydrated lazily from the store on the first sample after startup;
//! durable state (health, baseline, counts) comes back, counters restart.

use anyhow::Result;

use crate::analysis::Baseline;
use crate::config::Config;
use crate::detect::{DriftStateMachine, HealthState};
use crate::storage::Store;

#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub service_id: String,
    pub machine: DriftStateMachine,
    pub baseline: Option<Baseline>,
    /// Total samples durably appended for this service.
    pub sample_count: u64,
    /// Samples since the baseline was last recomputed.
    pub samples_since_refresh: u64,
    /// Whether a health row for this service exists durably yet.
    pub health_persisted: bool,
}

impl ServiceContext {
    /// Rehydrate from the store, or start fresh for a never-seen service.
    pub fn load(store: &Store, cfg: &Config, service_id: &str) -> Result<Self> {
        let health = store.get_health(service_id)?;
        let baseline = store.get_baseline(service_id)?;
        let sample_count = store.sample_count(service_id)?;

        let health_persisted = health.is_some();
        let state = health
            .map(|h| h.state)
            .unwrap_or(HealthState::InsufficientData);

        Ok(Self {
            service_id: service_id.to_string(),
            machine: DriftStateMachine::new(cfg.detection, state),
            baseline,
            sample_count,
            samples_since_refresh: 0,
            health_persisted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{HealthRecord, Sample};
    use tempfile::TempDir;

    #[test]
    fn unknown_service_starts_in_insufficient_data() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        let cfg = Config::default();

        let ctx = ServiceContext::load(&store, &cfg, "new-svc").unwrap();
        assert_eq!(ctx.machine.state(), HealthState::InsufficientData);
        assert!(ctx.baseline.is_none());
        assert_eq!(ctx.sample_count, 0);
        assert!(!ctx.health_persisted);
    }

    #[test]
    fn known_service_rehydrates_state_and_count() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        let cfg = Config::default();

        store
            .upsert_health(&HealthRecord {
                service_id: "svc".into(),
                state: HealthState::DriftDetected,
                transition_timestamp_ms: 1_000,
                metadata: serde_json::Value::Null,
            })
            .unwrap();
        store
            .append_sample(&Sample {
                service_id: "svc".into(),
                timestamp_ms: 1_000,
                latency_ms: 100.0,
                payload_kb: 1.0,
                ingested_at_ms: 1_000,
            })
            .unwrap();

        let ctx = ServiceContext::load(&store, &cfg, "svc").unwrap();
        assert_eq!(ctx.machine.state(), HealthState::DriftDetected);
        assert_eq!(ctx.sample_count, 1);
        assert!(ctx.health_persisted);
    }
}
