//! SQLite storage layer -- schema, pool, and all durable operations.
//!
//! A single embedded database holds telemetry samples, baselines, health
//! states, the drift-event audit log, and the z-score history ring. The
//! per-sample write-set commits as one transaction (`apply_observation`) so
//! concurrent readers observe each processed sample as a unit.

pub mod schema;

use std::path::{Path, PathBuf};

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::analysis::Baseline;
use crate::detect::{clamp_for_json, DriftEvent, HealthState, ZScorePair};

/// Connection pool type.
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Write failures, split along the retry boundary: `Busy` is transient
/// (lock contention, pool exhaustion) and retried with backoff; `Fatal`
/// (constraint or schema violations) drops the sample immediately.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage busy: {0}")]
    Busy(String),
    #[error("storage failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Busy(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    StoreError::Busy(e.to_string())
                }
                _ => StoreError::Fatal(e.to_string()),
            },
            _ => StoreError::Fatal(e.to_string()),
        }
    }
}

/// One telemetry observation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub service_id: String,
    /// Measurement time, epoch milliseconds.
    pub timestamp_ms: i64,
    pub latency_ms: f64,
    pub payload_kb: f64,
    /// Server receive time, epoch milliseconds.
    pub ingested_at_ms: i64,
}

/// Durable health state row, one per observed service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub service_id: String,
    pub state: HealthState,
    pub transition_timestamp_ms: i64,
    pub metadata: serde_json::Value,
}

/// The write-set for one processed sample, committed atomically.
#[derive(Debug)]
pub struct ObservationWrite {
    pub sample: Sample,
    pub zscores: Option<ZScorePair>,
    pub baseline: Option<Baseline>,
    pub health: Option<HealthRecord>,
    pub event: Option<DriftEvent>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemStats {
    pub service_count: u64,
    pub total_samples: u64,
    pub bytes_on_disk: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct PurgeOutcome {
    pub telemetry_rows: usize,
    pub zscore_rows: usize,
    pub event_rows: usize,
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Handle over the shared pool. Cheap to clone; safe across workers.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
    path: PathBuf,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let pool = open_pool(path)?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Liveness probe for the /health endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn append_sample(&self, sample: &Sample) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        insert_sample(&conn, sample)?;
        Ok(())
    }

    /// Recent samples for a service, newest first.
    pub fn recent_samples(&self, service_id: &str, limit: u64) -> Result<Vec<Sample>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT service_id, timestamp, latency_ms, payload_kb, created_at
             FROM telemetry
             WHERE service_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![service_id, limit], |row| {
            Ok(Sample {
                service_id: row.get(0)?,
                timestamp_ms: row.get(1)?,
                latency_ms: row.get(2)?,
                payload_kb: row.get(3)?,
                ingested_at_ms: row.get(4)?,
            })
        })?;

        let mut samples = Vec::new();
        for r in rows {
            samples.push(r?);
        }
        Ok(samples)
    }

    pub fn sample_count(&self, service_id: &str) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM telemetry WHERE service_id = ?1",
            params![service_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn get_baseline(&self, service_id: &str) -> Result<Option<Baseline>> {
        let conn = self.pool.get()?;
        let baseline = conn
            .query_row(
                "SELECT service_id, sample_count, mean_latency, stddev_latency,
                        mean_payload, stddev_payload, p50_latency, p95_latency,
                        p99_latency, last_updated, created_at
                 FROM baselines WHERE service_id = ?1",
                params![service_id],
                baseline_from_row,
            )
            .optional()?;
        Ok(baseline)
    }

    /// Atomic replace keyed by `service_id`; `created_at` survives updates.
    pub fn upsert_baseline(&self, baseline: &Baseline) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        upsert_baseline_stmt(&conn, baseline)?;
        Ok(())
    }

    pub fn get_health(&self, service_id: &str) -> Result<Option<HealthRecord>> {
        let conn = self.pool.get()?;
        let record = conn
            .query_row(
                "SELECT service_id, state, transition_timestamp, metadata
                 FROM health_states WHERE service_id = ?1",
                params![service_id],
                health_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn upsert_health(&self, record: &HealthRecord) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        upsert_health_stmt(&conn, record)?;
        Ok(())
    }

    pub fn append_drift_event(&self, event: &DriftEvent) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        insert_drift_event(&conn, event)?;
        Ok(())
    }

    /// Recent drift events for a service, newest first.
    pub fn recent_drift_events(&self, service_id: &str, limit: u64) -> Result<Vec<DriftEvent>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, service_id, detected_at, previous_state, new_state,
                    trigger_samples, metadata
             FROM drift_events
             WHERE service_id = ?1
             ORDER BY detected_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![service_id, limit], |row| {
            let previous: String = row.get(3)?;
            let new: String = row.get(4)?;
            let trigger_json: Option<String> = row.get(5)?;
            let metadata_json: Option<String> = row.get(6)?;
            Ok(DriftEvent {
                id: Some(row.get(0)?),
                service_id: row.get(1)?,
                detected_at_ms: row.get(2)?,
                previous_state: HealthState::parse(&previous)
                    .unwrap_or(HealthState::InsufficientData),
                new_state: HealthState::parse(&new).unwrap_or(HealthState::InsufficientData),
                trigger_samples: trigger_json
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or_default(),
                metadata: metadata_json
                    .and_then(|s| serde_json::from_str(&s).ok())
                    .unwrap_or(serde_json::Value::Null),
            })
        })?;

        let mut events = Vec::new();
        for r in rows {
            events.push(r?);
        }
        Ok(events)
    }

    /// Commit the full write-set for one processed sample as a single unit.
    pub fn apply_observation(&self, write: &ObservationWrite) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        insert_sample(&tx, &write.sample)?;

        if let Some(z) = &write.zscores {
            tx.execute(
                "INSERT INTO zscore_history
                 (service_id, timestamp, latency_zscore, payload_zscore, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    write.sample.service_id,
                    write.sample.timestamp_ms,
                    clamp_for_json(z.latency),
                    clamp_for_json(z.payload),
                    write.sample.ingested_at_ms,
                ],
            )?;
        }
        if let Some(baseline) = &write.baseline {
            upsert_baseline_stmt(&tx, baseline)?;
        }
        if let Some(health) = &write.health {
            upsert_health_stmt(&tx, health)?;
        }
        if let Some(event) = &write.event {
            insert_drift_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Remove telemetry and z-score rows older than `telemetry_cutoff_ms`,
    /// and drift events older than `events_cutoff_ms`. Baselines and health
    /// states are never purged.
    pub fn purge(&self, telemetry_cutoff_ms: i64, events_cutoff_ms: i64) -> Result<PurgeOutcome> {
        let conn = self.pool.get()?;
        let telemetry_rows = conn.execute(
            "DELETE FROM telemetry WHERE created_at < ?1",
            params![telemetry_cutoff_ms],
        )?;
        let zscore_rows = conn.execute(
            "DELETE FROM zscore_history WHERE created_at < ?1",
            params![telemetry_cutoff_ms],
        )?;
        let event_rows = conn.execute(
            "DELETE FROM drift_events WHERE detected_at < ?1",
            params![events_cutoff_ms],
        )?;
        Ok(PurgeOutcome {
            telemetry_rows,
            zscore_rows,
            event_rows,
        })
    }

    pub fn system_stats(&self) -> Result<SystemStats> {
        let conn = self.pool.get()?;
        let service_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM health_states", [], |row| row.get(0))?;
        let total_samples: i64 =
            conn.query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))?;
        let bytes_on_disk = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(SystemStats {
            service_count: service_count as u64,
            total_samples: total_samples as u64,
            bytes_on_disk,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn insert_sample(conn: &rusqlite::Connection, sample: &Sample) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO telemetry (service_id, timestamp, latency_ms, payload_kb, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            sample.service_id,
            sample.timestamp_ms,
            sample.latency_ms,
            sample.payload_kb,
            sample.ingested_at_ms,
        ],
    )?;
    Ok(())
}

fn upsert_baseline_stmt(
    conn: &rusqlite::Connection,
    baseline: &Baseline,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO baselines
         (service_id, sample_count, mean_latency, stddev_latency, mean_payload,
          stddev_payload, p50_latency, p95_latency, p99_latency, last_updated, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(service_id) DO UPDATE SET
           sample_count = excluded.sample_count,
           mean_latency = excluded.mean_latency,
           stddev_latency = excluded.stddev_latency,
           mean_payload = excluded.mean_payload,
           stddev_payload = excluded.stddev_payload,
           p50_latency = excluded.p50_latency,
           p95_latency = excluded.p95_latency,
           p99_latency = excluded.p99_latency,
           last_updated = excluded.last_updated",
        params![
            baseline.service_id,
            baseline.sample_count,
            baseline.mean_latency,
            baseline.stddev_latency,
            baseline.mean_payload,
            baseline.stddev_payload,
            baseline.p50_latency,
            baseline.p95_latency,
            baseline.p99_latency,
            baseline.last_updated_ms,
            baseline.created_at_ms,
        ],
    )?;
    Ok(())
}

fn upsert_health_stmt(
    conn: &rusqlite::Connection,
    record: &HealthRecord,
) -> Result<(), rusqlite::Error> {
    let metadata_json = serde_json::to_string(&record.metadata).ok();
    conn.execute(
        "INSERT INTO health_states (service_id, state, transition_timestamp, metadata)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(service_id) DO UPDATE SET
           state = excluded.state,
           transition_timestamp = excluded.transition_timestamp,
           metadata = excluded.metadata",
        params![
            record.service_id,
            record.state.as_str(),
            record.transition_timestamp_ms,
            metadata_json,
        ],
    )?;
    Ok(())
}

fn insert_drift_event(
    conn: &rusqlite::Connection,
    event: &DriftEvent,
) -> Result<(), rusqlite::Error> {
    let trigger_json = trigger_samples_json(&event.trigger_samples);
    let metadata_json = serde_json::to_string(&event.metadata).ok();
    conn.execute(
        "INSERT INTO drift_events
         (service_id, detected_at, previous_state, new_state, trigger_samples, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.service_id,
            event.detected_at_ms,
            event.previous_state.as_str(),
            event.new_state.as_str(),
            trigger_json,
            metadata_json,
        ],
    )?;
    Ok(())
}

/// Serialize trailing z-score pairs for the audit row, clamping non-finite
/// values JSON cannot carry.
fn trigger_samples_json(pairs: &[ZScorePair]) -> Option<String> {
    if pairs.is_empty() {
        return None;
    }
    let clamped: Vec<ZScorePair> = pairs
        .iter()
        .map(|p| ZScorePair {
            latency: clamp_for_json(p.latency),
            payload: clamp_for_json(p.payload),
        })
        .collect();
    serde_json::to_string(&clamped).ok()
}

fn baseline_from_row(row: &rusqlite::Row<'_>) -> Result<Baseline, rusqlite::Error> {
    Ok(Baseline {
        service_id: row.get(0)?,
        sample_count: row.get::<_, i64>(1)? as u64,
        mean_latency: row.get(2)?,
        stddev_latency: row.get(3)?,
        mean_payload: row.get(4)?,
        stddev_payload: row.get(5)?,
        p50_latency: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
        p95_latency: row.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
        p99_latency: row.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
        last_updated_ms: row.get(9)?,
        created_at_ms: row.get(10)?,
    })
}

fn health_from_row(row: &rusqlite::Row<'_>) -> Result<HealthRecord, rusqlite::Error> {
    let state: String = row.get(1)?;
    let metadata_json: Option<String> = row.get(3)?;
    Ok(HealthRecord {
        service_id: row.get(0)?,
        state: HealthState::parse(&state).unwrap_or(HealthState::InsufficientData),
        transition_timestamp_ms: row.get(2)?,
        metadata: metadata_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}
