//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS telemetry (
            id INTEGER PRIMARY KEY,
            service_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            latency_ms REAL NOT NULL CHECK (latency_ms >= 0),
            payload_kb REAL NOT NULL CHECK (payload_kb >= 0),
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS baselines (
            service_id TEXT PRIMARY KEY,
            sample_count INTEGER NOT NULL CHECK (sample_count > 0),
            mean_latency REAL NOT NULL,
            stddev_latency REAL NOT NULL CHECK (stddev_latency >= 0),
            mean_payload REAL NOT NULL,
            stddev_payload REAL NOT NULL CHECK (stddev_payload >= 0),
            p50_latency REAL,
            p95_latency REAL,
            p99_latency REAL,
            last_updated INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS health_states (
            service_id TEXT PRIMARY KEY,
            state TEXT NOT NULL CHECK (state IN ('INSUFFICIENT_DATA', 'STABLE', 'DRIFT_DETECTED')),
            transition_timestamp INTEGER NOT NULL,
            metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS drift_events (
            id INTEGER PRIMARY KEY,
            service_id TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            previous_state TEXT NOT NULL,
            new_state TEXT NOT NULL,
            trigger_samples TEXT,
            metadata TEXT
        );

        CREATE TABLE IF NOT EXISTS zscore_history (
            id INTEGER PRIMARY KEY,
            service_id TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            latency_zscore REAL NOT NULL,
            payload_zscore REAL NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_telemetry_service_ts
            ON telemetry(service_id, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_telemetry_created ON telemetry(created_at);
        CREATE INDEX IF NOT EXISTS idx_drift_events_service_detected
            ON drift_events(service_id, detected_at DESC);
        CREATE INDEX IF NOT EXISTS idx_drift_events_detected ON drift_events(detected_at);
        CREATE INDEX IF NOT EXISTS idx_zscore_service_created
            ON zscore_history(service_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_zscore_created ON zscore_history(created_at);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM telemetry", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM drift_events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_state_check_constraint_rejects_unknown_states() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let err = conn.execute(
            "INSERT INTO health_states (service_id, state, transition_timestamp)
             VALUES ('svc', 'HALF_STABLE', 0)",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_negative_latency_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        let err = conn.execute(
            "INSERT INTO telemetry (service_id, timestamp, latency_ms, payload_kb, created_at)
             VALUES ('svc', 0, -1.0, 1.0, 0)",
            [],
        );
        assert!(err.is_err());
    }
}
