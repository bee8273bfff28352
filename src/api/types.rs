//! Request/response DTOs and edge validation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::Baseline;
use crate::config::ApiConfig;
use crate::ingest::IngestCounters;
use crate::storage::HealthRecord;

/// Incoming telemetry from a monitored service.
#[derive(Debug, Deserialize)]
pub struct TelemetryRequest {
    pub service_id: String,
    pub latency_ms: f64,
    pub payload_kb: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TelemetryRequest {
    /// Validate shape and ranges; returns the effective sample timestamp.
    pub fn validate(&self, cfg: &ApiConfig, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
        if self.service_id.is_empty() {
            return Err("service_id must not be empty".into());
        }
        if self.service_id.len() > cfg.max_service_id_len {
            return Err(format!(
                "service_id exceeds {} characters",
                cfg.max_service_id_len
            ));
        }
        if !self
            .service_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(
                "service_id must contain only alphanumeric characters, hyphens, underscores, or dots"
                    .into(),
            );
        }

        if !self.latency_ms.is_finite() || self.latency_ms < 0.0 {
            return Err(format!("latency_ms must be non-negative: {}", self.latency_ms));
        }
        if self.latency_ms > cfg.max_latency_ms {
            return Err(format!(
                "latency_ms exceeds reasonable maximum: {}",
                self.latency_ms
            ));
        }
        if !self.payload_kb.is_finite() || self.payload_kb < 0.0 {
            return Err(format!("payload_kb must be non-negative: {}", self.payload_kb));
        }
        if self.payload_kb > cfg.max_payload_kb {
            return Err(format!(
                "payload_kb exceeds reasonable maximum: {}",
                self.payload_kb
            ));
        }

        match self.timestamp {
            None => Ok(now),
            Some(ts) => {
                let tolerance = Duration::seconds(cfg.timestamp_tolerance_secs);
                if ts < now - tolerance || ts > now + tolerance {
                    return Err(format!(
                        "timestamp outside acceptable range: {} (server time {}, tolerance {}s)",
                        ts.to_rfc3339(),
                        now.to_rfc3339(),
                        cfg.timestamp_tolerance_secs
                    ));
                }
                Ok(ts)
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TelemetryAccepted {
    pub status: &'static str,
    pub service_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct BaselineResponse {
    pub service_id: String,
    pub sample_count: u64,
    pub mean_latency: f64,
    pub stddev_latency: f64,
    pub mean_payload: f64,
    pub stddev_payload: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub last_updated: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<Baseline> for BaselineResponse {
    fn from(b: Baseline) -> Self {
        Self {
            service_id: b.service_id,
            sample_count: b.sample_count,
            mean_latency: b.mean_latency,
            stddev_latency: b.stddev_latency,
            mean_payload: b.mean_payload,
            stddev_payload: b.stddev_payload,
            p50_latency: b.p50_latency,
            p95_latency: b.p95_latency,
            p99_latency: b.p99_latency,
            last_updated: from_ms(b.last_updated_ms),
            created_at: from_ms(b.created_at_ms),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub service_id: String,
    pub state: String,
    pub transition_timestamp: DateTime<Utc>,
    pub sample_count: u64,
    pub baseline: Option<BaselineResponse>,
    pub metadata: serde_json::Value,
}

impl HealthResponse {
    pub fn new(record: HealthRecord, sample_count: u64, baseline: Option<Baseline>) -> Self {
        Self {
            service_id: record.service_id,
            state: record.state.as_str().to_string(),
            transition_timestamp: from_ms(record.transition_timestamp_ms),
            sample_count,
            baseline: baseline.map(BaselineResponse::from),
            metadata: record.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SystemStatusResponse {
    pub status: &'static str,
    pub uptime_seconds: f64,
    pub services_monitored: u64,
    pub total_telemetry_records: u64,
    pub database_size_mb: f64,
    pub queue_depth: u64,
    pub ingest: IngestCounters,
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}
