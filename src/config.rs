//! Runtime configuration -- typed defaults, optionally overridden by a YAML file.
//!
//! Every tunable has a production default, so a config file is never required.
//! A partial file overrides only the fields it names.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub baseline: BaselineConfig,
    pub detection: DetectionConfig,
    pub ingest: IngestConfig,
    pub retention: RetentionConfig,
    pub api: ApiConfig,
}

/// Baseline generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Minimum samples before a service gets a baseline (and leaves INSUFFICIENT_DATA).
    pub min_samples: u64,
    /// Maximum recent samples contributing to the baseline.
    pub window_size: u64,
    /// Recompute the baseline after this many new samples.
    pub recalc_interval: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            window_size: 1000,
            recalc_interval: 50,
        }
    }
}

/// Drift detection thresholds. `Copy` so the state machine can own its own.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Severe anomaly threshold on max(|z_lat|, |z_pay|).
    pub severe_zscore: f64,
    /// Consecutive severe anomalies that trip STABLE -> DRIFT_DETECTED.
    pub severe_consecutive: u32,
    /// Moderate anomaly threshold.
    pub moderate_zscore: f64,
    /// Moderate anomalies within the trailing window that trip drift.
    pub moderate_count: u32,
    /// Trailing window size in samples.
    pub moderate_window: u32,
    /// Ceiling for a sample to count as normal during recovery.
    pub normal_zscore: f64,
    /// Consecutive normal samples that recover DRIFT_DETECTED -> STABLE.
    pub recovery_consecutive: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            severe_zscore: 3.0,
            severe_consecutive: 5,
            moderate_zscore: 2.5,
            moderate_count: 10,
            moderate_window: 20,
            normal_zscore: 2.0,
            recovery_consecutive: 50,
        }
    }
}

/// Ingest queue and worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Total pending-sample capacity across all shards.
    pub queue_capacity: usize,
    /// Worker count; also the shard count (one shard per worker).
    pub workers: usize,
    /// Seconds workers get to drain their shards at shutdown.
    pub drain_timeout_secs: u64,
    /// Transient store failures retried per sample before dropping it.
    pub store_retry_limit: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            workers: 4,
            drain_timeout_secs: 10,
            store_retry_limit: 3,
        }
    }
}

/// Data retention windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub telemetry_days: u64,
    pub drift_events_days: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            telemetry_days: 7,
            drift_events_days: 30,
            sweep_interval_secs: 3600,
        }
    }
}

/// Edge validation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub max_service_id_len: usize,
    /// Client timestamps must land within this many seconds of server time.
    pub timestamp_tolerance_secs: i64,
    /// Sanity ceiling for latency values (ms).
    pub max_latency_ms: f64,
    /// Sanity ceiling for payload sizes (KiB).
    pub max_payload_kb: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_service_id_len: 128,
            timestamp_tolerance_secs: 3600,
            max_latency_ms: 300_000.0,
            max_payload_kb: 1_048_576.0,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                let cfg: Config = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {}", p.display()))?;
                Ok(cfg)
            }
            None => Ok(Config::default()),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest.drain_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_secs)
    }

    pub fn telemetry_retention(&self) -> Duration {
        Duration::from_secs(self.retention.telemetry_days * 86_400)
    }

    pub fn drift_events_retention(&self) -> Duration {
        Duration::from_secs(self.retention.drift_events_days * 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.baseline.min_samples, 100);
        assert_eq!(cfg.baseline.window_size, 1000);
        assert_eq!(cfg.baseline.recalc_interval, 50);
        assert_eq!(cfg.detection.severe_zscore, 3.0);
        assert_eq!(cfg.detection.severe_consecutive, 5);
        assert_eq!(cfg.detection.moderate_zscore, 2.5);
        assert_eq!(cfg.detection.moderate_count, 10);
        assert_eq!(cfg.detection.moderate_window, 20);
        assert_eq!(cfg.detection.normal_zscore, 2.0);
        assert_eq!(cfg.detection.recovery_consecutive, 50);
        assert_eq!(cfg.retention.telemetry_days, 7);
        assert_eq!(cfg.retention.drift_events_days, 30);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let cfg: Config = serde_yaml::from_str(
            "detection:\n  severe_consecutive: 3\ningest:\n  queue_capacity: 10\n",
        )
        .unwrap();
        assert_eq!(cfg.detection.severe_consecutive, 3);
        assert_eq!(cfg.ingest.queue_capacity, 10);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.detection.severe_zscore, 3.0);
        assert_eq!(cfg.baseline.min_samples, 100);
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/driftwatch.yaml")));
        assert!(err.is_err());
    }
}
