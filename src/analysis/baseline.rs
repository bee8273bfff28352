//! Rolling-window baseline statistics.
//!
//! A baseline is the mean/stddev pair for latency and payload over the most
//! recent window of samples, plus latency percentiles. Recomputation is
//! cheap at a 1000-sample window, so the engine recalculates from the raw
//! window rather than maintaining online accumulators.

use serde::{Deserialize, Serialize};

/// Cached per-service statistics. One row per service in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub service_id: String,
    pub sample_count: u64,
    pub mean_latency: f64,
    pub stddev_latency: f64,
    pub mean_payload: f64,
    pub stddev_payload: f64,
    pub p50_latency: f64,
    pub p95_latency: f64,
    pub p99_latency: f64,
    pub last_updated_ms: i64,
    pub created_at_ms: i64,
}

/// Compute a baseline over one window of (latency, payload) observations.
///
/// Returns `None` below `min_samples`; callers pass windows already capped
/// at the configured window size. Assumes non-negative inputs (validated at
/// the edge).
pub fn compute_baseline(
    service_id: &str,
    latencies: &[f64],
    payloads: &[f64],
    min_samples: u64,
    now_ms: i64,
) -> Option<Baseline> {
    debug_assert_eq!(latencies.len(), payloads.len());
    if (latencies.len() as u64) < min_samples {
        return None;
    }

    let (mean_latency, stddev_latency) = mean_stddev(latencies);
    let (mean_payload, stddev_payload) = mean_stddev(payloads);

    let mut sorted = latencies.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Some(Baseline {
        service_id: service_id.to_string(),
        sample_count: latencies.len() as u64,
        mean_latency,
        stddev_latency,
        mean_payload,
        stddev_payload,
        p50_latency: percentile(&sorted, 50.0),
        p95_latency: percentile(&sorted, 95.0),
        p99_latency: percentile(&sorted, 99.0),
        last_updated_ms: now_ms,
        created_at_ms: now_ms,
    })
}

/// Arithmetic mean and sample standard deviation (N-1 divisor).
/// Stddev is 0.0 for fewer than two values.
fn mean_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;

    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance_sum: f64 = values
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum();
    let variance = variance_sum / (count - 1.0);
    (mean, variance.sqrt())
}

/// Linearly interpolated percentile over an ascending-sorted slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_sample_stddev() {
        // 1..5: mean 3, sample variance 2.5, stddev ~1.5811
        let (mean, stddev) = mean_stddev(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(mean, 3.0);
        assert!((stddev - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn single_value_has_zero_stddev() {
        let (mean, stddev) = mean_stddev(&[7.5]);
        assert_eq!(mean, 7.5);
        assert_eq!(stddev, 0.0);
    }

    #[test]
    fn constant_series_has_zero_stddev() {
        let values = vec![100.0; 250];
        let (mean, stddev) = mean_stddev(&values);
        assert_eq!(mean, 100.0);
        assert_eq!(stddev, 0.0);
    }

    #[test]
    fn percentiles_interpolate() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!((percentile(&sorted, 50.0) - 50.5).abs() < 1e-9);
        assert!((percentile(&sorted, 95.0) - 95.05).abs() < 1e-9);
        assert_eq!(percentile(&sorted, 100.0), 100.0);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
    }

    #[test]
    fn below_min_samples_yields_none() {
        let values = vec![10.0; 99];
        assert!(compute_baseline("svc", &values, &values, 100, 0).is_none());
    }

    #[test]
    fn window_of_min_samples_yields_baseline() {
        let latencies = vec![150.0; 100];
        let payloads = vec![2.5; 100];
        let baseline =
            compute_baseline("svc", &latencies, &payloads, 100, 1_700_000_000_000).unwrap();
        assert_eq!(baseline.sample_count, 100);
        assert_eq!(baseline.mean_latency, 150.0);
        assert_eq!(baseline.stddev_latency, 0.0);
        assert_eq!(baseline.mean_payload, 2.5);
        assert_eq!(baseline.p50_latency, 150.0);
    }
}
