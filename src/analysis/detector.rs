//! Pure z-score detector.
//!
//! Stateless: a sample plus a baseline in, a z-score pair out. The
//! degenerate-sigma rule treats any deviation from a constant series as an
//! infinite deviation, which the state machine counts as a severe anomaly.

use crate::analysis::Baseline;
use crate::detect::ZScorePair;

/// Z-score of `value` against (`mean`, `stddev`).
///
/// With zero variance the score is 0 at the mean and +inf anywhere else.
pub fn zscore(value: f64, mean: f64, stddev: f64) -> f64 {
    if stddev == 0.0 {
        if value == mean {
            return 0.0;
        }
        return f64::INFINITY;
    }
    (value - mean) / stddev
}

/// Score one sample's latency and payload against a baseline.
pub fn score_sample(latency_ms: f64, payload_kb: f64, baseline: &Baseline) -> ZScorePair {
    ZScorePair {
        latency: zscore(latency_ms, baseline.mean_latency, baseline.stddev_latency),
        payload: zscore(payload_kb, baseline.mean_payload, baseline.stddev_payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_at_mean_scores_zero() {
        assert_eq!(zscore(150.0, 150.0, 25.0), 0.0);
    }

    #[test]
    fn one_sigma_above_scores_one() {
        assert_eq!(zscore(175.0, 150.0, 25.0), 1.0);
        assert_eq!(zscore(125.0, 150.0, 25.0), -1.0);
    }

    #[test]
    fn zero_variance_at_mean_is_zero() {
        assert_eq!(zscore(100.0, 100.0, 0.0), 0.0);
    }

    #[test]
    fn zero_variance_off_mean_is_infinite() {
        let z = zscore(101.0, 100.0, 0.0);
        assert!(z.is_infinite() && z > 0.0);
    }
}
