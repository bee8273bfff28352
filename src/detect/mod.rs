//! Drift detection domain types -- health states, transitions, audit events.

pub mod machine;

pub use machine::DriftStateMachine;

use serde::{Deserialize, Serialize};

/// Health state of a monitored service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    InsufficientData,
    Stable,
    DriftDetected,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::InsufficientData => "INSUFFICIENT_DATA",
            HealthState::Stable => "STABLE",
            HealthState::DriftDetected => "DRIFT_DETECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSUFFICIENT_DATA" => Some(HealthState::InsufficientData),
            "STABLE" => Some(HealthState::Stable),
            "DRIFT_DETECTED" => Some(HealthState::DriftDetected),
            _ => None,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a transition fired. The typed form is the in-memory contract; the
/// serialized JSON (via the `reason` tag) is what lands in `metadata` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TransitionReason {
    BaselineReady {
        sample_count: u64,
    },
    ConsecutiveSevereAnomalies {
        consecutive_count: u32,
        max_zscore: f64,
    },
    ModerateAnomalyDensity {
        window_count: u32,
        window_size: u32,
    },
    Recovery {
        normal_count: u32,
    },
}

impl TransitionReason {
    pub fn to_metadata(&self) -> serde_json::Value {
        // JSON has no infinity; clamp degenerate-sigma z values on the way out.
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let TransitionReason::ConsecutiveSevereAnomalies { max_zscore, .. } = self {
            if !max_zscore.is_finite() {
                value["max_zscore"] = serde_json::json!(clamp_for_json(*max_zscore));
            }
        }
        value
    }
}

/// A z-score pair for one analyzed sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZScorePair {
    pub latency: f64,
    pub payload: f64,
}

impl ZScorePair {
    /// The anomaly magnitude the state machine works with.
    pub fn magnitude(&self) -> f64 {
        self.latency.abs().max(self.payload.abs())
    }
}

/// A state change emitted by the state machine for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: HealthState,
    pub to: HealthState,
    pub reason: TransitionReason,
    /// Trailing z-score pairs at the moment of the transition, oldest first.
    pub trigger_samples: Vec<ZScorePair>,
}

/// Durable audit record of a transition. `id` is assigned by the store.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEvent {
    pub id: Option<i64>,
    pub service_id: String,
    pub detected_at_ms: i64,
    pub previous_state: HealthState,
    pub new_state: HealthState,
    pub trigger_samples: Vec<ZScorePair>,
    pub metadata: serde_json::Value,
}

/// Substitute for non-finite values in serialized output.
pub(crate) fn clamp_for_json(z: f64) -> f64 {
    if z.is_finite() {
        z
    } else if z > 0.0 {
        1.0e9
    } else {
        -1.0e9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_text() {
        for state in [
            HealthState::InsufficientData,
            HealthState::Stable,
            HealthState::DriftDetected,
        ] {
            assert_eq!(HealthState::parse(state.as_str()), Some(state));
        }
        assert_eq!(HealthState::parse("BOGUS"), None);
    }

    #[test]
    fn reason_serializes_with_tag() {
        let reason = TransitionReason::ConsecutiveSevereAnomalies {
            consecutive_count: 5,
            max_zscore: 16.0,
        };
        let value = reason.to_metadata();
        assert_eq!(value["reason"], "consecutive_severe_anomalies");
        assert_eq!(value["consecutive_count"], 5);
        assert_eq!(value["max_zscore"], 16.0);
    }

    #[test]
    fn infinite_max_zscore_is_clamped_in_metadata() {
        let reason = TransitionReason::ConsecutiveSevereAnomalies {
            consecutive_count: 5,
            max_zscore: f64::INFINITY,
        };
        let value = reason.to_metadata();
        assert_eq!(value["max_zscore"], 1.0e9);
    }
}
