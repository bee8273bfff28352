//! Per-service drift state machine.
//!
//! Consumes z-score pairs in sample order and decides when a service moves
//! between INSUFFICIENT_DATA, STABLE, and DRIFT_DETECTED. Pure and total:
//! the only outputs are optional transitions, and nothing here blocks or
//! fails. The worker feeds a scratch clone and adopts it only after the
//! durable write commits, so counters never run ahead of the store.

use std::collections::VecDeque;

use crate::config::DetectionConfig;
use crate::detect::{HealthState, Transition, TransitionReason, ZScorePair};

#[derive(Debug, Clone)]
pub struct DriftStateMachine {
    cfg: DetectionConfig,
    state: HealthState,
    consecutive_severe: u32,
    /// Max magnitude observed within the current severe run.
    severe_run_max: f64,
    consecutive_normal: u32,
    /// Anomaly flags (m > moderate_zscore) for the trailing window.
    ring: VecDeque<bool>,
    /// Trailing z-score pairs kept for audit payloads.
    trailing: VecDeque<ZScorePair>,
}

impl DriftStateMachine {
    pub fn new(cfg: DetectionConfig, initial_state: HealthState) -> Self {
        Self {
            cfg,
            state: initial_state,
            consecutive_severe: 0,
            severe_run_max: 0.0,
            consecutive_normal: 0,
            ring: VecDeque::with_capacity(cfg.moderate_window as usize),
            trailing: VecDeque::with_capacity(cfg.moderate_window as usize),
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    /// The first baseline for a service moves it out of INSUFFICIENT_DATA.
    /// No counters are consulted; calling this in any other state is a no-op.
    pub fn baseline_ready(&mut self, sample_count: u64) -> Option<Transition> {
        if self.state != HealthState::InsufficientData {
            return None;
        }
        Some(self.fire(
            HealthState::Stable,
            TransitionReason::BaselineReady { sample_count },
        ))
    }

    /// Feed one z-score pair. Counters always update; a transition fires only
    /// when the current state's rule is satisfied.
    pub fn observe(&mut self, z: ZScorePair) -> Option<Transition> {
        let m = z.magnitude();

        if m > self.cfg.severe_zscore {
            self.consecutive_severe += 1;
            if m > self.severe_run_max {
                self.severe_run_max = m;
            }
        } else {
            self.consecutive_severe = 0;
            self.severe_run_max = 0.0;
        }

        self.ring.push_back(m > self.cfg.moderate_zscore);
        if self.ring.len() > self.cfg.moderate_window as usize {
            self.ring.pop_front();
        }

        self.trailing.push_back(z);
        if self.trailing.len() > self.cfg.moderate_window as usize {
            self.trailing.pop_front();
        }

        if m <= self.cfg.normal_zscore {
            self.consecutive_normal += 1;
        } else {
            self.consecutive_normal = 0;
        }

        match self.state {
            HealthState::Stable => {
                // Rule A (severe run) wins over rule B on the same sample.
                if self.consecutive_severe >= self.cfg.severe_consecutive {
                    let reason = TransitionReason::ConsecutiveSevereAnomalies {
                        consecutive_count: self.consecutive_severe,
                        max_zscore: self.severe_run_max,
                    };
                    return Some(self.fire(HealthState::DriftDetected, reason));
                }
                let window_count = self.ring.iter().filter(|flag| **flag).count() as u32;
                if window_count >= self.cfg.moderate_count {
                    let reason = TransitionReason::ModerateAnomalyDensity {
                        window_count,
                        window_size: self.cfg.moderate_window,
                    };
                    return Some(self.fire(HealthState::DriftDetected, reason));
                }
                None
            }
            HealthState::DriftDetected => {
                if self.consecutive_normal >= self.cfg.recovery_consecutive {
                    let reason = TransitionReason::Recovery {
                        normal_count: self.consecutive_normal,
                    };
                    return Some(self.fire(HealthState::Stable, reason));
                }
                None
            }
            // Without a baseline there is nothing to detect against.
            HealthState::InsufficientData => None,
        }
    }

    fn fire(&mut self, to: HealthState, reason: TransitionReason) -> Transition {
        let transition = Transition {
            from: self.state,
            to,
            reason,
            trigger_samples: self.trailing.iter().copied().collect(),
        };
        self.state = to;
        self.consecutive_severe = 0;
        self.severe_run_max = 0.0;
        self.consecutive_normal = 0;
        self.ring.clear();
        self.trailing.clear();
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stable_machine() -> DriftStateMachine {
        DriftStateMachine::new(DetectionConfig::default(), HealthState::Stable)
    }

    fn z(latency: f64) -> ZScorePair {
        ZScorePair {
            latency,
            payload: 0.0,
        }
    }

    #[test]
    fn baseline_ready_fires_once() {
        let mut sm = DriftStateMachine::new(
            DetectionConfig::default(),
            HealthState::InsufficientData,
        );
        let t = sm.baseline_ready(100).expect("first call transitions");
        assert_eq!(t.from, HealthState::InsufficientData);
        assert_eq!(t.to, HealthState::Stable);
        assert_eq!(t.reason, TransitionReason::BaselineReady { sample_count: 100 });
        assert!(sm.baseline_ready(100).is_none());
    }

    #[test]
    fn constant_input_never_leaves_stable() {
        let mut sm = stable_machine();
        for _ in 0..500 {
            assert!(sm.observe(z(0.0)).is_none());
        }
        assert_eq!(sm.state(), HealthState::Stable);
    }

    #[test]
    fn five_consecutive_severe_trip_drift() {
        let mut sm = stable_machine();
        for _ in 0..4 {
            assert!(sm.observe(z(16.0)).is_none());
        }
        let t = sm.observe(z(16.2)).expect("fifth severe sample trips");
        assert_eq!(t.to, HealthState::DriftDetected);
        match t.reason {
            TransitionReason::ConsecutiveSevereAnomalies {
                consecutive_count,
                max_zscore,
            } => {
                assert_eq!(consecutive_count, 5);
                assert!(max_zscore >= 15.0);
            }
            other => panic!("unexpected reason: {other:?}"),
        }
        assert_eq!(t.trigger_samples.len(), 5);
    }

    #[test]
    fn severe_run_resets_on_normal_sample() {
        let mut sm = stable_machine();
        for _ in 0..4 {
            assert!(sm.observe(z(5.0)).is_none());
        }
        assert!(sm.observe(z(0.1)).is_none());
        // Run broken; four more severe samples must not trip.
        for _ in 0..4 {
            assert!(sm.observe(z(5.0)).is_none());
        }
        assert_eq!(sm.state(), HealthState::Stable);
    }

    #[test]
    fn moderate_density_trips_on_tenth_anomaly_in_window() {
        let mut sm = stable_machine();
        // Alternate moderate anomalies (z = 2.8, below severe) with normals.
        let mut transition = None;
        let mut fed = 0;
        for i in 0..20 {
            let sample = if i % 2 == 0 { z(2.8) } else { z(0.0) };
            fed += 1;
            if let Some(t) = sm.observe(sample) {
                transition = Some(t);
                break;
            }
        }
        let t = transition.expect("tenth anomaly within the window trips");
        assert_eq!(fed, 19); // anomalies at positions 1,3,..,19
        match t.reason {
            TransitionReason::ModerateAnomalyDensity {
                window_count,
                window_size,
            } => {
                assert_eq!(window_count, 10);
                assert_eq!(window_size, 20);
            }
            other => panic!("unexpected reason: {other:?}"),
        }
    }

    #[test]
    fn severe_rule_checked_before_moderate_rule() {
        // Nine moderate anomalies queued up, then a severe run: rule A's
        // count completes on the same sample the ring reaches ten.
        let mut cfg = DetectionConfig::default();
        cfg.severe_consecutive = 1;
        let mut sm = DriftStateMachine::new(cfg, HealthState::Stable);
        for _ in 0..9 {
            assert!(sm.observe(z(2.8)).is_none());
        }
        let t = sm.observe(z(4.0)).expect("both rules satisfied");
        assert!(matches!(
            t.reason,
            TransitionReason::ConsecutiveSevereAnomalies { .. }
        ));
    }

    #[test]
    fn recovery_after_fifty_normals() {
        let mut sm = stable_machine();
        for _ in 0..5 {
            sm.observe(z(16.0));
        }
        assert_eq!(sm.state(), HealthState::DriftDetected);
        for _ in 0..49 {
            assert!(sm.observe(z(0.0)).is_none());
        }
        let t = sm.observe(z(0.0)).expect("fiftieth normal recovers");
        assert_eq!(t.to, HealthState::Stable);
        assert_eq!(t.reason, TransitionReason::Recovery { normal_count: 50 });
    }

    #[test]
    fn anomalous_sample_resets_recovery_count() {
        let mut sm = stable_machine();
        for _ in 0..5 {
            sm.observe(z(16.0));
        }
        for _ in 0..49 {
            assert!(sm.observe(z(0.0)).is_none());
        }
        // One excursion above the normal ceiling restarts the count.
        assert!(sm.observe(z(2.5)).is_none());
        for _ in 0..49 {
            assert!(sm.observe(z(0.0)).is_none());
        }
        assert_eq!(sm.state(), HealthState::DriftDetected);
        assert!(sm.observe(z(0.0)).is_some());
    }

    #[test]
    fn infinite_zscores_count_as_severe() {
        // Degenerate-sigma samples (z = +inf) behave like any severe anomaly.
        let mut sm = stable_machine();
        for _ in 0..4 {
            assert!(sm.observe(z(f64::INFINITY)).is_none());
        }
        let t = sm.observe(z(f64::INFINITY)).expect("five infinities trip");
        assert_eq!(t.to, HealthState::DriftDetected);
    }

    #[test]
    fn counters_do_not_leak_across_transitions() {
        let mut sm = stable_machine();
        for _ in 0..5 {
            sm.observe(z(16.0));
        }
        for _ in 0..50 {
            sm.observe(z(0.0));
        }
        assert_eq!(sm.state(), HealthState::Stable);
        // A fresh severe run needs the full five samples again.
        for _ in 0..4 {
            assert!(sm.observe(z(16.0)).is_none());
        }
        assert!(sm.observe(z(16.0)).is_some());
    }

    #[test]
    fn payload_zscore_contributes_to_magnitude() {
        let mut sm = stable_machine();
        for _ in 0..4 {
            sm.observe(ZScorePair {
                latency: 0.0,
                payload: -4.0,
            });
        }
        let t = sm
            .observe(ZScorePair {
                latency: 0.0,
                payload: -4.0,
            })
            .expect("negative payload z-scores count by magnitude");
        assert_eq!(t.to, HealthState::DriftDetected);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Transitions only ever walk the legal edges of the state graph.
        #[test]
        fn transitions_follow_legal_edges(zs in prop::collection::vec(-6.0f64..6.0, 1..400)) {
            let mut sm = stable_machine();
            for value in zs {
                if let Some(t) = sm.observe(z(value)) {
                    match (t.from, t.to) {
                        (HealthState::Stable, HealthState::DriftDetected)
                        | (HealthState::DriftDetected, HealthState::Stable) => {}
                        other => prop_assert!(false, "illegal edge {other:?}"),
                    }
                }
            }
        }

        /// A drift transition implies rule A or rule B held on that sample,
        /// recomputed against an independent history replay.
        #[test]
        fn drift_requires_a_satisfied_rule(zs in prop::collection::vec(-6.0f64..6.0, 1..400)) {
            let cfg = DetectionConfig::default();
            let mut sm = stable_machine();
            let mut history: Vec<f64> = Vec::new();
            for value in zs {
                let m = value.abs();
                history.push(m);
                match sm.observe(z(value)) {
                    Some(t) if t.to == HealthState::DriftDetected => {
                        let severe_run = history
                            .iter()
                            .rev()
                            .take_while(|m| **m > cfg.severe_zscore)
                            .count();
                        let window_hits = history
                            .iter()
                            .rev()
                            .take(cfg.moderate_window as usize)
                            .filter(|m| **m > cfg.moderate_zscore)
                            .count();
                        prop_assert!(
                            severe_run >= cfg.severe_consecutive as usize
                                || window_hits >= cfg.moderate_count as usize,
                            "drift fired without a satisfied rule"
                        );
                        history.clear();
                    }
                    Some(_) => history.clear(),
                    None => {}
                }
            }
        }

        /// Recovery implies the trailing Krec samples were all normal.
        #[test]
        fn recovery_requires_trailing_normals(zs in prop::collection::vec(-6.0f64..6.0, 1..600)) {
            let cfg = DetectionConfig::default();
            let mut sm = DriftStateMachine::new(cfg, HealthState::DriftDetected);
            let mut history: Vec<f64> = Vec::new();
            for value in zs {
                history.push(value.abs());
                if let Some(t) = sm.observe(z(value)) {
                    if t.to == HealthState::Stable {
                        let trailing_normals = history
                            .iter()
                            .rev()
                            .take_while(|m| **m <= cfg.normal_zscore)
                            .count();
                        prop_assert!(
                            trailing_normals >= cfg.recovery_consecutive as usize,
                            "recovered with only {trailing_normals} trailing normals"
                        );
                    }
                    history.clear();
                }
            }
        }
    }
}
