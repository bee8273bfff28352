//! Statistical analysis -- rolling baselines and z-score computation.

pub mod baseline;
pub mod detector;

pub use baseline::{compute_baseline, Baseline};
pub use detector::score_sample;
