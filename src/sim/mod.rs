//! Synthetic traffic simulator.
//!
//! Drives a running DriftWatch instance over HTTP with configurable traffic
//! shapes so the detection pipeline can be validated end to end: NORMAL is
//! healthy noise, SPIKE injects a latency plateau mid-run, CREEP ramps
//! latency linearly from healthy to degraded.

use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TrafficMode {
    Normal,
    Spike,
    Creep,
}

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub url: String,
    pub service_id: String,
    pub mode: TrafficMode,
    pub duration_seconds: u64,
    pub samples_per_second: u32,
}

#[derive(Debug)]
pub struct SimReport {
    pub simulation_id: Uuid,
    pub sent: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
}

const NORMAL_LATENCY_MEAN: f64 = 150.0;
const NORMAL_LATENCY_STD: f64 = 25.0;
const SPIKE_LATENCY_MEAN: f64 = 500.0;
const CREEP_END_LATENCY: f64 = 300.0;
const PAYLOAD_MEAN: f64 = 2.5;
const PAYLOAD_STD: f64 = 0.8;

/// One (latency_ms, payload_kb) observation.
type Point = (f64, f64);

pub fn generate(mode: TrafficMode, total_samples: usize, rng: &mut impl Rng) -> Vec<Point> {
    match mode {
        TrafficMode::Normal => (0..total_samples)
            .map(|_| healthy_point(rng))
            .collect(),
        TrafficMode::Spike => {
            // 40% normal, 30% spiked, 30% recovery.
            let phase1 = (total_samples as f64 * 0.4) as usize;
            let phase2 = (total_samples as f64 * 0.7) as usize;
            (0..total_samples)
                .map(|i| {
                    if i >= phase1 && i < phase2 {
                        let latency =
                            gaussian(rng, SPIKE_LATENCY_MEAN, SPIKE_LATENCY_MEAN * 0.15).max(1.0);
                        (latency, payload(rng))
                    } else {
                        healthy_point(rng)
                    }
                })
                .collect()
        }
        TrafficMode::Creep => (0..total_samples)
            .map(|i| {
                let progress = i as f64 / total_samples.max(1) as f64;
                let mean =
                    NORMAL_LATENCY_MEAN + (CREEP_END_LATENCY - NORMAL_LATENCY_MEAN) * progress;
                let latency = gaussian(rng, mean, NORMAL_LATENCY_STD).max(1.0);
                (latency, payload(rng))
            })
            .collect(),
    }
}

fn healthy_point(rng: &mut impl Rng) -> Point {
    let latency = gaussian(rng, NORMAL_LATENCY_MEAN, NORMAL_LATENCY_STD).max(1.0);
    (latency, payload(rng))
}

fn payload(rng: &mut impl Rng) -> f64 {
    // Log-normal-ish: exponentiated gaussian noise around the mean.
    let z = gaussian(rng, 0.0, PAYLOAD_STD / PAYLOAD_MEAN);
    (PAYLOAD_MEAN.ln() + z).exp().max(0.1)
}

/// Box-Muller gaussian sample.
fn gaussian(rng: &mut impl Rng, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std * z
}

/// Post generated traffic to the ingest endpoint at the configured rate.
pub async fn run(opts: SimOptions) -> Result<SimReport> {
    let simulation_id = Uuid::new_v4();
    let total = (opts.duration_seconds * opts.samples_per_second as u64) as usize;
    let mut rng = rand::thread_rng();
    let points = generate(opts.mode, total, &mut rng);

    info!(
        %simulation_id,
        service_id = %opts.service_id,
        mode = ?opts.mode,
        samples = total,
        "starting traffic simulation"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("failed to build HTTP client")?;
    let endpoint = format!("{}/v1/telemetry", opts.url.trim_end_matches('/'));
    let pace = Duration::from_secs_f64(1.0 / opts.samples_per_second.max(1) as f64);
    let mut ticker = tokio::time::interval(pace);

    let mut report = SimReport {
        simulation_id,
        sent: 0,
        accepted: 0,
        rejected: 0,
        failed: 0,
    };

    for (latency_ms, payload_kb) in points {
        ticker.tick().await;
        report.sent += 1;
        let body = json!({
            "service_id": opts.service_id,
            "latency_ms": latency_ms,
            "payload_kb": payload_kb,
        });
        match client.post(&endpoint).json(&body).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::ACCEPTED => report.accepted += 1,
            Ok(resp) if resp.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                report.rejected += 1;
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "unexpected ingest response");
                report.failed += 1;
            }
            Err(e) => {
                warn!(error = %e, "ingest request failed");
                report.failed += 1;
            }
        }
    }

    info!(
        %simulation_id,
        accepted = report.accepted,
        rejected = report.rejected,
        failed = report.failed,
        "simulation complete"
    );
    Ok(report)
}
