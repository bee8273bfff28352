//! API route definitions and handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::error;

use crate::api::types::{
    ErrorBody, HealthResponse, SystemStatusResponse, TelemetryAccepted, TelemetryRequest,
};
use crate::api::AppState;
use crate::ingest::EnqueueOutcome;
use crate::storage::Sample;

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(liveness))
        .route("/v1/telemetry", post(ingest_telemetry))
        .route("/v1/health/:service_id", get(service_health))
        .route("/v1/baseline/:service_id", get(service_baseline))
        .route("/v1/system/status", get(system_status))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "DriftWatch",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Statistical drift detection for service telemetry",
        "endpoints": {
            "telemetry": "POST /v1/telemetry",
            "health": "GET /v1/health/{service_id}",
            "baseline": "GET /v1/baseline/{service_id}",
            "system": "GET /v1/system/status"
        }
    }))
}

/// Liveness: 200 while the queue accepts and the store answers.
async fn liveness(State(state): State<AppState>) -> Response {
    if !state.queue.is_open() {
        return service_unavailable("shutting_down", "ingestion is draining");
    }
    let store = state.store.clone();
    let ping = tokio::task::spawn_blocking(move || store.ping()).await;
    match ping {
        Ok(Ok(())) => Json(json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339()
        }))
        .into_response(),
        _ => service_unavailable("store_unavailable", "database did not respond"),
    }
}

async fn ingest_telemetry(
    State(state): State<AppState>,
    Json(request): Json<TelemetryRequest>,
) -> Response {
    let now = Utc::now();
    let timestamp = match request.validate(&state.config.api, now) {
        Ok(ts) => ts,
        Err(detail) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorBody {
                    error: "validation_failed",
                    detail,
                }),
            )
                .into_response();
        }
    };

    let sample = Sample {
        service_id: request.service_id.clone(),
        timestamp_ms: timestamp.timestamp_millis(),
        latency_ms: request.latency_ms,
        payload_kb: request.payload_kb,
        ingested_at_ms: now.timestamp_millis(),
    };

    match state.queue.enqueue(sample) {
        EnqueueOutcome::Accepted => (
            StatusCode::ACCEPTED,
            Json(TelemetryAccepted {
                status: "accepted",
                service_id: request.service_id,
                timestamp,
                message: format!("queued for analysis (depth: {})", state.stats.depth()),
            }),
        )
            .into_response(),
        EnqueueOutcome::QueueFull => {
            service_unavailable("queue_full", "ingestion queue full; retry with backoff")
        }
        EnqueueOutcome::ShuttingDown => {
            service_unavailable("shutting_down", "ingestion is draining")
        }
    }
}

async fn service_health(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Response {
    let store = state.store.clone();
    let sid = service_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        let health = store.get_health(&sid)?;
        let baseline = store.get_baseline(&sid)?;
        let sample_count = store.sample_count(&sid)?;
        anyhow::Ok((health, baseline, sample_count))
    })
    .await;

    match result {
        Ok(Ok((Some(health), baseline, sample_count))) => {
            Json(HealthResponse::new(health, sample_count, baseline)).into_response()
        }
        Ok(Ok((None, _, _))) => not_found(&service_id),
        Ok(Err(e)) => internal_error("health lookup failed", &service_id, e),
        Err(e) => internal_error("health lookup task failed", &service_id, e.into()),
    }
}

async fn service_baseline(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Response {
    let store = state.store.clone();
    let sid = service_id.clone();
    let result = tokio::task::spawn_blocking(move || store.get_baseline(&sid)).await;

    match result {
        Ok(Ok(Some(baseline))) => {
            Json(crate::api::types::BaselineResponse::from(baseline)).into_response()
        }
        Ok(Ok(None)) => not_found(&service_id),
        Ok(Err(e)) => internal_error("baseline lookup failed", &service_id, e),
        Err(e) => internal_error("baseline lookup task failed", &service_id, e.into()),
    }
}

async fn system_status(State(state): State<AppState>) -> Response {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.system_stats()).await;

    match result {
        Ok(Ok(stats)) => Json(SystemStatusResponse {
            status: "healthy",
            uptime_seconds: state.started_at.elapsed().as_secs_f64(),
            services_monitored: stats.service_count,
            total_telemetry_records: stats.total_samples,
            database_size_mb: stats.bytes_on_disk as f64 / (1024.0 * 1024.0),
            queue_depth: state.stats.depth(),
            ingest: state.stats.counters(),
        })
        .into_response(),
        Ok(Err(e)) => internal_error("system stats failed", "-", e),
        Err(e) => internal_error("system stats task failed", "-", e.into()),
    }
}

fn not_found(service_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "unknown_service",
            detail: format!("no data for service: {service_id}"),
        }),
    )
        .into_response()
}

fn service_unavailable(error: &'static str, detail: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorBody {
            error,
            detail: detail.to_string(),
        }),
    )
        .into_response()
}

fn internal_error(context: &str, service_id: &str, e: anyhow::Error) -> Response {
    error!(%service_id, error = %e, "{context}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "internal_error",
            detail: context.to_string(),
        }),
    )
        .into_response()
}
