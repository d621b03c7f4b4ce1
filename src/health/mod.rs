//! Health check endpoints
//!
//! `/health` is liveness, `/ready` reports the client-level status and
//! `/metrics` exposes the Prometheus registry.

use crate::metrics::GatewayMetrics;
use crate::nats::NatsPublisher;
use crate::shard::{GatewayState, Status};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Per-shard line of the readiness report
#[derive(Debug, Serialize)]
pub struct ShardReport {
    pub id: u32,
    pub status: Status,
    pub sequence: i64,
    pub ping_ms: Option<u64>,
    pub pending_guilds: usize,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub status: Status,
    pub shards_total: usize,
    pub shards_ready: usize,
    pub nats_connected: bool,
    pub ping_ms: Option<u64>,
    pub ready_at: Option<u64>,
    pub events_received: u64,
    pub shards: Vec<ShardReport>,
}

/// Application state for health endpoints
#[derive(Clone)]
pub struct AppState {
    pub state: GatewayState,
    pub nats: Option<Arc<NatsPublisher>>,
    pub metrics: GatewayMetrics,
}

/// Create the health check router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health endpoint - always returns 200 if process is running
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn ready_report(state: &AppState) -> ReadyResponse {
    let gateway = &state.state;
    let nats_connected = state.nats.as_ref().map_or(true, |n| n.is_connected());
    let status = gateway.client_status();

    let shards = gateway
        .shard_ids()
        .into_iter()
        .filter_map(|id| gateway.snapshot(id).map(|snapshot| (id, snapshot)))
        .map(|(id, snapshot)| ShardReport {
            id,
            status: snapshot.status,
            sequence: snapshot.sequence,
            ping_ms: snapshot.ping.map(|ping| ping.as_millis() as u64),
            pending_guilds: snapshot.pending_guilds,
        })
        .collect();

    ReadyResponse {
        ready: status.is_ready() && nats_connected,
        status,
        shards_total: gateway.shard_count(),
        shards_ready: gateway.ready_shards(),
        nats_connected,
        ping_ms: gateway.average_ping().map(|ping| ping.as_millis() as u64),
        ready_at: gateway
            .ready_at()
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_millis() as u64),
        events_received: gateway.total_events_received(),
        shards,
    }
}

/// Readiness endpoint - returns 200 once every shard is ready
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = ready_report(&state);
    if response.ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Metrics endpoint - returns Prometheus format metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.set_shards_ready(state.state.ready_shards());
    if let Some(ref nats) = state.nats {
        state.metrics.set_nats_connected(nats.is_connected());
    }

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}
