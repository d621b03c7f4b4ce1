//! Prometheus metrics
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, so library users and tests pay nothing for it.

use crate::error::GatewayError;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Gateway metrics collector
#[derive(Clone, Default)]
pub struct GatewayMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl GatewayMetrics {
    /// Install the global Prometheus recorder and describe every metric
    pub fn install() -> Result<Self, GatewayError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| GatewayError::Metrics(e.to_string()))?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Collector that records into whatever recorder is global, possibly none
    pub fn disabled() -> Self {
        Self::default()
    }

    fn register_metrics() {
        describe_counter!(
            "gateway_frames_received_total",
            Unit::Count,
            "Frames received from the gateway"
        );
        describe_counter!(
            "gateway_dispatches_routed_total",
            Unit::Count,
            "Dispatches handed to the event sink"
        );
        describe_counter!(
            "gateway_sessions_started_total",
            Unit::Count,
            "Sessions established with IDENTIFY"
        );
        describe_counter!(
            "gateway_sessions_resumed_total",
            Unit::Count,
            "Sessions resumed"
        );
        describe_counter!(
            "gateway_shard_closes_total",
            Unit::Count,
            "Shard connections closed, by close code"
        );
        describe_counter!(
            "gateway_shard_reconnects_total",
            Unit::Count,
            "Shards requeued for reconnection"
        );
        describe_counter!("gateway_errors_total", Unit::Count, "Total gateway errors");

        describe_histogram!(
            "gateway_heartbeat_latency_seconds",
            Unit::Seconds,
            "Heartbeat round-trip time"
        );

        describe_gauge!(
            "gateway_shards_ready",
            Unit::Count,
            "Number of shards in ready state"
        );
        describe_gauge!(
            "gateway_nats_connected",
            Unit::Count,
            "NATS connection status (1=connected, 0=disconnected)"
        );
    }

    pub fn record_frame(&self, shard_id: u32, op: &'static str) {
        counter!(
            "gateway_frames_received_total",
            "shard_id" => shard_id.to_string(),
            "op" => op
        )
        .increment(1);
    }

    pub fn record_dispatch_routed(&self, shard_id: u32) {
        counter!(
            "gateway_dispatches_routed_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    pub fn record_heartbeat_latency(&self, shard_id: u32, latency: Duration) {
        histogram!(
            "gateway_heartbeat_latency_seconds",
            "shard_id" => shard_id.to_string()
        )
        .record(latency.as_secs_f64());
    }

    pub fn record_session_started(&self, shard_id: u32) {
        counter!(
            "gateway_sessions_started_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    pub fn record_session_resumed(&self, shard_id: u32) {
        counter!(
            "gateway_sessions_resumed_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    pub fn record_close(&self, shard_id: u32, close_code: u16) {
        counter!(
            "gateway_shard_closes_total",
            "shard_id" => shard_id.to_string(),
            "close_code" => close_code.to_string()
        )
        .increment(1);
    }

    pub fn record_reconnect(&self, shard_id: u32) {
        counter!(
            "gateway_shard_reconnects_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    /// Record gateway error
    pub fn record_error(&self, error_type: &'static str) {
        counter!("gateway_errors_total", "error_type" => error_type).increment(1);
    }

    pub fn set_shards_ready(&self, count: usize) {
        gauge!("gateway_shards_ready").set(count as f64);
    }

    /// Set NATS connection status
    pub fn set_nats_connected(&self, connected: bool) {
        gauge!("gateway_nats_connected").set(if connected { 1.0 } else { 0.0 });
    }

    /// Render metrics in Prometheus format, empty when no recorder is installed
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }
}
