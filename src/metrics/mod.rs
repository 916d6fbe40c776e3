//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - PairCreated events seen and matched
//! - Per-endpoint submission outcomes and broadcast latency
//! - Nonce resyncs and confirmations
//! - Read provider health

use crate::error::{SniperError, SniperResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_counter,
    CounterVec, Encoder, GaugeVec, HistogramVec, IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "sniper_chain_connected",
        "Read provider status (1=healthy, 0=unreachable)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "sniper_chain_block_height",
        "Last block scanned for PairCreated logs",
        &["chain_id"]
    ).unwrap();

    // Event metrics
    pub static ref PAIRS_SEEN: IntCounter = register_int_counter!(
        "sniper_pairs_seen_total",
        "PairCreated events received"
    ).unwrap();

    pub static ref PAIRS_MATCHED: IntCounter = register_int_counter!(
        "sniper_pairs_matched_total",
        "PairCreated events involving the base asset"
    ).unwrap();

    // Broadcast metrics
    pub static ref ENDPOINT_OUTCOMES: CounterVec = register_counter_vec!(
        "sniper_endpoint_outcomes_total",
        "Submission outcomes per endpoint",
        &["endpoint", "outcome"]
    ).unwrap();

    pub static ref BROADCAST_LATENCY: HistogramVec = register_histogram_vec!(
        "sniper_broadcast_latency_seconds",
        "Time from broadcast start to its result",
        &["result"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    // Nonce metrics
    pub static ref NONCE_RESYNCS: CounterVec = register_counter_vec!(
        "sniper_nonce_resyncs_total",
        "Nonce resyncs by reason",
        &["reason"]
    ).unwrap();

    pub static ref CONFIRMATIONS: CounterVec = register_counter_vec!(
        "sniper_confirmations_total",
        "Watched transactions by final status",
        &["status"]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECKS: IntCounter = register_int_counter!(
        "sniper_health_checks_total",
        "Health check rounds completed"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> SniperResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| SniperError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| SniperError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn render() -> SniperResult<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| SniperError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| SniperError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_blocks_processed(chain_id: u64, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(block_number as f64);
}

pub fn record_pair_seen() {
    PAIRS_SEEN.inc();
}

pub fn record_pair_matched() {
    PAIRS_MATCHED.inc();
}

pub fn record_endpoint_outcome(endpoint: usize, outcome: &str) {
    ENDPOINT_OUTCOMES
        .with_label_values(&[&endpoint.to_string(), outcome])
        .inc();
}

pub fn record_broadcast(result: &str, latency_secs: f64) {
    BROADCAST_LATENCY
        .with_label_values(&[result])
        .observe(latency_secs);
}

pub fn record_nonce_resync(reason: &str) {
    NONCE_RESYNCS.with_label_values(&[reason]).inc();
}

pub fn record_confirmation(status: &str) {
    CONFIRMATIONS.with_label_values(&[status]).inc();
}

pub fn record_health_check() {
    HEALTH_CHECKS.inc();
}
