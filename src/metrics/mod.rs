//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Submissions by send mode and their outcomes
//! - Nonce allocation, release and eviction
//! - Fee cache refreshes
//! - Synchronous send latency and timeouts

use crate::error::{AdmissionError, AdmissionResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "tx_admission_transactions_submitted_total",
        "Total transactions accepted by the endpoint",
        &["mode"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "tx_admission_transactions_confirmed_total",
        "Total transactions confirmed",
        &[]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "tx_admission_transactions_failed_total",
        "Total transactions rejected or reverted",
        &[]
    ).unwrap();

    // Nonce metrics
    pub static ref NONCE_EVENTS: CounterVec = register_counter_vec!(
        "tx_admission_nonce_events_total",
        "Nonce allocator events",
        &["event"]
    ).unwrap();

    // Fee metrics
    pub static ref FEE_CACHE_REFRESHES: CounterVec = register_counter_vec!(
        "tx_admission_fee_cache_refreshes_total",
        "Fee cache refreshes from the remote ledger",
        &["cache"]
    ).unwrap();

    // Sync send metrics
    pub static ref SYNC_SEND_TIMEOUTS: CounterVec = register_counter_vec!(
        "tx_admission_sync_send_timeouts_total",
        "Synchronous sends that gave up waiting",
        &[]
    ).unwrap();

    pub static ref SYNC_SEND_LATENCY: HistogramVec = register_histogram_vec!(
        "tx_admission_sync_send_latency_seconds",
        "Time from build to settlement of a synchronous send",
        &[],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
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

    pub async fn run(&self) -> AdmissionResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| AdmissionError::Internal(format!("bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| AdmissionError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

// Helper functions to record metrics

pub fn record_tx_submitted(mode: &str) {
    TX_SUBMITTED.with_label_values(&[mode]).inc();
}

pub fn record_tx_confirmed() {
    TX_CONFIRMED.with_label_values(&[]).inc();
}

pub fn record_tx_failed() {
    TX_FAILED.with_label_values(&[]).inc();
}

pub fn record_nonce_allocated() {
    NONCE_EVENTS.with_label_values(&["allocated"]).inc();
}

pub fn record_nonce_released() {
    NONCE_EVENTS.with_label_values(&["released"]).inc();
}

pub fn record_nonce_evicted() {
    NONCE_EVENTS.with_label_values(&["evicted"]).inc();
}

pub fn record_fee_cache_refresh(cache: &str) {
    FEE_CACHE_REFRESHES.with_label_values(&[cache]).inc();
}

pub fn record_sync_send_timeout() {
    SYNC_SEND_TIMEOUTS.with_label_values(&[]).inc();
}

pub fn record_sync_send_latency(latency_secs: f64) {
    SYNC_SEND_LATENCY.with_label_values(&[]).observe(latency_secs);
}
