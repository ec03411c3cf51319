//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Nonce allocation and resyncs per address
//! - Transaction submissions, retries and failures per account
//! - End-to-end dispatch latency

use crate::error::{DispatchResult, RetryKind};

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::Address;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Nonce metrics
    pub static ref NONCE_ALLOCATED: CounterVec = register_counter_vec!(
        "dispatcher_nonces_allocated_total",
        "Total nonces handed out by the allocator",
        &["address"]
    ).unwrap();

    pub static ref NONCE_RESYNCS: CounterVec = register_counter_vec!(
        "dispatcher_nonce_resyncs_total",
        "Total forced nonce resyncs from the chain",
        &["address"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "dispatcher_transactions_submitted_total",
        "Total transactions mined successfully",
        &["account"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "dispatcher_transactions_failed_total",
        "Total failed sends by error kind",
        &["account", "kind"]
    ).unwrap();

    pub static ref TX_RETRIES: CounterVec = register_counter_vec!(
        "dispatcher_transaction_retries_total",
        "Total submission retries by cause",
        &["account", "kind"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "dispatcher_send_latency_seconds",
        "End-to-end send latency including retries",
        &["account"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
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

    pub async fn run(&self) -> DispatchResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

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

pub fn record_nonce_allocated(address: &Address) {
    NONCE_ALLOCATED
        .with_label_values(&[&format!("{:?}", address)])
        .inc();
}

pub fn record_nonce_resync(address: &Address) {
    NONCE_RESYNCS
        .with_label_values(&[&format!("{:?}", address)])
        .inc();
}

pub fn record_tx_submitted(account: &str) {
    TX_SUBMITTED.with_label_values(&[account]).inc();
}

pub fn record_tx_failed(account: &str, kind: &str) {
    TX_FAILED.with_label_values(&[account, kind]).inc();
}

pub fn record_tx_retry(account: &str, kind: RetryKind) {
    TX_RETRIES
        .with_label_values(&[account, kind.as_str()])
        .inc();
}

pub fn record_tx_latency(account: &str, latency_secs: f64) {
    TX_LATENCY.with_label_values(&[account]).observe(latency_secs);
}
