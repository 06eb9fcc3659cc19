//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Order polling and tracked orders
//! - Secret derivation
//! - Redemption submissions and receipts
//! - Chain RPC health

use crate::chain::ChainFamily;
use crate::error::{CoordinatorError, CoordinatorResult, ErrorKind};
use crate::status::Phase;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_counter, register_int_gauge, CounterVec,
    Encoder, GaugeVec, IntCounter, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // Order metrics
    pub static ref ORDERS_TRACKED: IntGauge = register_int_gauge!(
        "htlc_coordinator_orders_tracked",
        "Number of orders currently tracked"
    ).unwrap();

    pub static ref ORDER_PHASE: GaugeVec = register_gauge_vec!(
        "htlc_coordinator_order_phase",
        "Current phase index per order (0=initiated .. 5=complete)",
        &["order_id"]
    ).unwrap();

    pub static ref POLLS: CounterVec = register_counter_vec!(
        "htlc_coordinator_polls_total",
        "Total order polls by outcome",
        &["outcome"]
    ).unwrap();

    // Secret metrics
    pub static ref SECRETS_DERIVED: IntCounter = register_int_counter!(
        "htlc_coordinator_secrets_derived_total",
        "Total secrets derived from wallet signatures"
    ).unwrap();

    // Redemption metrics
    pub static ref REDEEMS_SUBMITTED: CounterVec = register_counter_vec!(
        "htlc_coordinator_redeems_submitted_total",
        "Total redemptions submitted",
        &["family"]
    ).unwrap();

    pub static ref REDEEMS_FAILED: CounterVec = register_counter_vec!(
        "htlc_coordinator_redeems_failed_total",
        "Total redemptions rejected before submission",
        &["family"]
    ).unwrap();

    pub static ref REDEEM_RECEIPTS: CounterVec = register_counter_vec!(
        "htlc_coordinator_redeem_receipts_total",
        "Total redemption receipts by status",
        &["status"]
    ).unwrap();

    // Chain metrics
    pub static ref CHAIN_HEALTHY: GaugeVec = register_gauge_vec!(
        "htlc_coordinator_chain_healthy",
        "Chain RPC health (1=healthy, 0=unreachable)",
        &["chain_id"]
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

    pub async fn run(&self) -> CoordinatorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CoordinatorError::Config(format!("Cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| CoordinatorError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buffer).into_owned())
}

// Helper functions to record metrics

pub fn set_orders_tracked(count: usize) {
    ORDERS_TRACKED.set(count as i64);
}

pub fn set_order_phase(order_id: &str, phase: Phase) {
    ORDER_PHASE
        .with_label_values(&[order_id])
        .set(phase.index() as f64);
}

pub fn remove_order(order_id: &str) {
    let _ = ORDER_PHASE.remove_label_values(&[order_id]);
}

pub fn record_poll() {
    POLLS.with_label_values(&["ok"]).inc();
}

pub fn record_poll_failure(kind: ErrorKind) {
    POLLS.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_secret_derived() {
    SECRETS_DERIVED.inc();
}

pub fn record_redeem_submitted(family: ChainFamily) {
    REDEEMS_SUBMITTED
        .with_label_values(&[family.as_str()])
        .inc();
}

pub fn record_redeem_failed(family: ChainFamily) {
    REDEEMS_FAILED
        .with_label_values(&[family.as_str()])
        .inc();
}

pub fn record_redeem_confirmed() {
    REDEEM_RECEIPTS.with_label_values(&["confirmed"]).inc();
}

pub fn record_redeem_reverted() {
    REDEEM_RECEIPTS.with_label_values(&["reverted"]).inc();
}

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_HEALTHY
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_handler_renders_registered_metrics() {
        record_redeem_submitted(ChainFamily::Starknet);
        set_order_phase("metrics-test-order", Phase::Redeeming);

        let (status, body) = metrics_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("htlc_coordinator_redeems_submitted_total"));
        assert!(body.contains("metrics-test-order"));

        remove_order("metrics-test-order");
    }
}
