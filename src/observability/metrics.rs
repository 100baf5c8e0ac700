//! Metrics collection and exposition.
//!
//! # Metrics
//! - `chainwatch_blocks_processed_total` (counter): blocks committed, by network
//! - `chainwatch_cursor_height` (gauge): next height to process, by network
//! - `chainwatch_outputs_added_total` / `chainwatch_outputs_removed_total` (counter)
//! - `chainwatch_rpc_retries_total` (counter): transient RPC retries, by operation
//! - `chainwatch_broadcasts_total` (counter): transactions accepted by the node
//!
//! Without an installed recorder every call is a no-op.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Needs a running Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_block_processed(network: &str, next_height: u64) {
    counter!("chainwatch_blocks_processed_total", "network" => network.to_string()).increment(1);
    gauge!("chainwatch_cursor_height", "network" => network.to_string()).set(next_height as f64);
}

pub fn record_outputs(network: &str, added: usize, removed: usize) {
    counter!("chainwatch_outputs_added_total", "network" => network.to_string())
        .increment(added as u64);
    counter!("chainwatch_outputs_removed_total", "network" => network.to_string())
        .increment(removed as u64);
}

pub fn record_rpc_retry(operation: &str) {
    counter!("chainwatch_rpc_retries_total", "operation" => operation.to_string()).increment(1);
}

pub fn record_broadcast(network: &str) {
    counter!("chainwatch_broadcasts_total", "network" => network.to_string()).increment(1);
}
