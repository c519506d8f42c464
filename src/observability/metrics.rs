//! Metrics collection and exposition.
//!
//! # Metrics
//! - `chain_bytes_in_total` (counter): bytes read from sockets
//! - `chain_bytes_out_total` (counter): bytes written to sockets
//! - `chunked_chunks_decoded_total` (counter): complete chunks decoded
//! - `tls_errors_total` (counter): TLS sessions retired by a fatal fault
//! - `connections_total` (counter): connections accepted
//!
//! Without an installed recorder every update is a no-op, so library code
//! records unconditionally.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_bytes_in(n: usize) {
    metrics::counter!("chain_bytes_in_total").increment(n as u64);
}

pub fn record_bytes_out(n: usize) {
    metrics::counter!("chain_bytes_out_total").increment(n as u64);
}

pub fn record_chunk_decoded() {
    metrics::counter!("chunked_chunks_decoded_total").increment(1);
}

pub fn record_tls_error() {
    metrics::counter!("tls_errors_total").increment(1);
}

pub fn record_connection() {
    metrics::counter!("connections_total").increment(1);
}
