//! Prometheus metrics for the order journal.
//!
//! Recording goes through the `metrics` facade, so every helper here is a
//! no-op until [`init_metrics`] installs the exporter.
//!
//! # Example
//!
//! ```ignore
//! use order_journal::observability::{init_metrics, MetricsConfig};
//!
//! let config = MetricsConfig::with_addr("0.0.0.0:9095".parse()?);
//! init_metrics(&config)?;
//! ```

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for latency measurements (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl MetricsConfig {
    /// Create a metrics configuration for an address with default buckets.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            // 10us to 1s
            latency_buckets: vec![
                0.000_01, 0.000_05, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ],
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(addr = %config.listen_addr, "Prometheus metrics exporter started");

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Journal Sink Metrics
// ============================================================================

/// Record an item pushed onto a sink queue and the resulting depth.
pub fn record_enqueued(sink: &'static str, depth: usize) {
    counter!("order_journal_enqueued_total", "sink" => sink).increment(1);
    set_queue_depth(sink, depth);
}

/// Update the queue depth gauge.
pub fn set_queue_depth(sink: &'static str, depth: usize) {
    gauge!("order_journal_queue_depth", "sink" => sink).set(depth as f64);
}

/// Record a batch accepted by a sink.
///
/// # Arguments
///
/// * `sink` - `file` or `db`
/// * `records` - Records in the batch
/// * `latency_seconds` - Time spent in the sink write
pub fn record_batch_written(sink: &'static str, records: usize, latency_seconds: f64) {
    counter!("order_journal_records_written_total", "sink" => sink).increment(records as u64);
    histogram!("order_journal_write_latency_seconds", "sink" => sink).record(latency_seconds);
}

/// Record a failed sink write.
pub fn record_sink_failure(sink: &'static str) {
    counter!("order_journal_sink_failures_total", "sink" => sink).increment(1);
}

/// Record a sustained-failure alert.
pub fn record_sink_alert(sink: &'static str) {
    counter!("order_journal_sink_alerts_total", "sink" => sink).increment(1);
}

// ============================================================================
// Order Flow Metrics
// ============================================================================

/// Record an order refused before it reached the exchange.
///
/// # Arguments
///
/// * `reason` - `file_backpressure`, `db_backpressure` or `stage_veto`
pub fn record_admission_refused(reason: &'static str) {
    counter!("order_journal_admission_refused_total", "reason" => reason).increment(1);
}

/// Record send-to-persisted latency of a new order.
pub fn record_send_latency(latency_seconds: f64) {
    histogram!("order_journal_send_latency_seconds").record(latency_seconds);
}
