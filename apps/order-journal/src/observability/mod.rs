//! Observability module for metrics, tracing, and logging.
//!
//! This module provides instrumentation for the journal sinks and the
//! order path, including Prometheus metrics export and OTLP tracing.

mod metrics;
mod telemetry;

pub use self::metrics::{
    MetricsConfig, MetricsError, init_metrics, record_admission_refused, record_batch_written,
    record_enqueued, record_send_latency, record_sink_alert, record_sink_failure, set_queue_depth,
};
pub use self::telemetry::{TelemetryGuard, init_telemetry};
