//! Observability configuration for logging, tracing export and metrics.

use serde::{Deserialize, Serialize};

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Export spans over OTLP.
    #[serde(default)]
    pub otel_enabled: bool,
    /// OTLP gRPC endpoint.
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,
    /// Service name reported to the collector.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Prometheus listener address; metrics are not exported when unset.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            otel_enabled: false,
            otlp_endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
            metrics_addr: None,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "order-journal".to_string()
}
