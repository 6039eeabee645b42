//! Strategy container configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order of strategy callback and persistence for bridge reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOrdering {
    /// Notify the strategy, then persist (lower reaction latency).
    #[default]
    CallbackFirst,
    /// Persist, then notify the strategy.
    PersistFirst,
}

/// Strategy container configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Whether strategies may send orders. Also enables the shutdown drain.
    #[serde(default = "default_order_flow_enabled")]
    pub order_flow_enabled: bool,
    /// Cancel rounds during the shutdown drain.
    #[serde(default = "default_drain_iterations")]
    pub drain_iterations: u32,
    /// Sleep between drain rounds.
    #[serde(default = "default_drain_sleep_ms")]
    pub drain_sleep_ms: u64,
    /// Callback/persist ordering for execution reports.
    #[serde(default)]
    pub persist_ordering: PersistOrdering,
    /// Largest quantity a single order may carry.
    #[serde(default = "default_max_order_quantity")]
    pub max_order_quantity: Decimal,
    /// New orders allowed per one-second window.
    #[serde(default = "default_max_orders_per_second")]
    pub max_orders_per_second: u32,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            order_flow_enabled: default_order_flow_enabled(),
            drain_iterations: default_drain_iterations(),
            drain_sleep_ms: default_drain_sleep_ms(),
            persist_ordering: PersistOrdering::default(),
            max_order_quantity: default_max_order_quantity(),
            max_orders_per_second: default_max_orders_per_second(),
        }
    }
}

const fn default_order_flow_enabled() -> bool {
    true
}

const fn default_drain_iterations() -> u32 {
    10
}

const fn default_drain_sleep_ms() -> u64 {
    500
}

fn default_max_order_quantity() -> Decimal {
    Decimal::from(100_000)
}

const fn default_max_orders_per_second() -> u32 {
    50
}
