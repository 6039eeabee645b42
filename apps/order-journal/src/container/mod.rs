//! Strategy Container
//!
//! Lifecycle glue between strategies, the order processor chain and the
//! journal:
//!
//! - [`strategy`]: callbacks a hosted strategy implements
//! - [`chain`]: pre-trade stages and the exchange-facing router port
//! - [`lifecycle`]: the container itself (admission gate, persistence
//!   points, startup recovery, shutdown drain)

pub mod chain;
pub mod lifecycle;
pub mod strategy;

pub use chain::{
    OrderRouter, OrderStage, ProcessorChain, QuantityLimitStage, RouteOutcome, ThrottleStage,
};
pub use lifecycle::{DrainReport, ExecutionReport, RecoveryReport, StrategyContainer};
pub use strategy::Strategy;
