//! Order processor chain.
//!
//! An ordered list of [`OrderStage`]s composed once at startup and ending in
//! an [`OrderRouter`]. The first stage to veto short-circuits with a local
//! reject; the router is never reached.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::ContainerConfig;
use crate::domain::{Order, OrderId, OrderReject};
use crate::observability;

// ============================================================================
// Router port
// ============================================================================

/// Result of routing a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the exchange; the order is awaiting acknowledgment.
    Accepted(Order),
    /// Refused before or by the exchange.
    Rejected(OrderReject),
}

/// Exchange-facing terminus of the chain (the order bridge).
pub trait OrderRouter: Send {
    /// Transmit a new order.
    fn send(&mut self, order: &Order) -> RouteOutcome;

    /// Request cancellation of an order.
    fn cancel(&mut self, order_id: &OrderId) -> Result<(), String>;

    /// Request a quantity/price change.
    fn modify(
        &mut self,
        order_id: &OrderId,
        quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<(), String>;

    /// Orders the bridge still considers open.
    fn open_orders(&self) -> Vec<Order>;

    /// Track a recovered order without transmitting anything.
    fn restore(&mut self, order: &Order);
}

// ============================================================================
// Stages
// ============================================================================

/// A pre-trade check that may veto a new order.
pub trait OrderStage: Send {
    /// Stage name used in reject reasons.
    fn name(&self) -> &'static str;

    /// `Err(reason)` vetoes the order.
    fn check(&mut self, order: &Order) -> Result<(), String>;
}

/// Vetoes orders above a maximum quantity, or with a non-positive quantity.
#[derive(Debug, Clone)]
pub struct QuantityLimitStage {
    max_quantity: Decimal,
}

impl QuantityLimitStage {
    /// Create a stage with the given limit.
    #[must_use]
    pub const fn new(max_quantity: Decimal) -> Self {
        Self { max_quantity }
    }
}

impl OrderStage for QuantityLimitStage {
    fn name(&self) -> &'static str {
        "quantity_limit"
    }

    fn check(&mut self, order: &Order) -> Result<(), String> {
        if order.quantity <= Decimal::ZERO {
            return Err(format!("quantity {} must be positive", order.quantity));
        }
        if order.quantity > self.max_quantity {
            return Err(format!(
                "quantity {} exceeds limit {}",
                order.quantity, self.max_quantity
            ));
        }
        Ok(())
    }
}

/// Vetoes new orders beyond `max_orders` per sliding window.
#[derive(Debug)]
pub struct ThrottleStage {
    max_orders: usize,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl ThrottleStage {
    /// Create a throttle of `max_orders` per `window`.
    #[must_use]
    pub fn new(max_orders: u32, window: Duration) -> Self {
        Self {
            max_orders: max_orders as usize,
            window,
            sent: VecDeque::new(),
        }
    }

    /// Throttle of `max_orders` per second.
    #[must_use]
    pub fn per_second(max_orders: u32) -> Self {
        Self::new(max_orders, Duration::from_secs(1))
    }
}

impl OrderStage for ThrottleStage {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn check(&mut self, _order: &Order) -> Result<(), String> {
        let now = Instant::now();
        while self
            .sent
            .front()
            .is_some_and(|sent| now.duration_since(*sent) >= self.window)
        {
            self.sent.pop_front();
        }

        if self.sent.len() >= self.max_orders {
            return Err(format!(
                "more than {} orders within {:?}",
                self.max_orders, self.window
            ));
        }
        self.sent.push_back(now);
        Ok(())
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Stages followed by the router.
pub struct ProcessorChain {
    stages: Vec<Box<dyn OrderStage>>,
    router: Box<dyn OrderRouter>,
}

impl ProcessorChain {
    /// A chain with no stages.
    #[must_use]
    pub fn new(router: Box<dyn OrderRouter>) -> Self {
        Self {
            stages: Vec::new(),
            router,
        }
    }

    /// The standard chain: quantity limit, then throttle (skipped when
    /// `max_orders_per_second` is 0).
    #[must_use]
    pub fn from_config(router: Box<dyn OrderRouter>, config: &ContainerConfig) -> Self {
        let chain = Self::new(router).with_stage(Box::new(QuantityLimitStage::new(
            config.max_order_quantity,
        )));
        if config.max_orders_per_second == 0 {
            chain
        } else {
            chain.with_stage(Box::new(ThrottleStage::per_second(
                config.max_orders_per_second,
            )))
        }
    }

    /// Append a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Box<dyn OrderStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Number of stages before the router.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when the chain has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the stages, then route.
    pub fn send(&mut self, order: &Order) -> RouteOutcome {
        for stage in &mut self.stages {
            if let Err(reason) = stage.check(order) {
                debug!(
                    order_id = %order.order_id,
                    stage = stage.name(),
                    reason = %reason,
                    "Order vetoed"
                );
                observability::record_admission_refused("stage_veto");
                return RouteOutcome::Rejected(OrderReject::local(
                    order,
                    format!("{}: {reason}", stage.name()),
                ));
            }
        }
        self.router.send(order)
    }

    /// Route a cancel.
    pub fn cancel(&mut self, order_id: &OrderId) -> Result<(), String> {
        self.router.cancel(order_id)
    }

    /// Route a modify.
    pub fn modify(
        &mut self,
        order_id: &OrderId,
        quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<(), String> {
        self.router.modify(order_id, quantity, limit_price)
    }

    /// Orders still open at the router.
    #[must_use]
    pub fn open_orders(&self) -> Vec<Order> {
        self.router.open_orders()
    }

    /// Track a recovered order at the router.
    pub fn restore(&mut self, order: &Order) {
        self.router.restore(order);
    }
}
