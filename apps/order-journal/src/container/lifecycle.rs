//! Strategy container: journals every order action around its state
//! transitions, gates sends on journal admission, recovers strategy state
//! at startup and drains open orders at shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use super::chain::{ProcessorChain, RouteOutcome};
use super::strategy::Strategy;
use crate::config::{ContainerConfig, PersistOrdering};
use crate::domain::{
    AccountId, Command, Fill, Order, OrderId, OrderReject, OrderStatus, Payload, StrategyId,
};
use crate::error::ContainerError;
use crate::journal::{JournalPort, JournalState, RecoveryReader};
use crate::observability;

/// An execution event reported by the order bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionReport {
    /// The exchange acknowledged the order.
    Ack(Order),
    /// The exchange rejected the order.
    Reject {
        /// Order as sent.
        order: Order,
        /// Reject details.
        reject: OrderReject,
    },
    /// The order was canceled.
    Canceled(Order),
    /// An execution against a tracked order.
    Fill(Fill),
}

/// Counts of state rebuilt during startup recovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Open orders handed back to their strategies.
    pub orders: usize,
    /// Non-flat positions handed back to their strategies.
    pub positions: usize,
}

/// Outcome of the shutdown drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Cancel rounds executed.
    pub iterations: u32,
    /// Orders still open when the drain gave up.
    pub remaining: usize,
}

/// Hosts strategies and drives their orders through the processor chain.
pub struct StrategyContainer<J: JournalPort> {
    journal: Arc<J>,
    chain: ProcessorChain,
    account: AccountId,
    config: ContainerConfig,
    strategies: HashMap<StrategyId, Box<dyn Strategy>>,
    orders: HashMap<OrderId, Order>,
    ready: bool,
}

impl<J: JournalPort> StrategyContainer<J> {
    /// Create a container for `account`. Order flow stays closed until
    /// [`start`](Self::start) completes recovery.
    pub fn new(
        journal: Arc<J>,
        chain: ProcessorChain,
        account: AccountId,
        config: ContainerConfig,
    ) -> Self {
        Self {
            journal,
            chain,
            account,
            config,
            strategies: HashMap::new(),
            orders: HashMap::new(),
            ready: false,
        }
    }

    /// Register a strategy under its own id.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.insert(strategy.id().clone(), strategy);
    }

    /// True once recovery completed and order flow is enabled.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// A tracked open order.
    #[must_use]
    pub fn tracked_order(&self, order_id: &OrderId) -> Option<&Order> {
        self.orders.get(order_id)
    }

    // ========================================================================
    // Startup recovery
    // ========================================================================

    /// Rebuild strategy state from the journal, then open order flow.
    ///
    /// The journal must be started. Every recovered order and position must
    /// belong to a registered strategy. Otherwise nothing is rebuilt and the
    /// error is returned.
    pub fn start(&mut self, reader: &dyn RecoveryReader) -> Result<RecoveryReport, ContainerError> {
        let journal_state = self.journal.state();
        if journal_state != JournalState::Started {
            warn!(state = %journal_state, "Recovery requires a started journal");
            return Err(ContainerError::NotReady);
        }

        let orders = reader.open_orders(&self.account)?;
        let positions = reader.positions(&self.account)?;

        for order in &orders {
            self.ensure_strategy(&order.strategy_id, || format!("open order {}", order.order_id))?;
        }
        for position in positions.iter().filter(|p| !p.is_flat()) {
            self.ensure_strategy(&position.strategy_id, || {
                format!("position in {}", position.instrument)
            })?;
        }

        let mut report = RecoveryReport::default();
        for order in orders {
            if let Some(strategy) = self.strategies.get_mut(&order.strategy_id) {
                strategy.rebuild_order(&order);
                self.chain.restore(&order);
                self.orders.insert(order.order_id.clone(), order);
                report.orders += 1;
            }
        }
        for position in positions.into_iter().filter(|p| !p.is_flat()) {
            if let Some(strategy) = self.strategies.get_mut(&position.strategy_id) {
                strategy.rebuild_pos(&position);
                report.positions += 1;
            }
        }

        self.ready = self.config.order_flow_enabled;
        info!(
            account = %self.account,
            orders = report.orders,
            positions = report.positions,
            order_flow = self.ready,
            "Strategy state recovered"
        );
        Ok(report)
    }

    fn ensure_strategy(
        &self,
        strategy_id: &StrategyId,
        context: impl FnOnce() -> String,
    ) -> Result<(), ContainerError> {
        if self.strategies.contains_key(strategy_id) {
            return Ok(());
        }
        let context = context();
        error!(strategy_id = %strategy_id, context = %context, "Recovered record has no strategy");
        Err(ContainerError::UnknownStrategy {
            strategy_id: strategy_id.clone(),
            context,
        })
    }

    // ========================================================================
    // Order actions
    // ========================================================================

    /// Send a new order.
    ///
    /// When journal admission is closed the order is rejected locally and the
    /// `(order, reject)` pair is journaled instead. Otherwise the command is
    /// journaled, the order runs through the chain and the result is
    /// journaled before the send latency is recorded.
    pub fn send_new(&mut self, order: Order) -> Result<RouteOutcome, ContainerError> {
        if !self.ready {
            return Err(ContainerError::NotReady);
        }
        if !self.strategies.contains_key(&order.strategy_id) {
            return Err(ContainerError::UnknownStrategy {
                strategy_id: order.strategy_id.clone(),
                context: format!("new order {}", order.order_id),
            });
        }

        if let Some(reason) = self.admission_refusal() {
            warn!(order_id = %order.order_id, reason, "Order refused by journal admission");
            let reject = OrderReject::local(&order, format!("journal admission: {reason}"));
            self.deliver_reject(&order, &reject)?;
            return Ok(RouteOutcome::Rejected(reject));
        }

        let started = Instant::now();
        self.persist(Payload::Command(Command::new_order(&order)))?;
        let outcome = self.chain.send(&order);
        match &outcome {
            RouteOutcome::Accepted(sent) => {
                self.persist(Payload::Order(sent.clone()))?;
                self.orders.insert(sent.order_id.clone(), sent.clone());
            }
            RouteOutcome::Rejected(reject) => self.deliver_reject(&order, reject)?,
        }
        observability::record_send_latency(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Change the quantity and/or limit price of a tracked order.
    ///
    /// Refused locally (nothing journaled, order unchanged) while journal
    /// admission is closed.
    pub fn modify(
        &mut self,
        order_id: &OrderId,
        quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<RouteOutcome, ContainerError> {
        if !self.ready {
            return Err(ContainerError::NotReady);
        }
        let order = self
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ContainerError::UnknownOrder(order_id.clone()))?;

        if let Some(reason) = self.admission_refusal() {
            warn!(order_id = %order_id, reason, "Modify refused by journal admission");
            return Ok(RouteOutcome::Rejected(OrderReject::local(
                &order,
                format!("journal admission: {reason}"),
            )));
        }

        self.persist(Payload::Command(Command::modify(&order, quantity, limit_price)))?;
        self.chain
            .modify(order_id, quantity, limit_price)
            .map_err(ContainerError::Router)?;

        let mut updated = order.with_status(order.status);
        updated.quantity = quantity;
        updated.limit_price = limit_price;
        self.persist(Payload::Order(updated.clone()))?;
        self.orders.insert(order_id.clone(), updated.clone());
        Ok(RouteOutcome::Accepted(updated))
    }

    /// Cancel a tracked order. Never gated by admission.
    pub fn cancel(&mut self, order_id: &OrderId) -> Result<(), ContainerError> {
        let order = self
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| ContainerError::UnknownOrder(order_id.clone()))?;

        self.persist(Payload::Command(Command::cancel(&order)))?;
        self.chain.cancel(order_id).map_err(ContainerError::Router)?;

        let pending = order.with_status(OrderStatus::PendingCancel);
        self.persist(Payload::Order(pending.clone()))?;
        self.orders.insert(order_id.clone(), pending);
        Ok(())
    }

    // ========================================================================
    // Execution reports
    // ========================================================================

    /// Apply an execution report: update tracking, call the owning strategy
    /// and journal the result in the configured order.
    pub fn on_execution_report(&mut self, report: ExecutionReport) -> Result<(), ContainerError> {
        match report {
            ExecutionReport::Ack(order) => {
                self.orders.insert(order.order_id.clone(), order.clone());
                let payloads = vec![Payload::Order(order.clone())];
                self.deliver(&order.strategy_id, payloads, |s| s.on_order_ack(&order))
            }
            ExecutionReport::Reject { order, reject } => {
                self.orders.remove(&order.order_id);
                self.deliver_reject(&order, &reject)
            }
            ExecutionReport::Canceled(order) => {
                self.orders.remove(&order.order_id);
                let payloads = vec![Payload::Order(order.clone())];
                self.deliver(&order.strategy_id, payloads, |s| s.on_cancel(&order))
            }
            ExecutionReport::Fill(fill) => {
                let mut order = self
                    .orders
                    .get(&fill.order_id)
                    .cloned()
                    .ok_or_else(|| ContainerError::UnknownOrder(fill.order_id.clone()))?;
                order.apply_fill(fill.quantity, fill.price);
                if order.is_open() {
                    self.orders.insert(order.order_id.clone(), order.clone());
                } else {
                    self.orders.remove(&order.order_id);
                }
                let payloads = vec![Payload::Fill(fill.clone()), Payload::Order(order.clone())];
                self.deliver(&fill.strategy_id, payloads, |s| s.on_fill(&order, &fill))
            }
        }
    }

    fn deliver_reject(&mut self, order: &Order, reject: &OrderReject) -> Result<(), ContainerError> {
        let rejected = order.with_status(OrderStatus::Rejected);
        let payloads = vec![Payload::OrderReject {
            order: rejected.clone(),
            reject: reject.clone(),
        }];
        self.deliver(&order.strategy_id, payloads, |s| {
            s.on_order_reject(&rejected, reject);
        })
    }

    fn deliver<F>(
        &mut self,
        strategy_id: &StrategyId,
        payloads: Vec<Payload>,
        callback: F,
    ) -> Result<(), ContainerError>
    where
        F: FnOnce(&mut dyn Strategy),
    {
        let strategy = self.strategies.get_mut(strategy_id).ok_or_else(|| {
            ContainerError::UnknownStrategy {
                strategy_id: strategy_id.clone(),
                context: "execution report".to_string(),
            }
        })?;

        match self.config.persist_ordering {
            PersistOrdering::CallbackFirst => {
                callback(strategy.as_mut());
                persist_all(self.journal.as_ref(), payloads)
            }
            PersistOrdering::PersistFirst => {
                persist_all(self.journal.as_ref(), payloads)?;
                callback(strategy.as_mut());
                Ok(())
            }
        }
    }

    fn persist(&self, payload: Payload) -> Result<u64, ContainerError> {
        let send_to_bus = publishes(&payload);
        Ok(self.journal.persist(payload, send_to_bus)?)
    }

    fn admission_refusal(&self) -> Option<&'static str> {
        let reason = if !self.journal.can_persist() {
            "file_backpressure"
        } else if !self.journal.can_persist_to_db() {
            "db_backpressure"
        } else {
            return None;
        };
        observability::record_admission_refused(reason);
        Some(reason)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Close order flow, cancel open orders for a bounded number of rounds,
    /// then stop the journal.
    pub fn stop(&mut self) -> DrainReport {
        let drain_enabled = self.config.order_flow_enabled;
        self.ready = false;

        let report = if drain_enabled {
            self.drain()
        } else {
            DrainReport::default()
        };

        if report.remaining > 0 {
            warn!(
                remaining = report.remaining,
                iterations = report.iterations,
                "Open orders remain after shutdown drain"
            );
        } else {
            info!(iterations = report.iterations, "Shutdown drain complete");
        }

        self.journal.stop();
        report
    }

    fn drain(&mut self) -> DrainReport {
        let sleep = Duration::from_millis(self.config.drain_sleep_ms);
        let mut report = DrainReport::default();
        let mut open = self.chain.open_orders();

        while !open.is_empty() && report.iterations < self.config.drain_iterations {
            report.iterations += 1;
            for order in &open {
                if let Err(e) = self.persist(Payload::Command(Command::cancel(order))) {
                    warn!(order_id = %order.order_id, error = %e, "Failed to journal drain cancel");
                }
                if let Err(e) = self.chain.cancel(&order.order_id) {
                    warn!(order_id = %order.order_id, error = %e, "Drain cancel refused");
                }
            }
            thread::sleep(sleep);
            open = self.chain.open_orders();
        }

        report.remaining = open.len();
        report
    }
}

/// Whether a payload produced by the container is published to observers.
const fn publishes(payload: &Payload) -> bool {
    !matches!(payload, Payload::Command(_))
}

fn persist_all<J: JournalPort + ?Sized>(
    journal: &J,
    payloads: Vec<Payload>,
) -> Result<(), ContainerError> {
    for payload in payloads {
        let send_to_bus = publishes(&payload);
        journal.persist(payload, send_to_bus)?;
    }
    Ok(())
}
