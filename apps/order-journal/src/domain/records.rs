//! Upstream records persisted by the journal.
//!
//! These are plain data carried from the strategy, bridge and PnL layers.
//! The journal only needs their serialized form and the account, strategy
//! and instrument keys used by the recovery queries.

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::identifiers::{AccountId, ExecId, InstrumentId, OrderId, StrategyId};

// ============================================================================
// Order
// ============================================================================

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

impl OrderSide {
    /// Signed quantity for position calculations (Buy = +qty, Sell = -qty).
    #[must_use]
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            Self::Buy => quantity,
            Self::Sell => -quantity,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Market order.
    Market,
    /// Limit order.
    Limit,
}

/// Order status following FIX protocol semantics (tag 39).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Sent, awaiting exchange acknowledgment.
    PendingNew,
    /// Acknowledged by the exchange.
    New,
    /// Partially filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancel requested, awaiting confirmation.
    PendingCancel,
    /// Canceled.
    Canceled,
    /// Rejected locally or by the exchange.
    Rejected,
    /// Replaced by a modify; the replacement carries the live state.
    Replaced,
}

impl OrderStatus {
    /// Returns true if the order can still trade or is awaiting an answer.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(
            self,
            Self::PendingNew | Self::New | Self::PartiallyFilled | Self::PendingCancel
        )
    }

    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingNew => "PENDING_NEW",
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::PendingCancel => "PENDING_CANCEL",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Replaced => "REPLACED",
        };
        f.write_str(s)
    }
}

/// Latest known state of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Client order ID.
    pub order_id: OrderId,
    /// Owning account.
    pub account: AccountId,
    /// Owning strategy.
    pub strategy_id: StrategyId,
    /// Instrument traded.
    pub instrument: InstrumentId,
    /// Side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Limit price (limit orders only).
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Cumulative filled quantity.
    #[serde(default)]
    pub filled_quantity: Decimal,
    /// Volume-weighted average fill price.
    #[serde(default)]
    pub avg_fill_price: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Time of the last state change.
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new limit order in `PendingNew`.
    #[must_use]
    pub fn limit(
        order_id: OrderId,
        account: AccountId,
        strategy_id: StrategyId,
        instrument: InstrumentId,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            order_id,
            account,
            strategy_id,
            instrument,
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit_price),
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::PendingNew,
            updated_at: Utc::now(),
        }
    }

    /// Create a new market order in `PendingNew`.
    #[must_use]
    pub fn market(
        order_id: OrderId,
        account: AccountId,
        strategy_id: StrategyId,
        instrument: InstrumentId,
        side: OrderSide,
        quantity: Decimal,
    ) -> Self {
        Self {
            order_id,
            account,
            strategy_id,
            instrument,
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            status: OrderStatus::PendingNew,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if the order is still open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Quantity not yet filled.
    #[must_use]
    pub fn leaves_quantity(&self) -> Decimal {
        (self.quantity - self.filled_quantity).max(Decimal::ZERO)
    }

    /// Return a copy with a new status and a fresh timestamp.
    #[must_use]
    pub fn with_status(&self, status: OrderStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Apply an execution to the cumulative fill state.
    pub fn apply_fill(&mut self, quantity: Decimal, price: Decimal) {
        let previous_notional = self.avg_fill_price.unwrap_or(Decimal::ZERO) * self.filled_quantity;
        self.filled_quantity += quantity;
        if !self.filled_quantity.is_zero() {
            self.avg_fill_price =
                Some((previous_notional + quantity * price) / self.filled_quantity);
        }
        self.status = if self.filled_quantity >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Reject
// ============================================================================

/// Where a reject originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectSource {
    /// Synthesized inside the process (admission control, processor stage).
    Local,
    /// Reported by the exchange.
    Exchange,
}

/// Reject details for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReject {
    /// Rejected order.
    pub order_id: OrderId,
    /// Owning account.
    pub account: AccountId,
    /// Owning strategy.
    pub strategy_id: StrategyId,
    /// Human-readable reason.
    pub reason: String,
    /// Origin of the reject.
    pub source: RejectSource,
    /// When the reject happened.
    pub rejected_at: DateTime<Utc>,
}

impl OrderReject {
    /// Build a locally synthesized reject for an order.
    #[must_use]
    pub fn local(order: &Order, reason: impl Into<String>) -> Self {
        Self {
            order_id: order.order_id.clone(),
            account: order.account.clone(),
            strategy_id: order.strategy_id.clone(),
            reason: reason.into(),
            source: RejectSource::Local,
            rejected_at: Utc::now(),
        }
    }

    /// Build an exchange reject for an order.
    #[must_use]
    pub fn exchange(order: &Order, reason: impl Into<String>) -> Self {
        Self {
            source: RejectSource::Exchange,
            ..Self::local(order, reason)
        }
    }
}

// ============================================================================
// Fills
// ============================================================================

/// A single execution against an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Exchange execution ID (idempotency key).
    pub exec_id: ExecId,
    /// Order that traded.
    pub order_id: OrderId,
    /// Owning account.
    pub account: AccountId,
    /// Owning strategy.
    pub strategy_id: StrategyId,
    /// Instrument traded.
    pub instrument: InstrumentId,
    /// Side.
    pub side: OrderSide,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Executed price.
    pub price: Decimal,
    /// Execution time.
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    /// Build a fill for an order.
    #[must_use]
    pub fn for_order(order: &Order, exec_id: ExecId, quantity: Decimal, price: Decimal) -> Self {
        Self {
            exec_id,
            order_id: order.order_id.clone(),
            account: order.account.clone(),
            strategy_id: order.strategy_id.clone(),
            instrument: order.instrument.clone(),
            side: order.side,
            quantity,
            price,
            executed_at: Utc::now(),
        }
    }
}

/// Fill received on the exchange drop-copy session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillDropCopy {
    /// The reported execution.
    pub fill: Fill,
    /// Drop-copy session that reported it.
    pub source: String,
}

// ============================================================================
// Commands
// ============================================================================

/// Order action requested by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandAction {
    /// New order.
    New,
    /// Modify quantity and/or price.
    Modify,
    /// Cancel.
    Cancel,
}

/// A strategy's order action, journaled before it is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Owning account.
    pub account: AccountId,
    /// Issuing strategy.
    pub strategy_id: StrategyId,
    /// Target order.
    pub order_id: OrderId,
    /// Action.
    pub action: CommandAction,
    /// New quantity (new/modify).
    #[serde(default)]
    pub quantity: Option<Decimal>,
    /// New limit price (new/modify).
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// When the action was issued.
    pub issued_at: DateTime<Utc>,
}

impl Command {
    /// Command describing a new order.
    #[must_use]
    pub fn new_order(order: &Order) -> Self {
        Self {
            account: order.account.clone(),
            strategy_id: order.strategy_id.clone(),
            order_id: order.order_id.clone(),
            action: CommandAction::New,
            quantity: Some(order.quantity),
            limit_price: order.limit_price,
            issued_at: Utc::now(),
        }
    }

    /// Command describing a modify.
    #[must_use]
    pub fn modify(order: &Order, quantity: Decimal, limit_price: Option<Decimal>) -> Self {
        Self {
            action: CommandAction::Modify,
            quantity: Some(quantity),
            limit_price,
            ..Self::new_order(order)
        }
    }

    /// Command describing a cancel.
    #[must_use]
    pub fn cancel(order: &Order) -> Self {
        Self {
            action: CommandAction::Cancel,
            quantity: None,
            limit_price: None,
            ..Self::new_order(order)
        }
    }
}

// ============================================================================
// FIX session
// ============================================================================

/// Key of a FIX session's persisted sequence state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixSessionKey {
    /// SenderCompID.
    pub sender_comp_id: String,
    /// TargetCompID.
    pub target_comp_id: String,
    /// ISO year of the session.
    pub year: i32,
    /// ISO week of the session.
    pub week: u32,
}

impl FixSessionKey {
    /// Key for the ISO week containing `at`.
    #[must_use]
    pub fn for_time(
        sender_comp_id: impl Into<String>,
        target_comp_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let iso = at.iso_week();
        Self {
            sender_comp_id: sender_comp_id.into(),
            target_comp_id: target_comp_id.into(),
            year: iso.year(),
            week: iso.week(),
        }
    }
}

/// Persisted sequence numbers of a FIX session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixSessionState {
    /// SenderCompID.
    pub sender_comp_id: String,
    /// TargetCompID.
    pub target_comp_id: String,
    /// ISO year of the session.
    pub year: i32,
    /// ISO week of the session.
    pub week: u32,
    /// Next outbound MsgSeqNum.
    pub next_sender_seq: u64,
    /// Next expected inbound MsgSeqNum.
    pub next_target_seq: u64,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl FixSessionState {
    /// Key fields of this state.
    #[must_use]
    pub fn key(&self) -> FixSessionKey {
        FixSessionKey {
            sender_comp_id: self.sender_comp_id.clone(),
            target_comp_id: self.target_comp_id.clone(),
            year: self.year,
            week: self.week,
        }
    }
}

/// Direction of a FIX message relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageDirection {
    /// Received from the counterparty.
    Inbound,
    /// Sent to the counterparty.
    Outbound,
}

/// Raw FIX message logged for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixSessionMsg {
    /// SenderCompID.
    pub sender_comp_id: String,
    /// TargetCompID.
    pub target_comp_id: String,
    /// Direction.
    pub direction: MessageDirection,
    /// MsgSeqNum.
    pub seq_num: u64,
    /// Raw message body.
    pub body: String,
    /// When the message was logged.
    pub logged_at: DateTime<Utc>,
}

// ============================================================================
// PnL and messaging
// ============================================================================

/// Audit-trail snapshot from the PnL pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnLAuditTrailInfo {
    /// Account.
    pub account: AccountId,
    /// Strategy.
    pub strategy_id: StrategyId,
    /// Instrument.
    pub instrument: InstrumentId,
    /// Position at snapshot time.
    pub position: Decimal,
    /// Realized PnL.
    pub realized_pnl: Decimal,
    /// Unrealized PnL.
    pub unrealized_pnl: Decimal,
    /// Snapshot time.
    pub recorded_at: DateTime<Utc>,
}

/// Counters from the messaging layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingStats {
    /// Reporting component.
    pub component: String,
    /// Messages sent.
    pub sent: u64,
    /// Messages received.
    pub received: u64,
    /// Messages dropped.
    pub dropped: u64,
    /// Snapshot time.
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Positions (read model)
// ============================================================================

/// Net position of a strategy in one instrument, reconstructed from fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosUpdate {
    /// Account.
    pub account: AccountId,
    /// Strategy.
    pub strategy_id: StrategyId,
    /// Instrument.
    pub instrument: InstrumentId,
    /// Signed quantity (positive = long).
    pub quantity: Decimal,
    /// Average entry price of the open quantity.
    pub avg_price: Decimal,
}

impl PosUpdate {
    /// Flat position for a key.
    #[must_use]
    pub fn flat(account: AccountId, strategy_id: StrategyId, instrument: InstrumentId) -> Self {
        Self {
            account,
            strategy_id,
            instrument,
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
        }
    }

    /// Returns true if the position is flat.
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Apply a fill to the position.
    ///
    /// The average price is volume-weighted while the position grows, kept
    /// while it shrinks, and reset to the fill price when it flips sides.
    pub fn apply(&mut self, side: OrderSide, quantity: Decimal, price: Decimal) {
        let delta = side.signed(quantity);
        let next = self.quantity + delta;

        if self.quantity.is_zero() || self.quantity.is_sign_positive() == delta.is_sign_positive() {
            let notional = self.avg_price * self.quantity.abs() + price * quantity;
            self.avg_price = if next.is_zero() {
                Decimal::ZERO
            } else {
                notional / next.abs()
            };
        } else if next.is_zero() {
            self.avg_price = Decimal::ZERO;
        } else if next.is_sign_positive() != self.quantity.is_sign_positive() {
            self.avg_price = price;
        }

        self.quantity = next;
    }
}
