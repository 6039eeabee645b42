//! Strategy callbacks invoked by the container.

use crate::domain::{Fill, Order, OrderReject, PosUpdate, StrategyId};

/// A trading strategy hosted by the [`StrategyContainer`](super::StrategyContainer).
///
/// Callbacks run on the container's thread and must not block.
pub trait Strategy: Send {
    /// Identifier embedded in every order the strategy sends.
    fn id(&self) -> &StrategyId;

    /// The exchange acknowledged an order.
    fn on_order_ack(&mut self, order: &Order);

    /// An order was rejected, locally or by the exchange.
    fn on_order_reject(&mut self, order: &Order, reject: &OrderReject);

    /// An order was (partially) filled. `order` carries the cumulative state.
    fn on_fill(&mut self, order: &Order, fill: &Fill);

    /// An order was canceled.
    fn on_cancel(&mut self, order: &Order);

    /// Re-establish tracking of an order recovered at startup.
    /// Nothing is transmitted to the exchange.
    fn rebuild_order(&mut self, order: &Order);

    /// Re-establish a position recovered at startup.
    fn rebuild_pos(&mut self, position: &PosUpdate);
}
