//! Journal items and their on-disk record form.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::records::{
    Command, Fill, FillDropCopy, FixSessionMsg, FixSessionState, MessagingStats, Order,
    OrderReject, PnLAuditTrailInfo,
};

/// Kind of a persisted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Strategy order action.
    Command,
    /// Order state snapshot.
    Order,
    /// Order plus its reject.
    OrderReject,
    /// Execution.
    Fill,
    /// FIX session sequence state.
    FixSessionState,
    /// Raw FIX message.
    FixSessionMsg,
    /// Drop-copy execution.
    FillDropCopy,
    /// PnL audit snapshot.
    PnlAuditTrailInfo,
    /// Messaging counters.
    MessagingStats,
}

impl ItemKind {
    /// Stable name used in logs, metrics and the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Order => "order",
            Self::OrderReject => "order_reject",
            Self::Fill => "fill",
            Self::FixSessionState => "fix_session_state",
            Self::FixSessionMsg => "fix_session_msg",
            Self::FillDropCopy => "fill_drop_copy",
            Self::PnlAuditTrailInfo => "pnl_audit_trail_info",
            Self::MessagingStats => "messaging_stats",
        }
    }

    /// Whether records of this kind are also written to the database sink.
    ///
    /// Raw FIX traffic is journaled to file only.
    #[must_use]
    pub const fn is_db_relevant(&self) -> bool {
        !matches!(self, Self::FixSessionMsg)
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload; the variant determines the item kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Payload {
    /// Strategy order action.
    Command(Command),
    /// Order state snapshot.
    Order(Order),
    /// Order with the reject that terminated it.
    OrderReject {
        /// Order snapshot.
        order: Order,
        /// Reject details.
        reject: OrderReject,
    },
    /// Execution.
    Fill(Fill),
    /// FIX session sequence state.
    FixSessionState(FixSessionState),
    /// Raw FIX message.
    FixSessionMsg(FixSessionMsg),
    /// Drop-copy execution.
    FillDropCopy(FillDropCopy),
    /// PnL audit snapshot.
    #[serde(rename = "pnl_audit_trail_info")]
    PnlAuditTrailInfo(PnLAuditTrailInfo),
    /// Messaging counters.
    MessagingStats(MessagingStats),
}

impl Payload {
    /// Kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> ItemKind {
        match self {
            Self::Command(_) => ItemKind::Command,
            Self::Order(_) => ItemKind::Order,
            Self::OrderReject { .. } => ItemKind::OrderReject,
            Self::Fill(_) => ItemKind::Fill,
            Self::FixSessionState(_) => ItemKind::FixSessionState,
            Self::FixSessionMsg(_) => ItemKind::FixSessionMsg,
            Self::FillDropCopy(_) => ItemKind::FillDropCopy,
            Self::PnlAuditTrailInfo(_) => ItemKind::PnlAuditTrailInfo,
            Self::MessagingStats(_) => ItemKind::MessagingStats,
        }
    }
}

/// One persistable event stamped with its journal sequence id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageItem {
    /// Journal sequence id; strictly increasing, never reused.
    pub id: u64,
    /// When the item was created.
    pub recorded_at: DateTime<Utc>,
    /// Whether bus observers should see this item.
    pub send_to_bus: bool,
    /// The event.
    pub payload: Payload,
}

impl StorageItem {
    /// Kind of the carried payload.
    #[must_use]
    pub const fn kind(&self) -> ItemKind {
        self.payload.kind()
    }

    /// Borrowed record form used by the sinks.
    #[must_use]
    pub const fn as_record(&self) -> RecordRef<'_> {
        RecordRef {
            seq: self.id,
            recorded_at: &self.recorded_at,
            send_to_bus: self.send_to_bus,
            payload: &self.payload,
        }
    }
}

/// Serialized form of a journal line, borrowed from a live item.
#[derive(Debug, Serialize)]
pub struct RecordRef<'a> {
    /// Sequence id.
    pub seq: u64,
    /// Creation time.
    pub recorded_at: &'a DateTime<Utc>,
    /// Bus flag.
    pub send_to_bus: bool,
    /// Event.
    #[serde(flatten)]
    pub payload: &'a Payload,
}

/// A journal line read back from a sink.
///
/// Unknown fields are ignored so newer writers stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    /// Sequence id.
    pub seq: u64,
    /// Creation time.
    pub recorded_at: DateTime<Utc>,
    /// Bus flag.
    #[serde(default)]
    pub send_to_bus: bool,
    /// Event.
    #[serde(flatten)]
    pub payload: Payload,
}

/// Source of journal sequence ids, owned by one journal instance.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    last: AtomicU64,
}

impl SequenceCounter {
    /// Counter whose first issued id is `last + 1`.
    #[must_use]
    pub const fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Issue the next id.
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Most recently issued id (0 if none).
    #[must_use]
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    /// Move the counter forward so the next id is greater than `seq`.
    pub fn advance_past(&self, seq: u64) {
        self.last.fetch_max(seq, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, OrderId, OrderSide, StrategyId, InstrumentId};
    use rust_decimal_macros::dec;

    fn order_payload() -> Payload {
        Payload::Order(Order::market(
            OrderId::new("ord-1"),
            AccountId::new("ACC-1"),
            StrategyId::new("s1"),
            InstrumentId::new("ESZ6"),
            OrderSide::Buy,
            dec!(1),
        ))
    }

    #[test]
    fn kind_follows_payload() {
        let payload = order_payload();
        assert_eq!(payload.kind(), ItemKind::Order);
        assert!(ItemKind::Order.is_db_relevant());
        assert!(!ItemKind::FixSessionMsg.is_db_relevant());
    }

    #[test]
    fn record_line_is_self_describing() {
        let item = StorageItem {
            id: 7,
            recorded_at: Utc::now(),
            send_to_bus: true,
            payload: order_payload(),
        };
        let line = serde_json::to_string(&item.as_record()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["seq"], 7);
        assert_eq!(value["kind"], "order");
        assert_eq!(value["payload"]["order_id"], "ord-1");

        let record: JournalRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(record.seq, 7);
        assert_eq!(record.payload, item.payload);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let line = r#"{"seq":3,"recorded_at":"2026-03-02T10:00:00Z","kind":"messaging_stats",
            "payload":{"component":"bus","sent":1,"received":2,"dropped":0,
            "recorded_at":"2026-03-02T10:00:00Z","extra":"x"},"trailer":42}"#;
        let record: JournalRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.seq, 3);
        assert!(!record.send_to_bus);
        assert_eq!(record.payload.kind(), ItemKind::MessagingStats);
    }

    #[test]
    fn sequence_counter_is_monotonic() {
        let counter = SequenceCounter::starting_after(41);
        assert_eq!(counter.next(), 42);
        assert_eq!(counter.next(), 43);
        counter.advance_past(10);
        assert_eq!(counter.next(), 44);
        counter.advance_past(100);
        assert_eq!(counter.next(), 101);
        assert_eq!(counter.last(), 101);
    }
}
