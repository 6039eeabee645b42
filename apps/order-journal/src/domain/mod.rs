//! Domain Layer
//!
//! Plain data with zero infrastructure dependencies:
//!
//! - [`identifiers`]: strongly-typed ids
//! - [`records`]: the order, fill and session records upstream layers hand us
//! - [`item`]: the sequence-stamped journal item and its line format

pub mod identifiers;
pub mod item;
pub mod records;

pub use identifiers::{AccountId, ExecId, InstrumentId, OrderId, StrategyId};
pub use item::{ItemKind, JournalRecord, Payload, RecordRef, SequenceCounter, StorageItem};
pub use records::{
    Command, CommandAction, Fill, FillDropCopy, FixSessionKey, FixSessionMsg, FixSessionState,
    MessageDirection, MessagingStats, Order, OrderReject, OrderSide, OrderStatus, OrderType,
    PnLAuditTrailInfo, PosUpdate, RejectSource,
};
