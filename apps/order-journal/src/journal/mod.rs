//! Order Journal
//!
//! Sequence-stamped, asynchronously persisted event log with two sinks:
//!
//! - [`file_writer`]: append-only JSONL file, the primary sink
//! - [`db_writer`]: batched SQLite store, idempotent on replay
//!
//! Producers call [`OrderJournal::persist`]; dedicated worker threads drain
//! each sink's queue in FIFO order.
//! [`AdmissionControl`] exposes the queues' headroom, and [`recovery`]
//! reconstructs state from whichever sink is authoritative.

mod admission;
pub mod db_writer;
mod facade;
pub mod file_writer;
mod pool;
mod queue;
pub mod recovery;
mod worker;

pub use admission::AdmissionControl;
pub use db_writer::{DbSink, DbWriter, SharedConnection, SqliteSink};
pub use facade::{JournalObserver, JournalPort, JournalState, OrderJournal};
pub use file_writer::{FileWriter, read_journal};
pub use pool::{ItemHandle, ItemPool};
pub use recovery::{DbRecoveryReader, FileRecoveryReader, JournalFold, RecoveryReader};
pub use worker::{BatchSink, FlushRound};
