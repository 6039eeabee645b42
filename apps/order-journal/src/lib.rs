// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::significant_drop_tightening,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Order Journal - Durable order/fill persistence core
//!
//! Every order action, reject, fill and FIX session event of the trading
//! process is stamped with a sequence id and journaled asynchronously to an
//! append-only file and a batched SQLite store.
//!
//! # Architecture
//!
//! ## Layers (inside → outside)
//!
//! - **Domain**: plain records and the sequence-stamped journal item
//! - **Journal**: item pool, sink queues and workers, admission control,
//!   recovery readers and the [`OrderJournal`] façade
//! - **Container**: strategy hosting, the order processor chain, the
//!   persistence points around each order transition, startup recovery and
//!   the shutdown drain
//!
//! ## Cross-cutting
//!
//! - `config`: YAML configuration with environment interpolation
//! - `observability`: tracing, OpenTelemetry and Prometheus metrics
//! - `error`: error taxonomy
//!
//! # Guarantees
//!
//! - Each sink receives records in `persist` order.
//! - Records persisted before `stop` reach the sinks unless a sink keeps
//!   failing through its final flush.
//! - A slow sink never blocks `persist`; it closes admission instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod container;
pub mod domain;
pub mod error;
pub mod journal;
pub mod observability;

pub use config::{Config, ConfigError, JournalSettings, load_config};
pub use container::{ExecutionReport, ProcessorChain, StrategyContainer};
pub use error::{ContainerError, JournalError, SinkError};
pub use journal::{AdmissionControl, JournalPort, JournalState, OrderJournal, RecoveryReader};
