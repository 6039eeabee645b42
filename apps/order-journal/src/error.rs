//! Error taxonomy for the order journal.
//!
//! | Kind | Surfaced by | Handling |
//! |------|-------------|----------|
//! | Configuration | `init` | fatal to startup |
//! | Backpressure | `AdmissionControl` | not an error; caller rejects the order |
//! | Sink I/O | writer threads | retried with items still enqueued |
//! | Misuse | `persist` before init / after stop | returned, logged |
//! | Recovery inconsistency | container startup | fatal to startup |

use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::{ItemKind, OrderId, StrategyId};

/// Errors raised by a sink while writing or reading records.
#[derive(Debug, Error)]
pub enum SinkError {
    /// File I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be serialized.
    #[error("Serialization error for {kind} record {seq}: {message}")]
    Serialization {
        /// Sequence id of the record.
        seq: u64,
        /// Kind of the record.
        kind: ItemKind,
        /// Underlying error.
        message: String,
    },

    /// Database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Injected or otherwise unavailable sink.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the journal façade.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Invalid settings or sink connectivity at `init`.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// `persist` or `start` called before `init`.
    #[error("Journal is not initialized")]
    NotInitialized,

    /// Lifecycle call not valid in the current state.
    #[error("Invalid journal state: expected {expected}, found {found}")]
    InvalidState {
        /// State the call requires.
        expected: &'static str,
        /// Current state.
        found: &'static str,
    },

    /// `persist` called while stopping or after stop.
    #[error("Journal is stopped")]
    Stopped,

    /// The item pool is exhausted and growth is disabled.
    #[error("Item pool exhausted ({capacity} items in flight, growth disabled)")]
    PoolExhausted {
        /// Fixed pool capacity.
        capacity: usize,
    },

    /// Sink failure during `init` or a recovery query.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Recovery query not available for the configured source.
    #[error("Recovery error: {0}")]
    Recovery(String),
}

impl JournalError {
    /// Returns true for misuse of the lifecycle (as opposed to I/O or config).
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::InvalidState { .. } | Self::Stopped
        )
    }
}

/// Errors surfaced by the strategy container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Order flow is not open (recovery not completed or flow disabled).
    #[error("Order flow is not ready")]
    NotReady,

    /// A recovered or reported record names a strategy that is not registered.
    #[error("Unknown strategy {strategy_id} ({context})")]
    UnknownStrategy {
        /// Strategy id embedded in the record.
        strategy_id: StrategyId,
        /// Where the record came from.
        context: String,
    },

    /// The order is not tracked by the container.
    #[error("Unknown order {0}")]
    UnknownOrder(OrderId),

    /// Journal failure.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// The order router refused a request.
    #[error("Router error: {0}")]
    Router(String),
}
