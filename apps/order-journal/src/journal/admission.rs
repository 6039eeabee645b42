//! Backpressure gates consulted before an order action is initiated.

use std::sync::Arc;

use super::queue::DurableQueue;

/// Read-only view of the sink queues' headroom.
///
/// Reads only atomic counters; never takes a lock. The gates throttle new
/// order generation, they do not make `persist` fail.
#[derive(Debug, Clone)]
pub struct AdmissionControl {
    file: Arc<DurableQueue>,
    db: Option<Arc<DurableQueue>>,
}

impl AdmissionControl {
    pub(crate) const fn new(file: Arc<DurableQueue>, db: Option<Arc<DurableQueue>>) -> Self {
        Self { file, db }
    }

    /// True while the file queue has room for another record and is open.
    #[must_use]
    pub fn can_persist(&self) -> bool {
        !self.file.is_closed() && self.file.has_capacity()
    }

    /// Same gate for the database queue; always true with the database disabled.
    #[must_use]
    pub fn can_persist_to_db(&self) -> bool {
        self.db
            .as_ref()
            .is_none_or(|db| !db.is_closed() && db.has_capacity())
    }

    /// Whether a database sink is configured.
    #[must_use]
    pub const fn db_enabled(&self) -> bool {
        self.db.is_some()
    }

    /// Records waiting in the file queue.
    #[must_use]
    pub fn file_depth(&self) -> usize {
        self.file.depth()
    }

    /// Records waiting in the database queue (0 with the database disabled).
    #[must_use]
    pub fn db_depth(&self) -> usize {
        self.db.as_ref().map_or(0, |db| db.depth())
    }
}
