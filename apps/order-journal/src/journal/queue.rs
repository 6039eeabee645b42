//! Bounded multi-producer, single-consumer sink queue.
//!
//! The consumer peeks a batch, writes it, and only then commits it, so
//! records under a failing write stay at the head of the queue and keep
//! counting toward `depth()`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::pool::ItemHandle;
use crate::observability;

/// FIFO queue feeding one sink worker.
#[derive(Debug)]
pub struct DurableQueue {
    sink: &'static str,
    items: Mutex<VecDeque<ItemHandle>>,
    changed: Condvar,
    depth: AtomicUsize,
    max_depth: usize,
    closed: AtomicBool,
}

impl DurableQueue {
    /// Create an empty queue for `sink` (used as the metrics label).
    #[must_use]
    pub fn new(sink: &'static str, max_depth: usize) -> Self {
        Self {
            sink,
            items: Mutex::new(VecDeque::new()),
            changed: Condvar::new(),
            depth: AtomicUsize::new(0),
            max_depth,
            closed: AtomicBool::new(false),
        }
    }

    /// Sink label.
    #[must_use]
    pub const fn sink(&self) -> &'static str {
        self.sink
    }

    /// Append an item. Never blocks on the consumer and never refuses.
    pub fn push(&self, item: ItemHandle) {
        let depth = {
            let mut items = self.items.lock();
            items.push_back(item);
            self.depth.fetch_add(1, Ordering::AcqRel) + 1
        };
        self.changed.notify_one();
        observability::record_enqueued(self.sink, depth);
    }

    /// Records enqueued and not yet committed by the consumer.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Configured admission threshold.
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// True while there is room for at least one more record.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.depth() < self.max_depth
    }

    /// Block until the depth exceeds `known`, the queue is closed, or
    /// `timeout` elapses. Returns true if new records arrived.
    pub fn wait_for_more(&self, known: usize, timeout: Duration) -> bool {
        let mut items = self.items.lock();
        if items.len() > known {
            return true;
        }
        if self.is_closed() {
            return false;
        }
        self.changed.wait_for(&mut items, timeout);
        items.len() > known
    }

    /// Block until the queue is closed or `timeout` elapses.
    ///
    /// Used for retry backoff so `stop` interrupts the sleep.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let mut items = self.items.lock();
        if !self.is_closed() {
            self.changed.wait_for(&mut items, timeout);
        }
        self.is_closed()
    }

    /// Clone up to `max` records from the head without removing them.
    #[must_use]
    pub fn peek(&self, max: usize) -> Vec<ItemHandle> {
        self.items.lock().iter().take(max).cloned().collect()
    }

    /// Remove `count` records from the head after the sink accepted them.
    pub fn commit(&self, count: usize) {
        let depth = {
            let mut items = self.items.lock();
            let count = count.min(items.len());
            items.drain(..count);
            self.depth.fetch_sub(count, Ordering::AcqRel) - count
        };
        observability::set_queue_depth(self.sink, depth);
    }

    /// Mark the queue closed and wake the consumer.
    pub fn close(&self) {
        {
            let _items = self.items.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.changed.notify_all();
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
