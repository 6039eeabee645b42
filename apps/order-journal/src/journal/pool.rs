//! Reusable storage for in-flight journal items.
//!
//! Items are pre-allocated so the order thread does not allocate per
//! `persist` call. An item is handed out as an [`ItemHandle`]; both sink
//! queues hold a clone, and the slot goes back to the free list when the
//! last clone is dropped (normally on a writer thread).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};

use crate::domain::{ItemKind, Payload, SequenceCounter, StorageItem};
use crate::error::JournalError;

/// One reusable item.
#[derive(Debug)]
struct Slot {
    holders: AtomicUsize,
    item: RwLock<Option<StorageItem>>,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            holders: AtomicUsize::new(0),
            item: RwLock::new(None),
        }
    }
}

#[derive(Debug)]
struct PoolShared {
    free: Mutex<Vec<Arc<Slot>>>,
    allocated: AtomicUsize,
    capacity: usize,
    allow_growth: bool,
}

impl PoolShared {
    fn release(&self, slot: Arc<Slot>) {
        // Drop the payload here, on the releasing thread.
        slot.item.write().take();
        self.free.lock().push(slot);
    }
}

/// Bounded pool of journal items.
#[derive(Debug, Clone)]
pub struct ItemPool {
    shared: Arc<PoolShared>,
}

impl ItemPool {
    /// Create a pool with `initial_capacity` pre-allocated items.
    ///
    /// With `allow_growth` false the pool never holds more than
    /// `initial_capacity` items in flight.
    #[must_use]
    pub fn new(initial_capacity: usize, allow_growth: bool) -> Self {
        let free = (0..initial_capacity)
            .map(|_| Arc::new(Slot::empty()))
            .collect::<Vec<_>>();

        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                allocated: AtomicUsize::new(initial_capacity),
                capacity: initial_capacity,
                allow_growth,
            }),
        }
    }

    /// Take an item, stamp it with the next sequence id and fill it.
    ///
    /// Never blocks. Allocates only when the free list is empty and growth
    /// is allowed.
    ///
    /// # Errors
    ///
    /// Returns `JournalError::PoolExhausted` if no item is free and growth
    /// is disabled. No sequence id is consumed in that case.
    pub fn obtain(
        &self,
        counter: &SequenceCounter,
        payload: Payload,
        send_to_bus: bool,
    ) -> Result<ItemHandle, JournalError> {
        let recycled = self.shared.free.lock().pop();
        let slot = match recycled {
            Some(slot) => slot,
            None if self.shared.allow_growth => {
                let allocated = self.shared.allocated.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::debug!(allocated, "Item pool grew");
                Arc::new(Slot::empty())
            }
            None => {
                return Err(JournalError::PoolExhausted {
                    capacity: self.shared.capacity,
                });
            }
        };

        *slot.item.write() = Some(StorageItem {
            id: counter.next(),
            recorded_at: Utc::now(),
            send_to_bus,
            payload,
        });
        slot.holders.store(1, Ordering::Release);

        Ok(ItemHandle {
            slot,
            pool: Arc::downgrade(&self.shared),
        })
    }

    /// Items currently on the free list.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.free.lock().len()
    }

    /// Items ever allocated (free or in flight).
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::Acquire)
    }
}

/// Shared handle to an in-flight item.
///
/// Cloning is cheap and does not allocate. The item returns to its pool when
/// the last clone drops; if the pool is gone by then the slot is freed.
#[derive(Debug)]
pub struct ItemHandle {
    slot: Arc<Slot>,
    pool: Weak<PoolShared>,
}

impl ItemHandle {
    /// Borrow the item.
    pub fn read(&self) -> MappedRwLockReadGuard<'_, StorageItem> {
        RwLockReadGuard::map(self.slot.item.read(), |item| match item {
            Some(item) => item,
            None => unreachable!("live handle on a released slot"),
        })
    }

    /// Sequence id of the item.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.read().id
    }

    /// Kind of the item.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.read().kind()
    }
}

impl Clone for ItemHandle {
    fn clone(&self) -> Self {
        self.slot.holders.fetch_add(1, Ordering::AcqRel);
        Self {
            slot: Arc::clone(&self.slot),
            pool: Weak::clone(&self.pool),
        }
    }
}

impl Drop for ItemHandle {
    fn drop(&mut self) {
        if self.slot.holders.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.release(Arc::clone(&self.slot));
        }
    }
}
