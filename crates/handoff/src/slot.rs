//! Latest-Value Slot Implementation

use crate::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A published value together with its write version
#[derive(Debug, Clone)]
struct Versioned<T> {
    version: u64,
    value: T,
}

/// Single-slot cell that always holds the most recently published value.
///
/// There is no queue behind the slot: a reader never sees "the next" value,
/// only "the latest". Writers overwrite, readers get a copy and leave the value
/// in place.
pub struct LatestSlot<T> {
    /// The one and only slot
    slot: Mutex<Option<Versioned<T>>>,
    /// Total values published (for statistics)
    total_written: AtomicU64,
}

impl<T> LatestSlot<T> {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            total_written: AtomicU64::new(0),
        }
    }

    /// Publish a value, replacing whatever was there. Returns its version.
    pub fn publish(&self, value: T) -> u64 {
        // Version is assigned under the lock so versions match publish order.
        let mut slot = lock(&self.slot);
        let version = self.total_written.fetch_add(1, Ordering::Relaxed) + 1;
        *slot = Some(Versioned { version, value });
        version
    }

    /// Version of the latest published value (0 if nothing was published)
    pub fn version(&self) -> u64 {
        lock(&self.slot).as_ref().map(|v| v.version).unwrap_or(0)
    }

    /// Check if nothing has been published yet (or the slot was cleared)
    pub fn is_empty(&self) -> bool {
        lock(&self.slot).is_none()
    }

    /// Get total values published
    pub fn total_written(&self) -> u64 {
        self.total_written.load(Ordering::Relaxed)
    }

    /// Clear the slot
    pub fn clear(&self) {
        *lock(&self.slot) = None;
    }
}

impl<T: Clone> LatestSlot<T> {
    /// Copy of the latest value
    pub fn latest(&self) -> Option<T> {
        lock(&self.slot).as_ref().map(|v| v.value.clone())
    }

    /// Copy of the latest value with its version
    pub fn latest_versioned(&self) -> Option<(u64, T)> {
        lock(&self.slot)
            .as_ref()
            .map(|v| (v.version, v.value.clone()))
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
