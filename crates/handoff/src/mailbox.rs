//! Single-slot mailbox

use crate::lock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// Overwrite-on-write, take-on-read cell between one producer and one consumer.
///
/// Holds at most one value. A `put` while a value is still waiting replaces it;
/// the replaced value is returned to the producer, never queued.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
    /// Values replaced before anybody took them
    overwritten: AtomicU64,
    /// Values handed to the consumer
    delivered: AtomicU64,
}

impl<T> Mailbox<T> {
    /// Create an empty mailbox
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            ready: Condvar::new(),
            overwritten: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Deposit a value, returning the unread value it replaced (if any)
    pub fn put(&self, value: T) -> Option<T> {
        let replaced = lock(&self.slot).replace(value);
        if replaced.is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        self.ready.notify_one();
        replaced
    }

    /// Take the waiting value without blocking
    pub fn take(&self) -> Option<T> {
        let value = lock(&self.slot).take();
        if value.is_some() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Take the waiting value, blocking up to `timeout` for one to arrive
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        if timeout.is_zero() {
            return self.take();
        }

        let guard = lock(&self.slot);
        let (mut guard, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        let value = guard.take();
        if value.is_some() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Check if no value is waiting
    pub fn is_empty(&self) -> bool {
        lock(&self.slot).is_none()
    }

    /// Number of values replaced before they were taken
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Number of values taken by the consumer
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
