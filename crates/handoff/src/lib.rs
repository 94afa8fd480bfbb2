//! Single-Slot Hand-off Primitives
//!
//! Cross-thread cells where only the newest value matters:
//! - [`LatestSlot`]: overwrite-on-write, read-by-copy (camera frame slot)
//! - [`Mailbox`]: overwrite-on-write, read-by-take (analysis result slot)
//! - [`join_with_timeout`]: cooperative shutdown with a bounded join

mod join;
mod mailbox;
mod slot;

pub use join::{join_with_timeout, JoinOutcome};
pub use mailbox::Mailbox;
pub use slot::LatestSlot;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a writer panicked.
///
/// Every cell in this crate holds plain values that are replaced wholesale, so a
/// poisoned lock never leaves a half-written value behind.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
