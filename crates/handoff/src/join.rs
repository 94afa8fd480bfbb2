//! Bounded thread join

use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll interval while waiting for a thread to finish
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Result of [`join_with_timeout`]
#[derive(Debug)]
pub enum JoinOutcome<T> {
    /// Thread finished and returned a value
    Finished(T),
    /// Thread finished by panicking
    Panicked,
    /// Thread still running at the deadline; it has been detached
    TimedOut,
}

impl<T> JoinOutcome<T> {
    /// Check if the thread is gone (finished or panicked)
    pub fn is_joined(&self) -> bool {
        !matches!(self, JoinOutcome::TimedOut)
    }
}

/// Wait up to `timeout` for a thread to finish.
///
/// std has no timed join, so this polls `is_finished`. On timeout the handle is
/// dropped, which detaches the thread: it keeps running in the background and
/// never blocks process exit.
pub fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> JoinOutcome<T> {
    let deadline = Instant::now() + timeout;

    while !handle.is_finished() {
        if Instant::now() >= deadline {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            debug!("Detaching thread {} after {:?}", name, timeout);
            return JoinOutcome::TimedOut;
        }
        std::thread::sleep(JOIN_POLL_INTERVAL);
    }

    match handle.join() {
        Ok(value) => JoinOutcome::Finished(value),
        Err(_) => JoinOutcome::Panicked,
    }
}
