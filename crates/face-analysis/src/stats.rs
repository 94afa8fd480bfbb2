//! Analyzer statistics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Snapshot of one analyzer's counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerStats {
    pub name: String,
    /// Calls to `submit_frame` while running
    pub submitted_frames: u64,
    /// Submissions dropped by frame skipping
    pub skipped_frames: u64,
    /// Queued frames evicted to make room for newer ones
    pub dropped_frames: u64,
    /// External analysis calls made (successful or not)
    pub total_analyses: u64,
    /// Calls that returned an error or panicked
    pub failed_analyses: u64,
    /// Successful share of calls (percent, 0.0 when none)
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    pub max_latency_ms: f64,
}

#[derive(Default)]
struct Latency {
    count: u64,
    total: Duration,
    max: Duration,
}

/// Live counters shared by the submitter and the worker
#[derive(Default)]
pub(crate) struct Counters {
    pub submitted: AtomicU64,
    pub skipped: AtomicU64,
    pub dropped: AtomicU64,
    pub total: AtomicU64,
    pub failed: AtomicU64,
    latency: Mutex<Latency>,
}

impl Counters {
    pub fn record_call(&self, latency: Duration, failed: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut agg = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        agg.count += 1;
        agg.total += latency;
        agg.max = agg.max.max(latency);
    }

    pub fn snapshot(&self, name: &str) -> AnalyzerStats {
        let total = self.total.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let success_rate = if total > 0 {
            (total - failed) as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let (mean_latency_ms, max_latency_ms) = {
            let agg = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
            let mean = if agg.count > 0 {
                agg.total.as_secs_f64() * 1000.0 / agg.count as f64
            } else {
                0.0
            };
            (mean, agg.max.as_secs_f64() * 1000.0)
        };

        AnalyzerStats {
            name: name.to_string(),
            submitted_frames: self.submitted.load(Ordering::Relaxed),
            skipped_frames: self.skipped.load(Ordering::Relaxed),
            dropped_frames: self.dropped.load(Ordering::Relaxed),
            total_analyses: total,
            failed_analyses: failed,
            success_rate,
            mean_latency_ms,
            max_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let stats = Counters::default().snapshot("a");
        assert_eq!(stats.name, "a");
        assert_eq!(stats.total_analyses, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.mean_latency_ms, 0.0);
    }

    #[test]
    fn test_success_rate_and_latency() {
        let counters = Counters::default();
        counters.record_call(Duration::from_millis(10), false);
        counters.record_call(Duration::from_millis(30), false);
        counters.record_call(Duration::from_millis(20), false);
        counters.record_call(Duration::from_millis(40), true);

        let stats = counters.snapshot("b");
        assert_eq!(stats.total_analyses, 4);
        assert_eq!(stats.failed_analyses, 1);
        assert!((stats.success_rate - 75.0).abs() < 1e-9);
        assert!((stats.mean_latency_ms - 25.0).abs() < 1e-6);
        assert!((stats.max_latency_ms - 40.0).abs() < 1e-6);
    }
}
