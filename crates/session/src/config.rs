//! Session timing configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timing rules and classifier labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Presence must hold this long before frames are analyzed (milliseconds)
    pub presence_delay_ms: u64,

    /// Age and gender are recomputed until presence is this old (milliseconds)
    pub demographic_window_ms: u64,

    /// Session-end marker must hold this long to end the session (milliseconds)
    pub absence_delay_ms: u64,

    /// Low-confidence presence longer than this aborts the session (milliseconds)
    pub low_confidence_timeout_ms: u64,

    /// Classifier label meaning a subject is in frame
    pub presence_label: String,

    /// Classifier label meaning the subject signaled completion
    pub session_end_label: String,

    /// Presence confidence at or above this starts presence
    pub full_confidence: f32,

    /// Satisfaction score with only neutral emotions
    pub satisfaction_baseline: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            presence_delay_ms: 3000,
            demographic_window_ms: 8000,
            absence_delay_ms: 3000,
            low_confidence_timeout_ms: 3000,
            presence_label: "Class 1".to_string(),
            session_end_label: "Class 2".to_string(),
            full_confidence: 1.0,
            satisfaction_baseline: 60.0,
        }
    }
}

impl TimingConfig {
    pub fn presence_delay(&self) -> Duration {
        Duration::from_millis(self.presence_delay_ms)
    }

    pub fn demographic_window(&self) -> Duration {
        Duration::from_millis(self.demographic_window_ms)
    }

    pub fn absence_delay(&self) -> Duration {
        Duration::from_millis(self.absence_delay_ms)
    }

    pub fn low_confidence_timeout(&self) -> Duration {
        Duration::from_millis(self.low_confidence_timeout_ms)
    }

    /// Check the rules are usable
    pub fn validate(&self) -> Result<(), String> {
        if self.presence_label == self.session_end_label {
            return Err(format!(
                "presence and session-end labels must differ (both '{}')",
                self.presence_label
            ));
        }
        if self.demographic_window_ms < self.presence_delay_ms {
            return Err(format!(
                "demographic window ({}ms) is shorter than the presence delay ({}ms)",
                self.demographic_window_ms, self.presence_delay_ms
            ));
        }
        if !(0.0..=100.0).contains(&self.satisfaction_baseline) {
            return Err(format!(
                "satisfaction baseline {} outside 0..=100",
                self.satisfaction_baseline
            ));
        }
        Ok(())
    }
}
