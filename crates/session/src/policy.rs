//! Frame-processing rules: classifier output in, analysis decision out

use std::time::{Duration, Instant};

use face_analysis::AnalysisActions;
use tracing::{debug, info, warn};

use crate::{CameraState, TimingConfig};

/// Classifier label interpreted against the configured labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Presence,
    SessionEnd,
    Other,
}

impl Observation {
    pub fn from_label(label: &str, config: &TimingConfig) -> Self {
        if label == config.presence_label {
            Observation::Presence
        } else if label == config.session_end_label {
            Observation::SessionEnd
        } else {
            Observation::Other
        }
    }
}

/// What to do with the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    /// No analysis for this frame
    Idle,
    /// Submit the frame with these actions
    Analyze {
        actions: AnalysisActions,
        elapsed: Duration,
    },
    /// Presence stayed below full confidence past the timeout
    AbortLowConfidence { held: Duration },
}

/// Apply one classified frame to `state` at time `now`.
///
/// Presence starts only at full confidence. Lower-confidence presence frames
/// run the low-confidence timer, which aborts the session once exceeded. A
/// session-end marker replaces presence; any other label ends the episode.
/// After the presence delay frames are analyzed, with demographics until the
/// demographic window closes and emotion-only afterwards.
pub fn process_frame(
    state: &mut CameraState,
    label: &str,
    confidence: f32,
    now: Instant,
    config: &TimingConfig,
) -> FrameDecision {
    match Observation::from_label(label, config) {
        Observation::Presence => {
            if confidence >= config.full_confidence {
                state.low_confidence_start = None;
                if !state.person_detected {
                    state.person_detected = true;
                    state.detection_start_time = Some(now);
                    state.demographics_cached = false;
                    info!("Person detected");
                }
            } else {
                let started = *state.low_confidence_start.get_or_insert(now);
                let held = now.saturating_duration_since(started);
                if held > config.low_confidence_timeout() {
                    warn!(
                        "Confidence below {:.0}% for {:?}, stopping analysis",
                        config.full_confidence * 100.0,
                        held
                    );
                    return FrameDecision::AbortLowConfidence { held };
                }
            }
            state.session_end_detected = false;
            state.session_end_start_time = None;
        }
        Observation::SessionEnd => {
            if !state.session_end_detected {
                state.session_end_detected = true;
                state.session_end_start_time = Some(now);
                info!("Session-end marker detected");
            }
            state.person_detected = false;
            state.detection_start_time = None;
            state.low_confidence_start = None;
        }
        Observation::Other => {
            if state.person_detected || state.session_end_detected {
                debug!("Label '{}' ends the current episode", label);
            }
            state.end_episode();
        }
    }

    let Some(elapsed) = state.get_elapsed_time(now) else {
        return FrameDecision::Idle;
    };
    if elapsed <= config.presence_delay() {
        return FrameDecision::Idle;
    }

    let actions = if state.should_analyze_demographics(elapsed, config.demographic_window()) {
        AnalysisActions::ALL
    } else {
        if !state.demographics_cached {
            state.cache_demographics();
            info!(
                "Demographics cached after {:?}: age={:?}, gender={:?}",
                elapsed,
                state.cached_age(),
                state.cached_gender()
            );
        }
        AnalysisActions::EMOTION_ONLY
    };

    FrameDecision::Analyze { actions, elapsed }
}
