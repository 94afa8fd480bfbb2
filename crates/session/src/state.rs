//! Per-camera session state

use std::time::{Duration, Instant};

use face_analysis::{AttributeSet, Emotion, Gender};

use crate::summary::{satisfaction_score, EmotionSummary};

/// State of one camera's session.
///
/// Owned by the orchestrator and mutated only on the main loop thread, through
/// [`crate::process_frame`] and the recording methods below. `person_detected`
/// and `session_end_detected` are never both set, and the detection start time
/// is present exactly while a person is detected.
#[derive(Debug, Clone, Default)]
pub struct CameraState {
    pub(crate) person_detected: bool,
    pub(crate) session_end_detected: bool,
    pub(crate) detection_start_time: Option<Instant>,
    pub(crate) session_end_start_time: Option<Instant>,
    pub(crate) low_confidence_start: Option<Instant>,
    pub(crate) demographics_cached: bool,

    emotions: Vec<Emotion>,
    ages: Vec<u32>,
    genders: Vec<(Gender, f32)>,

    cached_age: Option<u32>,
    cached_gender: Option<Gender>,
    cached_gender_confidence: Option<f32>,
}

impl CameraState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything, history included
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Clear presence and session-end flags and their timers; history and
    /// cached demographics survive
    pub fn end_episode(&mut self) {
        self.person_detected = false;
        self.session_end_detected = false;
        self.detection_start_time = None;
        self.session_end_start_time = None;
        self.low_confidence_start = None;
        self.demographics_cached = false;
    }

    pub fn person_detected(&self) -> bool {
        self.person_detected
    }

    pub fn session_end_detected(&self) -> bool {
        self.session_end_detected
    }

    pub fn detection_start_time(&self) -> Option<Instant> {
        self.detection_start_time
    }

    pub fn session_end_start_time(&self) -> Option<Instant> {
        self.session_end_start_time
    }

    pub fn low_confidence_start(&self) -> Option<Instant> {
        self.low_confidence_start
    }

    /// Time since presence started, None when no person is detected
    pub fn get_elapsed_time(&self, now: Instant) -> Option<Duration> {
        self.detection_start_time
            .map(|start| now.saturating_duration_since(start))
    }

    /// Time the session-end marker has held
    pub fn session_end_elapsed(&self, now: Instant) -> Option<Duration> {
        if !self.session_end_detected {
            return None;
        }
        self.session_end_start_time
            .map(|start| now.saturating_duration_since(start))
    }

    /// Whether age and gender should still be requested at `elapsed`
    pub fn should_analyze_demographics(&self, elapsed: Duration, window: Duration) -> bool {
        elapsed <= window
    }

    /// Freeze the most recent age and gender samples as the cached demographics
    pub fn cache_demographics(&mut self) {
        if let Some(age) = self.ages.last() {
            self.cached_age = Some(*age);
        }
        if let Some((gender, confidence)) = self.genders.last() {
            self.cached_gender = Some(*gender);
            self.cached_gender_confidence = Some(*confidence);
        }
        self.demographics_cached = true;
    }

    /// Whether demographics were cached in the current presence episode
    pub fn demographics_cached(&self) -> bool {
        self.demographics_cached
    }

    /// Append an analysis result to the history.
    ///
    /// Only attributes present in the result are recorded. A demographic
    /// result that lands after caching fills a cache that is still empty.
    pub fn record_analysis(&mut self, attrs: &AttributeSet) {
        self.emotions.push(attrs.emotion);
        if let Some(age) = attrs.age {
            self.ages.push(age);
            if self.demographics_cached && self.cached_age.is_none() {
                self.cached_age = Some(age);
            }
        }
        if let Some(gender) = attrs.gender {
            let confidence = attrs.gender_confidence.unwrap_or(0.0);
            self.genders.push((gender, confidence));
            if self.demographics_cached && self.cached_gender.is_none() {
                self.cached_gender = Some(gender);
                self.cached_gender_confidence = Some(confidence);
            }
        }
    }

    /// Fill missing age and gender from the cache
    pub fn with_cached_demographics(&self, attrs: &AttributeSet) -> AttributeSet {
        let mut filled = attrs.clone();
        if filled.age.is_none() {
            filled.age = self.cached_age;
        }
        if filled.gender.is_none() {
            filled.gender = self.cached_gender;
            filled.gender_confidence = self.cached_gender_confidence;
        }
        filled
    }

    pub fn emotions(&self) -> &[Emotion] {
        &self.emotions
    }

    pub fn ages(&self) -> &[u32] {
        &self.ages
    }

    pub fn genders(&self) -> &[(Gender, f32)] {
        &self.genders
    }

    pub fn cached_age(&self) -> Option<u32> {
        self.cached_age
    }

    pub fn cached_gender(&self) -> Option<Gender> {
        self.cached_gender
    }

    pub fn cached_gender_confidence(&self) -> Option<f32> {
        self.cached_gender_confidence
    }

    /// Last known age: cached, else most recent sample
    pub fn last_age(&self) -> Option<u32> {
        self.cached_age.or_else(|| self.ages.last().copied())
    }

    /// Last known gender and confidence: cached, else most recent sample
    pub fn last_gender(&self) -> Option<(Gender, f32)> {
        match (self.cached_gender, self.cached_gender_confidence) {
            (Some(gender), confidence) => Some((gender, confidence.unwrap_or(0.0))),
            (None, _) => self.genders.last().copied(),
        }
    }

    /// Category counts and percentages of the emotion history
    pub fn emotion_summary(&self) -> EmotionSummary {
        EmotionSummary::from_emotions(&self.emotions)
    }

    /// Satisfaction score of the emotion history
    pub fn satisfaction_score(&self, baseline: f64) -> f64 {
        satisfaction_score(&self.emotions, baseline)
    }
}
