//! Frame classification (presence / session-end labels)

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use camera_capture::VideoFrame;
use serde::{Deserialize, Serialize};

use crate::ClassifyError;

/// Classifier output for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    /// Probability of `label` (0.0 to 1.0)
    pub confidence: f32,
}

impl Classification {
    pub fn new(label: &str, confidence: f32) -> Self {
        Self {
            label: label.to_string(),
            confidence,
        }
    }
}

/// Whole-frame classifier deciding presence and session end
pub trait FrameClassifier: Send + Sync {
    fn classify(&self, frame: &VideoFrame) -> Result<Classification, ClassifyError>;
}

/// Loads the classifier model; called once during initialization
pub trait ClassifierLoader {
    fn load(&self) -> Result<Arc<dyn FrameClassifier>, ClassifyError>;
}

impl<F> ClassifierLoader for F
where
    F: Fn() -> Result<Arc<dyn FrameClassifier>, ClassifyError>,
{
    fn load(&self) -> Result<Arc<dyn FrameClassifier>, ClassifyError> {
        self()
    }
}

/// Classifier keyed on the frame's top-left pixel color.
///
/// Synthetic cameras fill frames with a per-camera color, so tests drive each
/// camera's label independently by changing the entry for its color.
pub struct ScriptedClassifier {
    by_color: Mutex<HashMap<[u8; 3], Classification>>,
    fallback: Classification,
}

impl ScriptedClassifier {
    /// Classifier returning `fallback` for unknown colors
    pub fn new(fallback: Classification) -> Self {
        Self {
            by_color: Mutex::new(HashMap::new()),
            fallback,
        }
    }

    /// Return `label` for frames of this color from now on
    pub fn set(&self, color: [u8; 3], label: &str, confidence: f32) {
        self.by_color
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(color, Classification::new(label, confidence));
    }
}

impl FrameClassifier for ScriptedClassifier {
    fn classify(&self, frame: &VideoFrame) -> Result<Classification, ClassifyError> {
        let color = frame
            .get_pixel(0, 0)
            .ok_or_else(|| ClassifyError::InvalidFrame(format!("{}x{} frame", frame.width, frame.height)))?;

        let by_color = self.by_color.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(by_color.get(&color).cloned().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Classifier following a fixed timeline, measured from its first call.
///
/// Each entry applies from its offset until the next entry's offset.
pub struct TimelineClassifier {
    timeline: Vec<(Duration, Classification)>,
    started: Mutex<Option<Instant>>,
}

impl TimelineClassifier {
    pub fn new(mut timeline: Vec<(Duration, Classification)>) -> Self {
        timeline.sort_by_key(|(offset, _)| *offset);
        Self {
            timeline,
            started: Mutex::new(None),
        }
    }

    /// Demo session: a subject for `presence`, then the session-end marker
    pub fn demo(presence_label: &str, session_end_label: &str, presence: Duration) -> Self {
        Self::new(vec![
            (Duration::ZERO, Classification::new(presence_label, 1.0)),
            (presence, Classification::new(session_end_label, 1.0)),
        ])
    }

    /// Classification at `offset` into the timeline
    pub fn at(&self, offset: Duration) -> Option<&Classification> {
        self.timeline
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .map(|(_, classification)| classification)
    }
}

impl FrameClassifier for TimelineClassifier {
    fn classify(&self, _frame: &VideoFrame) -> Result<Classification, ClassifyError> {
        let started = *self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(Instant::now);

        self.at(started.elapsed())
            .cloned()
            .ok_or_else(|| ClassifyError::Inference("timeline has no entry yet".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_by_color() {
        let classifier = ScriptedClassifier::new(Classification::new("Background", 0.9));
        let red = VideoFrame::solid(4, 4, [255, 0, 0]);
        let blue = VideoFrame::solid(4, 4, [0, 0, 255]);

        classifier.set([255, 0, 0], "Class 1", 1.0);
        assert_eq!(classifier.classify(&red).unwrap().label, "Class 1");
        assert_eq!(classifier.classify(&blue).unwrap().label, "Background");

        classifier.set([255, 0, 0], "Class 2", 0.95);
        assert_eq!(classifier.classify(&red).unwrap(), Classification::new("Class 2", 0.95));
    }

    #[test]
    fn test_scripted_rejects_empty_frame() {
        let classifier = ScriptedClassifier::new(Classification::new("Background", 0.9));
        let empty = VideoFrame::new(Vec::new(), 0, 0, 0, 0);
        assert!(classifier.classify(&empty).is_err());
    }

    #[test]
    fn test_timeline_lookup() {
        let timeline = TimelineClassifier::demo("Class 1", "Class 2", Duration::from_secs(5));
        assert_eq!(timeline.at(Duration::ZERO).unwrap().label, "Class 1");
        assert_eq!(timeline.at(Duration::from_millis(4999)).unwrap().label, "Class 1");
        assert_eq!(timeline.at(Duration::from_secs(5)).unwrap().label, "Class 2");

        let late = TimelineClassifier::new(vec![(Duration::from_secs(1), Classification::new("x", 1.0))]);
        assert!(late.at(Duration::ZERO).is_none());
    }

    #[test]
    fn test_closure_loader() {
        let loader = || -> Result<Arc<dyn FrameClassifier>, ClassifyError> {
            Ok(Arc::new(ScriptedClassifier::new(Classification::new("Background", 1.0))))
        };
        assert!(loader.load().is_ok());
    }
}
