//! End-of-session report

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use face_analysis::{AnalyzerStats, Gender};
use serde::{Deserialize, Serialize};
use session::EmotionSummary;
use tracing::info;
use uuid::Uuid;

use crate::{PipelineError, SessionOutcome};

/// One camera's share of the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraReport {
    pub name: String,
    pub required: bool,
    /// Why the camera dropped out mid-session, if it did
    pub failure: Option<String>,
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub capture_fps: f64,
    pub emotion_summary: EmotionSummary,
    pub satisfaction_score: f64,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub gender_confidence: Option<f32>,
    pub analyzer: AnalyzerStats,
}

/// Optional camera that never opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableCamera {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<SessionOutcome>,
    pub cameras: Vec<CameraReport>,
    pub unavailable_cameras: Vec<UnavailableCamera>,
}

impl SessionReport {
    /// Wall-clock session length, once it has ended
    pub fn duration_secs(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.ended_at?);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    /// Satisfaction score of the first camera that recorded emotions
    pub fn satisfaction_score(&self) -> Option<f64> {
        self.cameras
            .iter()
            .find(|c| c.emotion_summary.total > 0)
            .map(|c| c.satisfaction_score)
    }

    /// Write `session_<id>.json` into `dir`, creating it if needed
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf, PipelineError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("session_{}.json", self.session_id));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;

        info!("Session report written to {}", path.display());
        Ok(path)
    }
}
