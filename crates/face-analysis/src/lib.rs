//! Face Analysis
//!
//! Runs an expensive, variable-latency face attribute call (emotion, age,
//! gender) off the main loop:
//! - [`FaceAnalyzer`]: the external analysis routine, injectable
//! - [`AsyncFaceAnalyzer`]: frame-skipping, bounded queue, worker thread and
//!   latest-result mailbox around one analyzer

mod analyzer;
mod attributes;
mod stats;
mod worker;

pub use analyzer::{FaceAnalyzer, Gate, MockCall, MockFaceAnalyzer};
pub use attributes::{AnalysisActions, AttributeSet, Emotion, EmotionCategory, Gender};
pub use stats::AnalyzerStats;
pub use worker::{AnalysisResult, AnalyzerConfig, AsyncFaceAnalyzer, FrameTask, SubmitOutcome};

use thiserror::Error;

/// Errors from the external analysis call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    #[error("No face found in frame")]
    NoFace,
    #[error("Analysis failed: {0}")]
    Failed(String),
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Invalid input frame: {0}")]
    InvalidInput(String),
}
