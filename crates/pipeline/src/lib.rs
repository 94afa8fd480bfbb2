//! Emotion Session Pipeline
//!
//! Fans frames from one or two cameras through a classifier, the per-camera
//! session state machine and an asynchronous face analyzer; renders, records
//! and displays the result; and decides when the session is over.

pub mod classifier;
pub mod labels;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod output;
pub mod report;
pub mod settings;
pub mod system;

pub use classifier::{Classification, ClassifierLoader, FrameClassifier, ScriptedClassifier, TimelineClassifier};
pub use output::{
    Display, DisplayControl, NullDisplay, NullSink, OverlayRenderer, RawFrameSink, RawSinkFactory, Renderer, SinkFactory, VideoSink,
};
pub use report::{CameraReport, SessionReport, UnavailableCamera};
pub use settings::{CameraSlot, CaptureBackend, LoggingSettings, LoopSettings, OutputSettings, Settings};
pub use system::{EmotionAnalysisSystem, EndReason, SessionOutcome, StopHandle};

use camera_capture::CameraError;
use face_analysis::AnalysisError;
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Classifier model load failed: {0}")]
    ModelLoad(String),

    #[error("Camera '{name}' unavailable: {source}")]
    Camera {
        name: String,
        #[source]
        source: CameraError,
    },

    #[error("Analyzer '{name}' failed to start: {source}")]
    Analyzer {
        name: String,
        #[source]
        source: AnalysisError,
    },

    #[error("No camera could be opened")]
    NoCameras,

    #[error("System not initialized")]
    NotInitialized,

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report serialization failed: {0}")]
    Report(#[from] serde_json::Error),
}

/// Classifier errors
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Invalid input frame: {0}")]
    InvalidFrame(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Invalid label file: {0}")]
    Labels(String),
}

/// Video sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame is {actual_width}x{actual_height}, sink expects {expected_width}x{expected_height}")]
    Dimensions {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Sink already closed")]
    Closed,
}

/// Initialize logging
pub fn init_logging(settings: &LoggingSettings) -> Result<(), PipelineError> {
    let level: Level = settings
        .level
        .parse()
        .map_err(|_| PipelineError::InvalidSettings(format!("Unknown log level '{}'", settings.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = if settings.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    result.map_err(|e| PipelineError::Logging(e.to_string()))
}
