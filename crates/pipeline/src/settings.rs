//! Pipeline settings
//!
//! Loaded in three layers: built-in defaults, an optional config file
//! (TOML/YAML/JSON by extension), then `EMOTION__*` environment variables, e.g.
//! `EMOTION__ANALYZER__FRAME_SKIP=3` or `EMOTION__TIMING__PRESENCE_DELAY_MS=2000`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use camera_capture::CameraConfig;
use config::{Config, Environment, File};
use face_analysis::AnalyzerConfig;
use serde::{Deserialize, Serialize};
use session::TimingConfig;
use tracing::info;

use crate::PipelineError;

/// One configured camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSlot {
    /// Name used in logs, reports and output files (e.g. "customer")
    pub name: String,
    /// A required camera failing ends the session; an optional one is dropped
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub device: CameraConfig,
}

fn default_required() -> bool {
    true
}

impl CameraSlot {
    pub fn new(name: &str, camera_id: i32, required: bool) -> Self {
        Self {
            name: name.to_string(),
            required,
            device: CameraConfig::for_camera(camera_id),
        }
    }
}

/// Where frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// Generated frames, no hardware
    #[default]
    Synthetic,
    /// OpenCV `VideoCapture` (feature `opencv`)
    OpenCv,
}

/// Main loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Sleep between loop iterations (milliseconds)
    pub loop_interval_ms: u64,
    /// Wait timeout for each background camera open (milliseconds)
    pub camera_wait_timeout_ms: u64,
    /// Consecutive failed reads before a camera counts as failed
    pub max_consecutive_read_failures: u32,
    /// Analyzer worker join timeout on cleanup (milliseconds)
    pub analyzer_stop_timeout_ms: u64,
    /// Mirror frames for display (selfie view)
    pub mirror_display: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            loop_interval_ms: 10,
            camera_wait_timeout_ms: 10_000,
            max_consecutive_read_failures: 3,
            analyzer_stop_timeout_ms: 2000,
            mirror_display: true,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub output_dir: PathBuf,
    /// Append rendered frames to a raw RGB file per camera
    pub record_raw: bool,
    /// Write the session report as JSON after the run
    pub write_report: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            record_raw: false,
            write_report: true,
        }
    }
}

/// Frame classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// ONNX model (feature `onnx`); None selects the scripted demo classifier
    pub model_path: Option<PathBuf>,
    /// `"<index> <label>"` lines
    pub labels_path: Option<PathBuf>,
    /// Square model input size
    pub input_size: u32,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            labels_path: None,
            input_size: 224,
        }
    }
}

/// All pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: CaptureBackend,
    pub cameras: Vec<CameraSlot>,
    /// Shared by every camera's analyzer; the name is replaced by the camera name
    pub analyzer: AnalyzerConfig,
    pub timing: TimingConfig,
    #[serde(rename = "loop")]
    pub main_loop: LoopSettings,
    pub logging: LoggingSettings,
    pub output: OutputSettings,
    pub classifier: ClassifierSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::default(),
            cameras: vec![
                CameraSlot::new("customer", 0, true),
                CameraSlot::new("server", 1, false),
            ],
            analyzer: AnalyzerConfig::default(),
            timing: TimingConfig::default(),
            main_loop: LoopSettings::default(),
            logging: LoggingSettings::default(),
            output: OutputSettings::default(),
            classifier: ClassifierSettings::default(),
        }
    }
}

impl Settings {
    /// Load defaults, then `path` (if given), then `EMOTION__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            info!("Loading settings from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("EMOTION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Analyzer configuration for one camera
    pub fn analyzer_for(&self, camera_name: &str) -> AnalyzerConfig {
        AnalyzerConfig {
            name: camera_name.to_string(),
            ..self.analyzer.clone()
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidSettings(msg));

        if self.cameras.is_empty() {
            return invalid("no cameras configured".to_string());
        }
        if self.cameras.len() > 2 {
            return invalid(format!("at most 2 cameras supported, {} configured", self.cameras.len()));
        }

        let mut names = HashSet::new();
        for slot in &self.cameras {
            if slot.name.trim().is_empty() {
                return invalid("camera name must not be empty".to_string());
            }
            if !names.insert(slot.name.as_str()) {
                return invalid(format!("duplicate camera name '{}'", slot.name));
            }
            if slot.device.width == 0 || slot.device.height == 0 {
                return invalid(format!("camera '{}' has a zero-sized resolution", slot.name));
            }
            if slot.device.fps == 0 {
                return invalid(format!("camera '{}' has zero fps", slot.name));
            }
        }

        if self.analyzer.frame_skip == 0 {
            return invalid("analyzer frame_skip must be at least 1".to_string());
        }
        if self.analyzer.queue_depth == 0 {
            return invalid("analyzer queue_depth must be at least 1".to_string());
        }
        if self.analyzer.input_width == 0 || self.analyzer.input_height == 0 {
            return invalid("analyzer working resolution must be non-zero".to_string());
        }
        if self.main_loop.max_consecutive_read_failures == 0 {
            return invalid("max_consecutive_read_failures must be at least 1".to_string());
        }

        self.timing.validate().map_err(PipelineError::InvalidSettings)
    }
}
