//! Emotion Session Pipeline - Main Entry Point
//!
//! Usage: `emotion-pipeline [settings.toml]`

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use camera_capture::{DeviceOpener, SyntheticOpener};
use face_analysis::{AttributeSet, Emotion, FaceAnalyzer, Gender, MockFaceAnalyzer};
use pipeline::{
    init_logging, CaptureBackend, ClassifierLoader, ClassifyError, EmotionAnalysisSystem, FrameClassifier,
    RawSinkFactory, SessionOutcome, Settings, TimelineClassifier,
};
use tracing::{error, info};

fn main() -> ExitCode {
    match run() {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("emotion-pipeline: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<SessionOutcome> {
    let settings_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(settings_path.as_deref()).context("loading settings")?;
    init_logging(&settings.logging)?;

    info!("=== Emotion Session Pipeline v{} ===", env!("CARGO_PKG_VERSION"));

    let opener = device_opener(settings.backend)?;
    let analyzer = face_analyzer();
    let loader = classifier_loader(&settings);

    let mut system = EmotionAnalysisSystem::new(settings.clone(), opener, analyzer);
    if settings.output.record_raw {
        system = system.with_sink_factory(Box::new(RawSinkFactory {
            dir: settings.output.output_dir.clone(),
        }));
    }

    if let Err(e) = system.initialize(&loader) {
        system.cleanup();
        return Err(e).context("initialization failed");
    }

    let outcome = system.run();
    system.cleanup();

    let report = system.report();
    info!(
        "Session {} lasted {:.1}s, satisfaction {:?}",
        report.session_id,
        report.duration_secs().unwrap_or(0.0),
        report.satisfaction_score()
    );
    for camera in &report.cameras {
        info!(
            "{}: {} emotions ({:.1}% positive, {:.1}% negative), satisfaction {:.1}, age {:?}, gender {:?}",
            camera.name,
            camera.emotion_summary.total,
            camera.emotion_summary.percentages.positive,
            camera.emotion_summary.percentages.negative,
            camera.satisfaction_score,
            camera.age,
            camera.gender
        );
    }
    if settings.output.write_report {
        report.write_json(&settings.output.output_dir)?;
    }

    Ok(outcome)
}

fn device_opener(backend: CaptureBackend) -> anyhow::Result<Arc<dyn DeviceOpener>> {
    match backend {
        CaptureBackend::Synthetic => Ok(Arc::new(SyntheticOpener::new(30))),
        #[cfg(feature = "opencv")]
        CaptureBackend::OpenCv => Ok(Arc::new(camera_capture::opencv_device::OpenCvOpener)),
        #[cfg(not(feature = "opencv"))]
        CaptureBackend::OpenCv => Err(anyhow::anyhow!("backend 'opencv' requires building with the `opencv` feature")),
    }
}

/// Stand-in attribute analyzer with realistic latency
fn face_analyzer() -> Arc<dyn FaceAnalyzer> {
    let output = AttributeSet {
        emotion: Emotion::Happy,
        emotion_confidence: 0.82,
        age: Some(34),
        gender: Some(Gender::Woman),
        gender_confidence: Some(91.0),
    };
    Arc::new(MockFaceAnalyzer::new(output).with_latency(Duration::from_millis(80)))
}

/// ONNX model when configured, otherwise a demo timeline: presence for 12s,
/// then the session-end marker
fn classifier_loader(settings: &Settings) -> impl ClassifierLoader + '_ {
    move || -> Result<Arc<dyn FrameClassifier>, ClassifyError> {
        match &settings.classifier.model_path {
            Some(model_path) => load_onnx(model_path, settings),
            None => Ok(Arc::new(TimelineClassifier::demo(
                &settings.timing.presence_label,
                &settings.timing.session_end_label,
                Duration::from_secs(12),
            ))),
        }
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(model_path: &Path, settings: &Settings) -> Result<Arc<dyn FrameClassifier>, ClassifyError> {
    let labels_path = settings
        .classifier
        .labels_path
        .as_deref()
        .ok_or_else(|| ClassifyError::Labels("classifier.labels_path is not set".to_string()))?;
    let classifier = pipeline::onnx::OnnxClassifier::load(model_path, labels_path, settings.classifier.input_size)?;
    Ok(Arc::new(classifier))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(model_path: &Path, _settings: &Settings) -> Result<Arc<dyn FrameClassifier>, ClassifyError> {
    Err(ClassifyError::ModelLoad(format!(
        "{}: built without the `onnx` feature",
        model_path.display()
    )))
}
