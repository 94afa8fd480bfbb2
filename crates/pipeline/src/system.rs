//! Emotion analysis system: the orchestrator
//!
//! Owns, per camera, one [`ThreadedCamera`], one [`CameraState`] and one
//! [`AsyncFaceAnalyzer`], and drives the main loop:
//! read → classify → update state → submit/collect → render/record/display →
//! exit check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camera_capture::{AsyncCameraInitializer, CameraError, DeviceOpener, ThreadedCamera, VideoFrame};
use chrono::{DateTime, Utc};
use face_analysis::{AnalysisResult, AnalyzerStats, AsyncFaceAnalyzer, FaceAnalyzer};
use serde::{Deserialize, Serialize};
use session::{process_frame, CameraState, FrameDecision, TimingConfig};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::report::{CameraReport, SessionReport, UnavailableCamera};
use crate::{
    ClassifierLoader, Display, DisplayControl, FrameClassifier, NullDisplay, NullSink, OverlayRenderer,
    PipelineError, Renderer, SinkFactory, VideoSink,
};
use crate::settings::{CameraSlot, Settings};

/// Why a session ended on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndReason {
    /// Session-end marker held past the absence delay
    AbsenceConfirmed { camera: String },
    /// Presence stayed below full confidence past the timeout
    LowConfidence { camera: String },
}

/// Result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Stop handle or hosting UI asked to quit
    UserExit,
    SessionEnd(EndReason),
    Failure(String),
}

impl SessionOutcome {
    /// Process exit code: 0 unless the session failed
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionOutcome::UserExit | SessionOutcome::SessionEnd(_) => 0,
            SessionOutcome::Failure(_) => 1,
        }
    }
}

/// Asks a running session to stop from another thread
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What one camera's turn in the loop produced
enum CameraStep {
    /// No new frame
    Idle,
    Processed,
    Failed(String),
    End(EndReason),
    Quit,
}

/// Everything the orchestrator owns for one camera.
///
/// Field order is drop order: the analyzer stops before the camera.
struct ActiveCamera {
    name: String,
    required: bool,
    analyzer: AsyncFaceAnalyzer,
    camera: ThreadedCamera,
    sink: Box<dyn VideoSink>,
    state: CameraState,
    /// Latest result with cached demographics filled in, for the overlay
    previous_result: Option<AnalysisResult>,
    last_frame_sequence: u64,
    last_result_sequence: u64,
    frames_processed: u64,
    sink_errors: u64,
    failure: Option<String>,
}

impl ActiveCamera {
    fn process(
        &mut self,
        classifier: &dyn FrameClassifier,
        timing: &TimingConfig,
        max_read_failures: u32,
        now: Instant,
        renderer: &dyn Renderer,
        display: &mut dyn Display,
    ) -> CameraStep {
        if !self.camera.is_opened() {
            return CameraStep::Failed("capture stopped".to_string());
        }

        let (ok, frame) = self.camera.read();
        if !ok {
            let failures = self.camera.consecutive_failures();
            if failures >= max_read_failures {
                return CameraStep::Failed(format!("{} consecutive read failures", failures));
            }
        }
        let Some(frame) = frame else {
            return CameraStep::Idle;
        };
        if frame.sequence <= self.last_frame_sequence {
            return CameraStep::Idle;
        }
        self.last_frame_sequence = frame.sequence;
        self.frames_processed += 1;

        let classification = match classifier.classify(&frame) {
            Ok(classification) => classification,
            Err(e) => {
                warn!("{}: classification failed: {}", self.name, e);
                return self.present(&frame, None, renderer, display);
            }
        };

        match process_frame(
            &mut self.state,
            &classification.label,
            classification.confidence,
            now,
            timing,
        ) {
            FrameDecision::AbortLowConfidence { held } => {
                warn!("{}: low confidence for {:?}, ending session", self.name, held);
                return CameraStep::End(EndReason::LowConfidence {
                    camera: self.name.clone(),
                });
            }
            FrameDecision::Analyze { actions, elapsed } => {
                let outcome = self.analyzer.submit_frame(
                    &frame,
                    Some(&classification.label),
                    Some(classification.confidence),
                    actions,
                );
                debug!(
                    "{}: frame {} at {:?} -> {:?} (demographics={})",
                    self.name,
                    frame.sequence,
                    elapsed,
                    outcome,
                    actions.includes_demographics()
                );
            }
            FrameDecision::Idle => {}
        }

        self.collect_result();

        let overlay = if self.state.person_detected() {
            self.previous_result.clone()
        } else {
            None
        };
        self.present(&frame, overlay.as_ref(), renderer, display)
    }

    /// Render, record and display one frame
    fn present(
        &mut self,
        frame: &VideoFrame,
        overlay: Option<&AnalysisResult>,
        renderer: &dyn Renderer,
        display: &mut dyn Display,
    ) -> CameraStep {
        let rendered = renderer.render(frame, overlay);

        if let Err(e) = self.sink.write(&rendered) {
            self.sink_errors += 1;
            if self.sink_errors == 1 || self.sink_errors % 100 == 0 {
                warn!("{}: recording failed ({} errors): {}", self.name, self.sink_errors, e);
            }
        }

        match display.show(&self.name, &rendered) {
            DisplayControl::Quit => CameraStep::Quit,
            DisplayControl::Continue => CameraStep::Processed,
        }
    }

    /// Mark the camera failed and stop its analyzer, then its capture thread
    fn fail(&mut self, reason: String, analyzer_timeout: Duration) {
        self.failure = Some(reason);
        self.analyzer.stop(analyzer_timeout);
        self.camera.stop();
    }

    /// Record a new analyzer result once and refresh the overlay cache
    fn collect_result(&mut self) {
        let Some(result) = self.analyzer.get_result(Duration::ZERO) else {
            return;
        };
        if result.sequence <= self.last_result_sequence {
            return;
        }
        self.last_result_sequence = result.sequence;

        let attrs = result.attributes();
        self.state.record_analysis(&attrs);
        let shown = self.state.with_cached_demographics(&attrs);
        debug!(
            "{}: {} ({:.2}) age={:?} gender={:?} in {:?}",
            self.name, shown.emotion, shown.emotion_confidence, shown.age, shown.gender, result.latency
        );

        self.previous_result = Some(AnalysisResult {
            age: shown.age,
            gender: shown.gender,
            gender_confidence: shown.gender_confidence,
            ..result
        });
    }

    fn report(&self, baseline: f64) -> CameraReport {
        let gender = self.state.last_gender();
        CameraReport {
            name: self.name.clone(),
            required: self.required,
            failure: self.failure.clone(),
            frames_captured: self.camera.frame_count(),
            frames_processed: self.frames_processed,
            capture_fps: self.camera.fps(),
            emotion_summary: self.state.emotion_summary(),
            satisfaction_score: self.state.satisfaction_score(baseline),
            age: self.state.last_age(),
            gender: gender.map(|(g, _)| g),
            gender_confidence: gender.map(|(_, c)| c),
            analyzer: self.analyzer.statistics(),
        }
    }
}

/// Multi-camera emotion session
pub struct EmotionAnalysisSystem {
    settings: Settings,
    opener: Arc<dyn DeviceOpener>,
    face_analyzer: Arc<dyn FaceAnalyzer>,
    renderer: Box<dyn Renderer>,
    display: Box<dyn Display>,
    sinks: Box<dyn SinkFactory>,
    classifier: Option<Arc<dyn FrameClassifier>>,
    cameras: Vec<ActiveCamera>,
    unavailable: Vec<UnavailableCamera>,
    stop: Arc<AtomicBool>,
    session_id: Uuid,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    outcome: Option<SessionOutcome>,
    cleaned_up: bool,
}

impl EmotionAnalysisSystem {
    /// Create a system with a headless display and no recording
    pub fn new(settings: Settings, opener: Arc<dyn DeviceOpener>, face_analyzer: Arc<dyn FaceAnalyzer>) -> Self {
        let renderer = OverlayRenderer::new(settings.main_loop.mirror_display);
        Self {
            settings,
            opener,
            face_analyzer,
            renderer: Box::new(renderer),
            display: Box::new(NullDisplay::default()),
            sinks: Box::new(NullSink),
            classifier: None,
            cameras: Vec::new(),
            unavailable: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            session_id: Uuid::new_v4(),
            started_at: None,
            ended_at: None,
            outcome: None,
            cleaned_up: false,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = display;
        self
    }

    pub fn with_sink_factory(mut self, sinks: Box<dyn SinkFactory>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Open cameras and load the classifier.
    ///
    /// Camera opens start in the background first, then the classifier loads,
    /// then each camera is awaited. A required camera that cannot be opened is
    /// an error; an optional one is skipped.
    pub fn initialize(&mut self, loader: &dyn ClassifierLoader) -> Result<(), PipelineError> {
        self.settings.validate()?;
        if self.classifier.is_some() {
            warn!("System already initialized");
            return Ok(());
        }

        info!("Initializing session {}", self.session_id);
        self.started_at = Some(Utc::now());

        let slots = self.settings.cameras.clone();
        let mut pending = Vec::with_capacity(slots.len());
        for slot in slots {
            match AsyncCameraInitializer::start_opening(slot.device.clone(), self.opener.clone()) {
                Ok(initializer) => pending.push((slot, initializer)),
                Err(e) => self.camera_unavailable(&slot, e)?,
            }
        }

        info!("Loading classifier model...");
        let load_started = Instant::now();
        let classifier = loader.load().map_err(|e| {
            error!("Classifier model load failed: {}", e);
            PipelineError::ModelLoad(e.to_string())
        })?;
        info!("Classifier loaded in {:?}", load_started.elapsed());

        let wait = Duration::from_millis(self.settings.main_loop.camera_wait_timeout_ms);
        for (slot, initializer) in pending {
            match initializer.wait_for_camera(wait) {
                Ok(camera) => self.activate(&slot, camera)?,
                Err(e) => self.camera_unavailable(&slot, e)?,
            }
        }

        if self.cameras.is_empty() {
            error!("No camera could be opened");
            return Err(PipelineError::NoCameras);
        }

        self.classifier = Some(classifier);
        info!(
            "Initialization complete: cameras=[{}]",
            self.active_cameras().join(", ")
        );
        Ok(())
    }

    fn camera_unavailable(&mut self, slot: &CameraSlot, error: CameraError) -> Result<(), PipelineError> {
        if slot.required {
            error!("Required camera '{}' unavailable: {}", slot.name, error);
            return Err(PipelineError::Camera {
                name: slot.name.clone(),
                source: error,
            });
        }

        warn!("Optional camera '{}' unavailable, continuing without it: {}", slot.name, error);
        self.unavailable.push(UnavailableCamera {
            name: slot.name.clone(),
            reason: error.to_string(),
        });
        Ok(())
    }

    fn activate(&mut self, slot: &CameraSlot, camera: ThreadedCamera) -> Result<(), PipelineError> {
        let mut analyzer = AsyncFaceAnalyzer::new(self.settings.analyzer_for(&slot.name), self.face_analyzer.clone());
        analyzer.start().map_err(|source| PipelineError::Analyzer {
            name: slot.name.clone(),
            source,
        })?;

        let device = camera.settings();
        let sink = match self.sinks.create(&slot.name, device.width, device.height) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("{}: recording disabled: {}", slot.name, e);
                Box::new(NullSink)
            }
        };

        info!(
            "Camera '{}' active (device {}, {}x{}, required={})",
            slot.name,
            camera.camera_id(),
            device.width,
            device.height,
            slot.required
        );

        self.cameras.push(ActiveCamera {
            name: slot.name.clone(),
            required: slot.required,
            analyzer,
            camera,
            sink,
            state: CameraState::new(),
            previous_result: None,
            last_frame_sequence: 0,
            last_result_sequence: 0,
            frames_processed: 0,
            sink_errors: 0,
            failure: None,
        });
        Ok(())
    }

    /// One pass over all cameras at time `now`, then the exit check
    pub fn step(&mut self, now: Instant) -> Option<SessionOutcome> {
        if self.stop.load(Ordering::Acquire) {
            info!("Stop requested");
            return Some(SessionOutcome::UserExit);
        }
        let Some(classifier) = self.classifier.clone() else {
            return Some(SessionOutcome::Failure(PipelineError::NotInitialized.to_string()));
        };

        let timing = &self.settings.timing;
        let max_read_failures = self.settings.main_loop.max_consecutive_read_failures;
        let analyzer_timeout = Duration::from_millis(self.settings.main_loop.analyzer_stop_timeout_ms);

        for camera in self.cameras.iter_mut().filter(|c| c.failure.is_none()) {
            let step = camera.process(
                classifier.as_ref(),
                timing,
                max_read_failures,
                now,
                self.renderer.as_ref(),
                self.display.as_mut(),
            );

            match step {
                CameraStep::Idle | CameraStep::Processed => {}
                CameraStep::Failed(reason) => {
                    if camera.required {
                        error!("Required camera '{}' failed: {}", camera.name, reason);
                        let outcome = format!("camera '{}' failed: {}", camera.name, reason);
                        camera.fail(reason, analyzer_timeout);
                        return Some(SessionOutcome::Failure(outcome));
                    }
                    warn!("Optional camera '{}' failed, dropping it: {}", camera.name, reason);
                    camera.fail(reason, analyzer_timeout);
                }
                CameraStep::End(reason) => return Some(SessionOutcome::SessionEnd(reason)),
                CameraStep::Quit => {
                    info!("Display requested quit");
                    return Some(SessionOutcome::UserExit);
                }
            }
        }

        self.should_exit(now)
    }

    /// Global exit condition: any camera's session-end marker held too long
    fn should_exit(&self, now: Instant) -> Option<SessionOutcome> {
        let absence_delay = self.settings.timing.absence_delay();
        for camera in self.cameras.iter().filter(|c| c.failure.is_none()) {
            if let Some(held) = camera.state.session_end_elapsed(now) {
                if held > absence_delay {
                    info!("{}: session-end marker held for {:?}, ending session", camera.name, held);
                    return Some(SessionOutcome::SessionEnd(EndReason::AbsenceConfirmed {
                        camera: camera.name.clone(),
                    }));
                }
            }
        }

        if self.cameras.iter().all(|c| c.failure.is_some()) {
            return Some(SessionOutcome::Failure("all cameras failed".to_string()));
        }
        None
    }

    /// Run the main loop until the session ends
    pub fn run(&mut self) -> SessionOutcome {
        if self.classifier.is_none() || self.cameras.is_empty() {
            let outcome = SessionOutcome::Failure(PipelineError::NotInitialized.to_string());
            self.finish(outcome.clone());
            return outcome;
        }

        info!("Session {} running with {} camera(s)", self.session_id, self.cameras.len());
        let interval = Duration::from_millis(self.settings.main_loop.loop_interval_ms);

        let outcome = loop {
            if let Some(outcome) = self.step(Instant::now()) {
                break outcome;
            }
            std::thread::sleep(interval);
        };

        self.finish(outcome.clone());
        outcome
    }

    fn finish(&mut self, outcome: SessionOutcome) {
        info!("Session {} finished: {:?}", self.session_id, outcome);
        self.ended_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    /// Stop analyzers, then cameras (reverse order), then close sinks. Idempotent.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        info!("Cleaning up {} camera(s)...", self.cameras.len());

        let analyzer_timeout = Duration::from_millis(self.settings.main_loop.analyzer_stop_timeout_ms);
        for camera in self.cameras.iter_mut().rev() {
            camera.analyzer.stop(analyzer_timeout);
        }
        for camera in self.cameras.iter_mut().rev() {
            camera.camera.stop();
        }
        for camera in self.cameras.iter_mut() {
            if let Err(e) = camera.sink.finish() {
                warn!("{}: closing recording failed: {}", camera.name, e);
            }
        }

        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
        info!("Cleanup complete");
    }

    /// Handle for stopping the session from another thread
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Per-camera session state
    pub fn camera_states(&self) -> Vec<(&str, &CameraState)> {
        self.cameras
            .iter()
            .map(|c| (c.name.as_str(), &c.state))
            .collect()
    }

    pub fn camera_state(&self, name: &str) -> Option<&CameraState> {
        self.cameras.iter().find(|c| c.name == name).map(|c| &c.state)
    }

    /// Latest result shown for a camera, cached demographics filled in
    pub fn latest_result(&self, name: &str) -> Option<&AnalysisResult> {
        self.cameras
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.previous_result.as_ref())
    }

    pub fn analyzer_statistics(&self) -> Vec<AnalyzerStats> {
        self.cameras.iter().map(|c| c.analyzer.statistics()).collect()
    }

    /// Cameras still taking part in the session
    pub fn active_cameras(&self) -> Vec<&str> {
        self.cameras
            .iter()
            .filter(|c| c.failure.is_none())
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Summary of the session so far
    pub fn report(&self) -> SessionReport {
        let baseline = self.settings.timing.satisfaction_baseline;
        SessionReport {
            session_id: self.session_id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            outcome: self.outcome.clone(),
            cameras: self.cameras.iter().map(|c| c.report(baseline)).collect(),
            unavailable_cameras: self.unavailable.clone(),
        }
    }
}

impl Drop for EmotionAnalysisSystem {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Classification, ClassifyError, ScriptedClassifier};
    use camera_capture::{synthetic_fill, CameraConfig, CameraDevice, SyntheticOpener, VideoFrame};
    use face_analysis::{AnalysisActions, AttributeSet, Emotion, Gender, MockFaceAnalyzer};
    use std::sync::atomic::AtomicU64;

    const CUSTOMER: i32 = 0;
    const SERVER: i32 = 1;

    fn fast_device(camera_id: i32) -> CameraConfig {
        CameraConfig {
            camera_id,
            width: 32,
            height: 24,
            fps: 200,
            warmup_frames: 1,
            open_retries: 2,
            retry_delay_ms: 5,
            stop_timeout_ms: 1000,
            ..Default::default()
        }
    }

    fn settings(optional_server: bool) -> Settings {
        let mut settings = Settings::default();
        settings.cameras = vec![
            CameraSlot {
                name: "customer".to_string(),
                required: true,
                device: fast_device(CUSTOMER),
            },
            CameraSlot {
                name: "server".to_string(),
                required: !optional_server,
                device: fast_device(SERVER),
            },
        ];
        settings.analyzer.frame_skip = 1;
        settings.analyzer.poll_interval_ms = 5;
        settings.main_loop.camera_wait_timeout_ms = 5000;
        settings.main_loop.loop_interval_ms = 1;
        settings
    }

    fn attrs() -> AttributeSet {
        AttributeSet {
            emotion: Emotion::Happy,
            emotion_confidence: 0.9,
            age: Some(29),
            gender: Some(Gender::Woman),
            gender_confidence: Some(97.0),
        }
    }

    fn scripted() -> Arc<ScriptedClassifier> {
        Arc::new(ScriptedClassifier::new(Classification::new("Background", 0.9)))
    }

    fn loader(classifier: Arc<ScriptedClassifier>) -> impl ClassifierLoader {
        move || -> Result<Arc<dyn FrameClassifier>, ClassifyError> { Ok(classifier.clone()) }
    }

    fn system(settings: Settings, opener: impl DeviceOpener + 'static) -> EmotionAnalysisSystem {
        EmotionAnalysisSystem::new(settings, Arc::new(opener), Arc::new(MockFaceAnalyzer::new(attrs())))
    }

    /// Step at `now` until `done` holds or the session ends
    fn step_until(
        system: &mut EmotionAnalysisSystem,
        now: Instant,
        mut done: impl FnMut(&EmotionAnalysisSystem) -> bool,
    ) -> Option<SessionOutcome> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(system) {
            if let Some(outcome) = system.step(now) {
                return Some(outcome);
            }
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(2));
        }
        None
    }

    /// Opener whose `failing_id` camera stops delivering frames
    struct SplitOpener {
        healthy: SyntheticOpener,
        failing: SyntheticOpener,
        failing_id: i32,
    }

    impl DeviceOpener for SplitOpener {
        fn open(&self, camera_id: i32) -> Result<Box<dyn CameraDevice>, CameraError> {
            if camera_id == self.failing_id {
                self.failing.open(camera_id)
            } else {
                self.healthy.open(camera_id)
            }
        }
    }

    struct QuitAfter(u64);

    struct CountingDisplay(Arc<AtomicU64>);

    impl Display for CountingDisplay {
        fn show(&mut self, _camera: &str, _frame: &VideoFrame) -> DisplayControl {
            self.0.fetch_add(1, Ordering::SeqCst);
            DisplayControl::Continue
        }
    }

    struct FailingClassifier;

    impl FrameClassifier for FailingClassifier {
        fn classify(&self, _frame: &VideoFrame) -> Result<Classification, ClassifyError> {
            Err(ClassifyError::Inference("model crashed".to_string()))
        }
    }

    impl Display for QuitAfter {
        fn show(&mut self, _camera: &str, _frame: &VideoFrame) -> DisplayControl {
            self.0 = self.0.saturating_sub(1);
            if self.0 == 0 {
                DisplayControl::Quit
            } else {
                DisplayControl::Continue
            }
        }
    }

    #[test]
    fn test_initialize_opens_all_cameras() {
        let mut system = system(settings(true), SyntheticOpener::new(200));
        system.initialize(&loader(scripted())).unwrap();

        assert_eq!(system.active_cameras(), vec!["customer", "server"]);
        assert_eq!(system.camera_states().len(), 2);
        assert_eq!(system.analyzer_statistics().len(), 2);
        assert_eq!(system.analyzer_statistics()[1].name, "server");
    }

    #[test]
    fn test_missing_optional_camera_is_skipped() {
        let mut system = system(settings(true), SyntheticOpener::new(200).with_missing(&[SERVER]));
        system.initialize(&loader(scripted())).unwrap();

        assert_eq!(system.active_cameras(), vec!["customer"]);
        let report = system.report();
        assert_eq!(report.unavailable_cameras.len(), 1);
        assert_eq!(report.unavailable_cameras[0].name, "server");
    }

    #[test]
    fn test_missing_required_camera_fails() {
        let mut system = system(settings(false), SyntheticOpener::new(200).with_missing(&[SERVER]));
        match system.initialize(&loader(scripted())) {
            Err(PipelineError::Camera { name, .. }) => assert_eq!(name, "server"),
            other => panic!("unexpected: {:?}", other.err()),
        }
        assert!(matches!(system.run(), SessionOutcome::Failure(_)));
    }

    #[test]
    fn test_model_load_failure_is_fatal() {
        let mut system = system(settings(true), SyntheticOpener::new(200));
        let failing = || -> Result<Arc<dyn FrameClassifier>, ClassifyError> {
            Err(ClassifyError::ModelLoad("missing weights".to_string()))
        };
        assert!(matches!(system.initialize(&failing), Err(PipelineError::ModelLoad(_))));
        assert!(system.active_cameras().is_empty());
    }

    #[test]
    fn test_two_cameras_session_end_on_one() {
        let classifier = scripted();
        classifier.set(synthetic_fill(CUSTOMER), "Class 2", 0.99);
        classifier.set(synthetic_fill(SERVER), "Class 1", 1.0);

        let mut system = system(settings(true), SyntheticOpener::new(200));
        system.initialize(&loader(classifier)).unwrap();

        let base = Instant::now();
        let outcome = step_until(&mut system, base, |s| {
            s.camera_state("customer").map_or(false, |c| c.session_end_detected())
                && s.camera_state("server").map_or(false, |c| c.person_detected())
        });
        assert_eq!(outcome, None);

        let outcome = step_until(&mut system, base + Duration::from_secs(2), |s| {
            s.camera_state("server").map_or(false, |c| c.person_detected())
        });
        assert_eq!(outcome, None);
        assert_eq!(system.step(base + Duration::from_secs(2)), None);

        assert_eq!(
            system.step(base + Duration::from_millis(3500)),
            Some(SessionOutcome::SessionEnd(EndReason::AbsenceConfirmed {
                camera: "customer".to_string()
            }))
        );
        assert!(system.camera_state("server").unwrap().person_detected());
    }

    #[test]
    fn test_presence_drives_analysis_and_caching() {
        let classifier = scripted();
        classifier.set(synthetic_fill(CUSTOMER), "Class 1", 1.0);

        let mut settings = settings(true);
        settings.cameras.truncate(1);
        let mock = Arc::new(MockFaceAnalyzer::new(attrs()));
        let mut system = EmotionAnalysisSystem::new(settings, Arc::new(SyntheticOpener::new(200)), mock.clone());
        system.initialize(&loader(classifier)).unwrap();

        let base = Instant::now();
        step_until(&mut system, base, |s| s.camera_state("customer").unwrap().person_detected());

        // Inside the demographic window: full analysis
        let window = base + Duration::from_secs(4);
        step_until(&mut system, window, |s| !s.camera_state("customer").unwrap().ages().is_empty());
        let state = system.camera_state("customer").unwrap();
        assert_eq!(state.ages()[0], 29);
        assert_eq!(state.genders()[0].0, Gender::Woman);

        // Past the window: demographics cached, emotion-only analysis
        let late = base + Duration::from_secs(9);
        step_until(&mut system, late, |s| s.camera_state("customer").unwrap().demographics_cached());
        let emotions_at_cache = system.camera_state("customer").unwrap().emotions().len();
        step_until(&mut system, late, |s| {
            s.camera_state("customer").unwrap().emotions().len() >= emotions_at_cache + 8
        });

        let state = system.camera_state("customer").unwrap();
        assert_eq!(state.cached_age(), Some(29));
        let last_call = mock.calls().last().cloned().unwrap();
        assert_eq!(last_call.actions, AnalysisActions::EMOTION_ONLY);
        assert_eq!((last_call.width, last_call.height), (320, 240));

        let shown = system.latest_result("customer").unwrap();
        assert_eq!(shown.age, Some(29));
        assert_eq!(shown.gender, Some(Gender::Woman));
        assert_eq!(system.analyzer_statistics()[0].failed_analyses, 0);
    }

    #[test]
    fn test_low_confidence_ends_session() {
        let classifier = scripted();
        classifier.set(synthetic_fill(CUSTOMER), "Class 1", 0.5);

        let mut system = system(settings(true), SyntheticOpener::new(200));
        system.initialize(&loader(classifier)).unwrap();

        let base = Instant::now();
        step_until(&mut system, base, |s| {
            s.camera_state("customer").unwrap().low_confidence_start().is_some()
        });

        let outcome = step_until(&mut system, base + Duration::from_secs(4), |_| false);
        assert_eq!(
            outcome,
            Some(SessionOutcome::SessionEnd(EndReason::LowConfidence {
                camera: "customer".to_string()
            }))
        );
    }

    #[test]
    fn test_failing_optional_camera_is_dropped() {
        let opener = SplitOpener {
            healthy: SyntheticOpener::new(200),
            failing: SyntheticOpener::new(200).with_read_failures_after(3),
            failing_id: SERVER,
        };
        let mut system = system(settings(true), opener);
        system.initialize(&loader(scripted())).unwrap();

        let outcome = step_until(&mut system, Instant::now(), |s| s.active_cameras().len() == 1);
        assert_eq!(outcome, None);
        assert_eq!(system.active_cameras(), vec!["customer"]);
        assert!(system.report().cameras[1].failure.is_some());

        // The dropped camera's threads are stopped right away, not at cleanup
        let server = &system.cameras[1];
        assert!(!server.analyzer.is_running());
        assert!(!server.camera.is_opened());
        assert!(system.cameras[0].analyzer.is_running());
        assert!(system.cameras[0].camera.is_opened());
    }

    #[test]
    fn test_failing_required_camera_fails_session() {
        let opener = SplitOpener {
            healthy: SyntheticOpener::new(200),
            failing: SyntheticOpener::new(200).with_read_failures_after(3),
            failing_id: SERVER,
        };
        let mut system = system(settings(false), opener);
        system.initialize(&loader(scripted())).unwrap();

        let outcome = step_until(&mut system, Instant::now(), |_| false);
        match outcome {
            Some(SessionOutcome::Failure(reason)) => assert!(reason.contains("server")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!system.cameras[1].analyzer.is_running());
        assert!(!system.cameras[1].camera.is_opened());
    }

    #[test]
    fn test_classification_error_still_records_and_displays() {
        let failing = || -> Result<Arc<dyn FrameClassifier>, ClassifyError> { Ok(Arc::new(FailingClassifier)) };
        let shown = Arc::new(AtomicU64::new(0));
        let dir = std::env::temp_dir().join(format!("emotion-system-{}", Uuid::new_v4()));

        let mut settings = settings(true);
        settings.cameras.truncate(1);
        let mut system = system(settings, SyntheticOpener::new(200))
            .with_display(Box::new(CountingDisplay(shown.clone())))
            .with_sink_factory(Box::new(crate::RawSinkFactory { dir: dir.clone() }));
        system.initialize(&failing).unwrap();

        let outcome = step_until(&mut system, Instant::now(), |s| s.report().cameras[0].frames_processed >= 3);
        assert_eq!(outcome, None);
        let processed = system.report().cameras[0].frames_processed;
        assert_eq!(shown.load(Ordering::SeqCst), processed);
        assert!(!system.camera_state("customer").unwrap().person_detected());
        assert_eq!(system.analyzer_statistics()[0].submitted_frames, 0);

        system.cleanup();
        let recorded = std::fs::read(dir.join("customer_32x24.rgb")).unwrap();
        assert_eq!(recorded.len() as u64, processed * 32 * 24 * 3);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_stop_handle_ends_run() {
        let mut system = system(settings(true), SyntheticOpener::new(200));
        system.initialize(&loader(scripted())).unwrap();

        let stop = system.stop_handle();
        assert!(!stop.is_stopped());
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop.stop();
        });

        assert_eq!(system.run(), SessionOutcome::UserExit);
        assert_eq!(system.outcome(), Some(&SessionOutcome::UserExit));
        stopper.join().unwrap();
    }

    #[test]
    fn test_display_quit_ends_session() {
        let mut system = system(settings(true), SyntheticOpener::new(200)).with_display(Box::new(QuitAfter(10)));
        system.initialize(&loader(scripted())).unwrap();
        assert_eq!(system.run(), SessionOutcome::UserExit);
    }

    #[test]
    fn test_run_until_absence_then_report() {
        let classifier = scripted();
        classifier.set(synthetic_fill(CUSTOMER), "Class 2", 1.0);

        let mut settings = settings(true);
        settings.timing.absence_delay_ms = 50;
        let mut system = system(settings, SyntheticOpener::new(200));
        system.initialize(&loader(classifier)).unwrap();

        let outcome = system.run();
        assert_eq!(outcome.exit_code(), 0);
        assert!(matches!(outcome, SessionOutcome::SessionEnd(EndReason::AbsenceConfirmed { .. })));

        system.cleanup();
        system.cleanup();

        let report = system.report();
        assert_eq!(report.session_id, system.session_id());
        assert_eq!(report.outcome, Some(outcome));
        assert!(report.ended_at.is_some());
        assert_eq!(report.cameras.len(), 2);
        assert!(report.cameras[0].frames_processed > 0);
    }

    #[test]
    fn test_step_before_initialize_fails() {
        let mut system = system(settings(true), SyntheticOpener::new(200));
        assert!(matches!(system.step(Instant::now()), Some(SessionOutcome::Failure(_))));
        assert_eq!(SessionOutcome::Failure("x".to_string()).exit_code(), 1);
    }
}
