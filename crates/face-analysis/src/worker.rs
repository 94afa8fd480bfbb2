//! Asynchronous analyzer: frame skipping, bounded queue, worker thread

use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use camera_capture::VideoFrame;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use handoff::{join_with_timeout, JoinOutcome, Mailbox};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::stats::Counters;
use crate::{AnalysisActions, AnalysisError, AnalyzerStats, AttributeSet, Emotion, FaceAnalyzer, Gender};

/// Analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Identifier in logs and results (e.g. "customer")
    pub name: String,
    /// Enqueue one of every `frame_skip` submissions
    pub frame_skip: u32,
    /// Working resolution the frame is downsampled to before analysis
    pub input_width: u32,
    pub input_height: u32,
    /// Pending frame capacity; the oldest frame is evicted when full
    pub queue_depth: usize,
    /// Worker queue poll interval (milliseconds)
    pub poll_interval_ms: u64,
    /// Worker join timeout on drop (milliseconds)
    pub stop_timeout_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            frame_skip: 5,
            input_width: 320,
            input_height: 240,
            queue_depth: 3,
            poll_interval_ms: 100,
            stop_timeout_ms: 2000,
        }
    }
}

/// A frame waiting for analysis
#[derive(Debug, Clone)]
pub struct FrameTask {
    pub frame: VideoFrame,
    /// Classifier label of the frame, carried into the result
    pub class_hint: Option<String>,
    /// Classifier confidence of the frame, carried into the result
    pub confidence_hint: Option<f32>,
    pub actions: AnalysisActions,
    pub enqueued_at: Instant,
}

/// Latest analysis output of one analyzer
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub emotion: Emotion,
    pub emotion_confidence: f32,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub gender_confidence: Option<f32>,
    /// Classifier confidence of the analyzed frame
    pub confidence_score: Option<f32>,
    /// Classifier label of the analyzed frame
    pub class_name: Option<String>,
    pub analyzer_id: String,
    pub produced_at: Instant,
    /// Per-analyzer result counter (1-based, increasing)
    pub sequence: u64,
    /// Sequence of the camera frame that was analyzed
    pub frame_sequence: u64,
    /// Duration of the external call
    pub latency: Duration,
}

impl AnalysisResult {
    /// Attribute view of the result
    pub fn attributes(&self) -> AttributeSet {
        AttributeSet {
            emotion: self.emotion,
            emotion_confidence: self.emotion_confidence,
            age: self.age,
            gender: self.gender,
            gender_confidence: self.gender_confidence,
        }
    }
}

/// What `submit_frame` did with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Dropped by frame skipping
    Skipped,
    Queued,
    /// Queued after evicting the oldest pending frame
    QueuedEvictedOldest,
    /// Queue still full after eviction; frame dropped
    Dropped,
    /// Analyzer not started or already stopped
    NotRunning,
}

impl SubmitOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SubmitOutcome::Queued | SubmitOutcome::QueuedEvictedOldest)
    }
}

/// Everything the worker thread needs
struct WorkerContext {
    name: String,
    analyzer: Arc<dyn FaceAnalyzer>,
    tasks: Receiver<FrameTask>,
    results: Arc<Mailbox<AnalysisResult>>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    next_sequence: Arc<AtomicU64>,
    input_size: (u32, u32),
    poll_interval: Duration,
}

/// Non-blocking producer/consumer wrapper around a [`FaceAnalyzer`].
///
/// The main loop submits frames and polls for the newest result; a worker
/// thread runs the slow call. Submission never blocks: frames are skipped by a
/// counter and the oldest queued frame is evicted when the queue is full.
pub struct AsyncFaceAnalyzer {
    config: AnalyzerConfig,
    analyzer: Arc<dyn FaceAnalyzer>,
    task_tx: Sender<FrameTask>,
    /// Submitter-side handle used to evict the oldest task
    task_rx: Receiver<FrameTask>,
    results: Arc<Mailbox<AnalysisResult>>,
    latest: Option<AnalysisResult>,
    counters: Arc<Counters>,
    running: Arc<AtomicBool>,
    next_sequence: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    /// Submissions seen while running; never reset
    frame_counter: u64,
}

impl AsyncFaceAnalyzer {
    /// Create an analyzer (not started)
    pub fn new(config: AnalyzerConfig, analyzer: Arc<dyn FaceAnalyzer>) -> Self {
        let (task_tx, task_rx) = bounded(config.queue_depth.max(1));
        info!(
            "[{}] Async analyzer created: backend={}, frame_skip={}, input={}x{}, queue_depth={}",
            config.name,
            analyzer.name(),
            config.frame_skip,
            config.input_width,
            config.input_height,
            config.queue_depth
        );

        Self {
            config,
            analyzer,
            task_tx,
            task_rx,
            results: Arc::new(Mailbox::new()),
            latest: None,
            counters: Arc::new(Counters::default()),
            running: Arc::new(AtomicBool::new(false)),
            next_sequence: Arc::new(AtomicU64::new(0)),
            worker: None,
            frame_counter: 0,
        }
    }

    /// Analyzer identifier
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the worker thread. A second call while running is a no-op.
    pub fn start(&mut self) -> Result<(), AnalysisError> {
        if self.is_running() {
            warn!("[{}] Analyzer already running", self.config.name);
            return Ok(());
        }

        let context = WorkerContext {
            name: self.config.name.clone(),
            analyzer: self.analyzer.clone(),
            tasks: self.task_rx.clone(),
            results: self.results.clone(),
            counters: self.counters.clone(),
            running: self.running.clone(),
            next_sequence: self.next_sequence.clone(),
            input_size: (self.config.input_width, self.config.input_height),
            poll_interval: Duration::from_millis(self.config.poll_interval_ms.max(1)),
        };

        self.running.store(true, Ordering::Release);
        let spawned = std::thread::Builder::new()
            .name(format!("analyzer-{}", self.config.name))
            .spawn(move || worker_loop(context));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("[{}] Analysis worker started", self.config.name);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(AnalysisError::Failed(format!("Failed to spawn worker: {}", e)))
            }
        }
    }

    /// Offer a frame for analysis. Never blocks.
    pub fn submit_frame(
        &mut self,
        frame: &VideoFrame,
        class_hint: Option<&str>,
        confidence_hint: Option<f32>,
        actions: AnalysisActions,
    ) -> SubmitOutcome {
        if !self.is_running() {
            return SubmitOutcome::NotRunning;
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.frame_counter += 1;
        if self.frame_counter % self.config.frame_skip.max(1) as u64 != 0 {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Skipped;
        }

        let task = FrameTask {
            frame: frame.clone(),
            class_hint: class_hint.map(str::to_string),
            confidence_hint,
            actions,
            enqueued_at: Instant::now(),
        };

        let task = match self.task_tx.try_send(task) {
            Ok(()) => return SubmitOutcome::Queued,
            Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => task,
        };

        // Full: make room by discarding the oldest pending frame
        if let Ok(evicted) = self.task_rx.try_recv() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                "[{}] Queue full, evicted frame {}",
                self.config.name, evicted.frame.sequence
            );
        }

        match self.task_tx.try_send(task) {
            Ok(()) => SubmitOutcome::QueuedEvictedOldest,
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                SubmitOutcome::Dropped
            }
        }
    }

    /// Newest known result.
    ///
    /// With `Duration::ZERO` this only drains the mailbox; otherwise it waits up
    /// to `timeout` for a new result. Either way the last known result is
    /// returned when nothing new arrived.
    pub fn get_result(&mut self, timeout: Duration) -> Option<AnalysisResult> {
        let fresh = if timeout.is_zero() {
            self.results.take()
        } else {
            self.results.take_timeout(timeout)
        };
        if let Some(result) = fresh {
            self.latest = Some(result);
        }
        self.latest.clone()
    }

    /// Pending frames in the queue
    pub fn queue_len(&self) -> usize {
        self.task_rx.len()
    }

    /// Counter snapshot
    pub fn statistics(&self) -> AnalyzerStats {
        self.counters.snapshot(&self.config.name)
    }

    /// Stop the worker and join it within `timeout`. Idempotent.
    ///
    /// A worker stuck in the external call is abandoned; it exits after the
    /// call returns.
    pub fn stop(&mut self, timeout: Duration) {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.worker.take() else {
            return;
        };

        match join_with_timeout(handle, timeout) {
            JoinOutcome::Finished(()) => info!("[{}] Analysis worker stopped", self.config.name),
            JoinOutcome::Panicked => warn!("[{}] Analysis worker panicked", self.config.name),
            JoinOutcome::TimedOut => {
                warn!("[{}] Worker thread did not stop within {:?}", self.config.name, timeout)
            }
        }

        let stats = self.statistics();
        info!(
            "[{}] Analyses: total={}, failed={}, success_rate={:.1}%, mean_latency={:.1}ms",
            stats.name, stats.total_analyses, stats.failed_analyses, stats.success_rate, stats.mean_latency_ms
        );
    }
}

impl Drop for AsyncFaceAnalyzer {
    fn drop(&mut self) {
        self.stop(Duration::from_millis(self.config.stop_timeout_ms));
    }
}

fn worker_loop(ctx: WorkerContext) {
    debug!("[{}] Analysis worker loop started", ctx.name);

    while ctx.running.load(Ordering::Acquire) {
        let task = match ctx.tasks.recv_timeout(ctx.poll_interval) {
            Ok(task) => task,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            analyze_task(ctx.analyzer.as_ref(), &task, ctx.input_size)
        }));
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(attrs)) => {
                ctx.counters.record_call(latency, false);
                let sequence = ctx.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
                ctx.results.put(AnalysisResult {
                    emotion: attrs.emotion,
                    emotion_confidence: attrs.emotion_confidence,
                    age: attrs.age,
                    gender: attrs.gender,
                    gender_confidence: attrs.gender_confidence,
                    confidence_score: task.confidence_hint,
                    class_name: task.class_hint,
                    analyzer_id: ctx.name.clone(),
                    produced_at: Instant::now(),
                    sequence,
                    frame_sequence: task.frame.sequence,
                    latency,
                });
            }
            Ok(Err(e)) => {
                ctx.counters.record_call(latency, true);
                debug!("[{}] Analysis of frame {} failed: {}", ctx.name, task.frame.sequence, e);
            }
            Err(_) => {
                ctx.counters.record_call(latency, true);
                warn!("[{}] Analysis of frame {} panicked", ctx.name, task.frame.sequence);
            }
        }
    }

    debug!("[{}] Analysis worker loop exited", ctx.name);
}

/// Downsample to the working resolution and run the external call
fn analyze_task(
    analyzer: &dyn FaceAnalyzer,
    task: &FrameTask,
    (width, height): (u32, u32),
) -> Result<AttributeSet, AnalysisError> {
    let frame = if width > 0 && height > 0 {
        let small = task.frame.resize(width, height).ok_or_else(|| {
            AnalysisError::InvalidInput(format!(
                "{}x{} frame with {} bytes",
                task.frame.width,
                task.frame.height,
                task.frame.data.len()
            ))
        })?;
        Cow::Owned(small)
    } else {
        Cow::Borrowed(&task.frame)
    };

    analyzer.analyze(&frame, task.actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockFaceAnalyzer;
    use proptest::prelude::*;

    fn attrs() -> AttributeSet {
        AttributeSet {
            emotion: Emotion::Happy,
            emotion_confidence: 0.8,
            age: Some(35),
            gender: Some(Gender::Woman),
            gender_confidence: Some(96.5),
        }
    }

    fn config(frame_skip: u32, queue_depth: usize) -> AnalyzerConfig {
        AnalyzerConfig {
            name: "test".to_string(),
            frame_skip,
            queue_depth,
            poll_interval_ms: 5,
            stop_timeout_ms: 1000,
            ..Default::default()
        }
    }

    fn frame(sequence: u64) -> VideoFrame {
        let mut frame = VideoFrame::solid(64, 48, [10, 20, 30]);
        frame.sequence = sequence;
        frame
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_not_running_before_start() {
        let mut analyzer = AsyncFaceAnalyzer::new(config(1, 3), Arc::new(MockFaceAnalyzer::new(attrs())));
        assert_eq!(
            analyzer.submit_frame(&frame(1), None, None, AnalysisActions::ALL),
            SubmitOutcome::NotRunning
        );
        assert_eq!(analyzer.statistics().submitted_frames, 0);
    }

    #[test]
    fn test_frame_skip_enqueues_every_nth() {
        let (mock, gate) = MockFaceAnalyzer::new(attrs()).gated();
        let mut analyzer = AsyncFaceAnalyzer::new(config(5, 10), Arc::new(mock));
        analyzer.start().unwrap();

        let outcomes: Vec<SubmitOutcome> = (1..=10)
            .map(|i| analyzer.submit_frame(&frame(i), None, None, AnalysisActions::ALL))
            .collect();

        let queued: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_queued())
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(queued, vec![5, 10]);

        let stats = analyzer.statistics();
        assert_eq!(stats.submitted_frames, 10);
        assert_eq!(stats.skipped_frames, 8);

        gate.open();
    }

    #[test]
    fn test_result_carries_hints_and_downsamples() {
        let mock = Arc::new(MockFaceAnalyzer::new(attrs()));
        let mut analyzer = AsyncFaceAnalyzer::new(config(1, 3), mock.clone());
        analyzer.start().unwrap();

        let big = VideoFrame {
            sequence: 7,
            ..VideoFrame::solid(640, 480, [1, 2, 3])
        };
        analyzer.submit_frame(&big, Some("Class 1"), Some(1.0), AnalysisActions::EMOTION_ONLY);

        let result = analyzer.get_result(Duration::from_secs(5)).unwrap();
        assert_eq!(result.emotion, Emotion::Happy);
        assert_eq!(result.age, None);
        assert_eq!(result.class_name.as_deref(), Some("Class 1"));
        assert_eq!(result.confidence_score, Some(1.0));
        assert_eq!(result.analyzer_id, "test");
        assert_eq!(result.frame_sequence, 7);
        assert_eq!(result.sequence, 1);

        let call = &mock.calls()[0];
        assert_eq!((call.width, call.height), (320, 240));
        assert_eq!(call.actions, AnalysisActions::EMOTION_ONLY);
    }

    #[test]
    fn test_get_result_zero_keeps_latest() {
        let mut analyzer = AsyncFaceAnalyzer::new(config(1, 3), Arc::new(MockFaceAnalyzer::new(attrs())));
        assert!(analyzer.get_result(Duration::ZERO).is_none());

        analyzer.start().unwrap();
        analyzer.submit_frame(&frame(1), None, None, AnalysisActions::ALL);
        wait_until(|| analyzer.get_result(Duration::ZERO).is_some());

        // Mailbox is drained now; the last known result is still returned
        let again = analyzer.get_result(Duration::ZERO).unwrap();
        assert_eq!(again.frame_sequence, 1);

        let start = Instant::now();
        let waited = analyzer.get_result(Duration::from_millis(30)).unwrap();
        assert_eq!(waited.frame_sequence, 1);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_full_queue_evicts_oldest() {
        let (mock, gate) = MockFaceAnalyzer::new(attrs()).gated();
        let mock = Arc::new(mock);
        let mut analyzer = AsyncFaceAnalyzer::new(config(1, 2), mock.clone());
        analyzer.start().unwrap();

        // Park the worker inside the external call
        analyzer.submit_frame(&frame(100), None, None, AnalysisActions::ALL);
        wait_until(|| gate.waiting() == 1);

        let started = Instant::now();
        let outcomes: Vec<SubmitOutcome> = (1..=4)
            .map(|i| analyzer.submit_frame(&frame(i), None, None, AnalysisActions::ALL))
            .collect();
        assert!(started.elapsed() < Duration::from_millis(50));

        assert_eq!(
            outcomes,
            vec![
                SubmitOutcome::Queued,
                SubmitOutcome::Queued,
                SubmitOutcome::QueuedEvictedOldest,
                SubmitOutcome::QueuedEvictedOldest,
            ]
        );
        assert_eq!(analyzer.queue_len(), 2);
        let stats = analyzer.statistics();
        assert_eq!(stats.dropped_frames, 2);
        assert_eq!(stats.failed_analyses, 0);

        gate.open();
        wait_until(|| analyzer.statistics().total_analyses == 3);
        let analyzed: Vec<u64> = mock.calls().iter().map(|c| c.frame_sequence).collect();
        assert_eq!(analyzed, vec![100, 3, 4]);
        assert_eq!(analyzer.get_result(Duration::ZERO).unwrap().frame_sequence, 4);
    }

    #[test]
    fn test_failures_and_panics_are_counted() {
        let mock = MockFaceAnalyzer::new(attrs())
            .with_script(vec![Err(AnalysisError::NoFace)])
            .with_panic_on(2);
        let mut analyzer = AsyncFaceAnalyzer::new(config(1, 3), Arc::new(mock));
        analyzer.start().unwrap();

        for i in 1..=3 {
            analyzer.submit_frame(&frame(i), None, None, AnalysisActions::ALL);
            wait_until(|| analyzer.statistics().total_analyses == i);
        }

        let stats = analyzer.statistics();
        assert_eq!(stats.failed_analyses, 2);
        assert!((stats.success_rate - 100.0 / 3.0).abs() < 1e-6);

        // Worker survived the panic and produced the third result
        let result = analyzer.get_result(Duration::from_secs(1)).unwrap();
        assert_eq!(result.frame_sequence, 3);
        assert!(analyzer.is_running());
    }

    #[test]
    fn test_malformed_frame_is_a_failure() {
        let mut analyzer = AsyncFaceAnalyzer::new(config(1, 3), Arc::new(MockFaceAnalyzer::new(attrs())));
        analyzer.start().unwrap();

        let broken = VideoFrame::new(vec![0; 5], 64, 48, 0, 1);
        analyzer.submit_frame(&broken, None, None, AnalysisActions::ALL);
        wait_until(|| analyzer.statistics().failed_analyses == 1);
        assert!(analyzer.get_result(Duration::ZERO).is_none());
    }

    #[test]
    fn test_stop_abandons_stuck_worker() {
        let (mock, gate) = MockFaceAnalyzer::new(attrs()).gated();
        let mut analyzer = AsyncFaceAnalyzer::new(config(1, 3), Arc::new(mock));
        analyzer.start().unwrap();
        analyzer.submit_frame(&frame(1), None, None, AnalysisActions::ALL);
        wait_until(|| gate.waiting() == 1);

        let started = Instant::now();
        analyzer.stop(Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!analyzer.is_running());
        assert_eq!(
            analyzer.submit_frame(&frame(2), None, None, AnalysisActions::ALL),
            SubmitOutcome::NotRunning
        );

        // Idempotent
        analyzer.stop(Duration::from_millis(50));
        gate.open();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_one_of_every_n_is_enqueued(n in 1u32..8, submissions in 0u64..60) {
            let (mock, gate) = MockFaceAnalyzer::new(attrs()).gated();
            let mut analyzer = AsyncFaceAnalyzer::new(config(n, 64), Arc::new(mock));
            analyzer.start().unwrap();

            let queued = (1..=submissions)
                .filter(|i| analyzer.submit_frame(&frame(*i), None, None, AnalysisActions::ALL).is_queued())
                .count() as u64;

            prop_assert_eq!(queued, submissions / n as u64);
            prop_assert_eq!(analyzer.statistics().skipped_frames, submissions - queued);

            gate.open();
        }
    }
}
