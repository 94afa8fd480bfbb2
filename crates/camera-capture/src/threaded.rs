//! Threaded camera: a capture loop that always exposes the latest frame

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use handoff::{join_with_timeout, JoinOutcome, LatestSlot};
use tracing::{debug, info, warn};

use crate::device::{CameraDevice, DeviceOpener, DeviceSettings};
use crate::{CameraConfig, CameraError, VideoFrame};

/// State shared between the capture thread and readers
struct CaptureShared {
    /// The single frame slot (no queue)
    frame: LatestSlot<VideoFrame>,
    /// Whether the last capture attempt succeeded
    status: AtomicBool,
    /// Capture loop keeps going while set
    running: AtomicBool,
    /// Device handle still open
    device_open: AtomicBool,
    frame_count: AtomicU64,
    read_errors: AtomicU64,
    consecutive_failures: AtomicU32,
}

/// Camera with a dedicated capture thread.
///
/// `read()` never blocks: it copies whatever frame the capture thread published
/// last. Dropping the camera stops the thread.
pub struct ThreadedCamera {
    config: CameraConfig,
    settings: DeviceSettings,
    shared: Arc<CaptureShared>,
    thread: Option<JoinHandle<()>>,
    started_at: Instant,
}

impl ThreadedCamera {
    /// Open, configure and warm up the device, then start the capture thread
    pub fn start(config: CameraConfig, opener: &dyn DeviceOpener) -> Result<Self, CameraError> {
        let camera_id = config.camera_id;
        info!(
            "Starting camera {} ({}x{} @ {}fps, buffer={})",
            camera_id, config.width, config.height, config.fps, config.buffer_size
        );

        let (mut device, settings) = open_with_retry(&config, opener)?;

        debug!("Warming up camera {} ({} frames)", camera_id, config.warmup_frames);
        for _ in 0..config.warmup_frames {
            if let Err(e) = device.read_frame() {
                debug!("Camera {} warm-up read failed: {}", camera_id, e);
            }
        }

        let shared = Arc::new(CaptureShared {
            frame: LatestSlot::new(),
            status: AtomicBool::new(false),
            running: AtomicBool::new(true),
            device_open: AtomicBool::new(true),
            frame_count: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
        });

        let started_at = Instant::now();
        let thread_shared = shared.clone();
        let pacing = config.capture_pacing();
        let thread = std::thread::Builder::new()
            .name(format!("camera-{}", camera_id))
            .spawn(move || capture_loop(device, thread_shared, camera_id, pacing, started_at))
            .map_err(|e| CameraError::Spawn(e.to_string()))?;

        info!("Camera {} ready", camera_id);

        Ok(Self {
            config,
            settings,
            shared,
            thread: Some(thread),
            started_at,
        })
    }

    /// Latest frame (a copy) and whether the last capture attempt succeeded.
    ///
    /// The frame is the most recent successful capture, so it may be older than
    /// the last attempt when the flag is false.
    pub fn read(&self) -> (bool, Option<VideoFrame>) {
        let status = self.shared.status.load(Ordering::Acquire);
        (status, self.shared.frame.latest())
    }

    /// Sequence number of the latest published frame (0 if none yet)
    pub fn latest_sequence(&self) -> u64 {
        self.shared.frame.version()
    }

    /// Check if the capture thread is running on an open device
    pub fn is_opened(&self) -> bool {
        self.thread.is_some()
            && self.shared.running.load(Ordering::Acquire)
            && self.shared.device_open.load(Ordering::Acquire)
    }

    /// Consecutive failed device reads
    pub fn consecutive_failures(&self) -> u32 {
        self.shared.consecutive_failures.load(Ordering::Acquire)
    }

    /// Total frames captured
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Relaxed)
    }

    /// Total failed device reads
    pub fn read_errors(&self) -> u64 {
        self.shared.read_errors.load(Ordering::Relaxed)
    }

    /// Measured capture rate since start
    pub fn fps(&self) -> f64 {
        let frames = self.frame_count();
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if frames == 0 || elapsed <= 0.0 {
            return 0.0;
        }
        frames as f64 / elapsed
    }

    /// Device index
    pub fn camera_id(&self) -> i32 {
        self.config.camera_id
    }

    /// Requested configuration
    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Settings the device accepted
    pub fn settings(&self) -> DeviceSettings {
        self.settings
    }

    /// Stop the capture thread. Idempotent.
    ///
    /// Joins with the configured timeout; a thread stuck in a device read is
    /// logged and left behind.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };

        let camera_id = self.config.camera_id;
        info!("Stopping camera {}...", camera_id);
        self.shared.running.store(false, Ordering::Release);

        let timeout = Duration::from_millis(self.config.stop_timeout_ms);
        match join_with_timeout(handle, timeout) {
            JoinOutcome::Finished(()) => {}
            JoinOutcome::Panicked => warn!("Camera {} capture thread panicked", camera_id),
            JoinOutcome::TimedOut => {
                warn!("Camera {} capture thread did not stop within {:?}", camera_id, timeout)
            }
        }

        info!(
            "Camera {} stopped: total_frames={}, read_errors={}, avg_fps={:.1}",
            camera_id,
            self.frame_count(),
            self.read_errors(),
            self.fps()
        );
    }
}

impl Drop for ThreadedCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the device, retrying with a fixed delay, and apply the configuration
fn open_with_retry(
    config: &CameraConfig,
    opener: &dyn DeviceOpener,
) -> Result<(Box<dyn CameraDevice>, DeviceSettings), CameraError> {
    let camera_id = config.camera_id;
    let attempts = config.open_retries.max(1);
    let mut reason = String::from("no attempt made");

    for attempt in 1..=attempts {
        info!("Opening camera {} (attempt {}/{})", camera_id, attempt, attempts);

        match opener.open(camera_id) {
            Ok(mut device) if device.is_opened() => match device.configure(config) {
                Ok(settings) => {
                    info!(
                        "Camera {} opened: {}x{} @ {:.1}fps",
                        camera_id, settings.width, settings.height, settings.fps
                    );
                    return Ok((device, settings));
                }
                Err(e) => {
                    warn!("Camera {} configuration failed: {}", camera_id, e);
                    device.release();
                    reason = e.to_string();
                }
            },
            Ok(_) => {
                warn!("Camera {} reported closed after open", camera_id);
                reason = "device reported closed".to_string();
            }
            Err(e) => {
                warn!("Error opening camera {} (attempt {}/{}): {}", camera_id, attempt, attempts, e);
                reason = e.to_string();
            }
        }

        if attempt < attempts {
            std::thread::sleep(Duration::from_millis(config.retry_delay_ms));
        }
    }

    Err(CameraError::Open {
        camera_id,
        attempts,
        reason,
    })
}

/// Capture thread body: read, publish, pace, repeat
fn capture_loop(
    mut device: Box<dyn CameraDevice>,
    shared: Arc<CaptureShared>,
    camera_id: i32,
    pacing: Duration,
    started_at: Instant,
) {
    info!("Camera {} capture thread running", camera_id);

    while shared.running.load(Ordering::Acquire) {
        let result = if device.is_opened() {
            device.read_frame()
        } else {
            shared.device_open.store(false, Ordering::Release);
            Err(CameraError::Read(camera_id))
        };

        match result {
            Ok(mut frame) => {
                let sequence = shared.frame_count.fetch_add(1, Ordering::Relaxed) + 1;
                frame.sequence = sequence;
                if frame.timestamp_ns == 0 {
                    frame.timestamp_ns = started_at.elapsed().as_nanos() as u64;
                }
                shared.frame.publish(frame);
                shared.consecutive_failures.store(0, Ordering::Release);
                shared.status.store(true, Ordering::Release);
            }
            Err(e) => {
                shared.read_errors.fetch_add(1, Ordering::Relaxed);
                let failures = shared.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                shared.status.store(false, Ordering::Release);
                if failures == 1 || failures % 100 == 0 {
                    warn!("Camera {} read error ({} consecutive): {}", camera_id, failures, e);
                }
            }
        }

        std::thread::sleep(pacing);
    }

    device.release();
    shared.device_open.store(false, Ordering::Release);
    info!("Camera {} capture thread stopped", camera_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{synthetic_fill, SyntheticOpener};

    fn fast_config(camera_id: i32) -> CameraConfig {
        CameraConfig {
            camera_id,
            width: 32,
            height: 24,
            fps: 200,
            warmup_frames: 2,
            retry_delay_ms: 5,
            stop_timeout_ms: 1000,
            ..Default::default()
        }
    }

    fn wait_for_frame(camera: &ThreadedCamera) -> VideoFrame {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let (_, Some(frame)) = camera.read() {
                return frame;
            }
            assert!(Instant::now() < deadline, "no frame captured");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_start_and_read_latest_frame() {
        let opener = SyntheticOpener::new(200);
        let mut camera = ThreadedCamera::start(fast_config(0), &opener).unwrap();
        assert!(camera.is_opened());

        let frame = wait_for_frame(&camera);
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(frame.get_pixel(0, 0), Some(synthetic_fill(0)));
        assert!(frame.sequence >= 1);

        camera.stop();
        assert!(!camera.is_opened());
    }

    #[test]
    fn test_read_never_goes_backwards() {
        let opener = SyntheticOpener::new(500);
        let camera = ThreadedCamera::start(fast_config(0), &opener).unwrap();
        wait_for_frame(&camera);

        let mut last = 0;
        for _ in 0..200 {
            let (_, frame) = camera.read();
            let sequence = frame.map(|f| f.sequence).unwrap_or(0);
            assert!(sequence >= last);
            assert!(camera.latest_sequence() >= sequence);
            last = sequence;
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    #[test]
    fn test_read_is_non_blocking() {
        // 2 fps device: a blocking read would take ~500ms
        let opener = SyntheticOpener::new(2);
        let mut config = fast_config(0);
        config.warmup_frames = 0;
        let camera = ThreadedCamera::start(config, &opener).unwrap();

        let start = Instant::now();
        for _ in 0..100 {
            let _ = camera.read();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_open_retries_then_succeeds() {
        let opener = SyntheticOpener::new(200).with_open_failures(2);
        let camera = ThreadedCamera::start(fast_config(0), &opener).unwrap();
        assert_eq!(opener.open_attempts(), 3);
        assert!(camera.is_opened());
    }

    #[test]
    fn test_open_retries_exhausted() {
        let opener = SyntheticOpener::new(200).with_open_failures(10);
        let result = ThreadedCamera::start(fast_config(3), &opener);

        match result {
            Err(CameraError::Open {
                camera_id,
                attempts,
                ..
            }) => {
                assert_eq!(camera_id, 3);
                assert_eq!(attempts, 3);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("camera should not open"),
        }
        assert_eq!(opener.open_attempts(), 3);
    }

    #[test]
    fn test_invalid_resolution_is_open_error() {
        let opener = SyntheticOpener::new(200);
        let mut config = fast_config(0);
        config.width = 0;
        assert!(matches!(
            ThreadedCamera::start(config, &opener),
            Err(CameraError::Open { .. })
        ));
    }

    #[test]
    fn test_read_failures_are_counted() {
        // Warm-up consumes 2 frames, capture gets 1, then every read fails
        let opener = SyntheticOpener::new(500).with_read_failures_after(3);
        let camera = ThreadedCamera::start(fast_config(0), &opener).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while camera.consecutive_failures() < 3 {
            assert!(Instant::now() < deadline, "failures not reported");
            std::thread::sleep(Duration::from_millis(2));
        }

        let (status, frame) = camera.read();
        assert!(!status);
        // Last good frame is still exposed
        assert_eq!(frame.map(|f| f.sequence), Some(1));
        assert!(camera.read_errors() >= 3);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let opener = SyntheticOpener::new(200);
        let mut camera = ThreadedCamera::start(fast_config(0), &opener).unwrap();
        camera.stop();
        camera.stop();
        assert!(!camera.is_opened());
    }
}
