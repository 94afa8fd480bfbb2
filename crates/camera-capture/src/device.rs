//! Camera device abstraction
//!
//! The capture thread only ever talks to a [`CameraDevice`]; how the device is
//! backed (V4L2/AVFoundation through OpenCV, a synthetic generator in tests) is
//! decided by the [`DeviceOpener`] handed to [`crate::ThreadedCamera::start`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::{CameraConfig, CameraError, VideoFrame};

/// Settings the device actually accepted after configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// A physical (or simulated) camera handle
pub trait CameraDevice: Send {
    /// Apply resolution, frame rate and buffer depth
    fn configure(&mut self, config: &CameraConfig) -> Result<DeviceSettings, CameraError>;

    /// Read the next frame, blocking until the device delivers one
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError>;

    /// Check if the device handle is still open
    fn is_opened(&self) -> bool;

    /// Release the device
    fn release(&mut self);
}

/// Opens camera devices by index
pub trait DeviceOpener: Send + Sync {
    fn open(&self, camera_id: i32) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Fill color used by synthetic camera `camera_id`
pub fn synthetic_fill(camera_id: i32) -> [u8; 3] {
    let base = (camera_id.rem_euclid(6) as u8) * 40 + 20;
    [base, 128, 255 - base]
}

/// Generated-frame camera for tests and demos
pub struct SyntheticCamera {
    camera_id: i32,
    width: u32,
    height: u32,
    frame_interval: Duration,
    opened: bool,
    started: Instant,
    frames_read: u64,
    /// Reads succeed until this many frames were produced, then fail
    fail_after: Option<u64>,
}

impl SyntheticCamera {
    /// Create a synthetic camera producing frames at `fps`
    pub fn new(camera_id: i32, fps: u32) -> Self {
        Self {
            camera_id,
            width: 64,
            height: 48,
            frame_interval: Duration::from_micros(1_000_000 / fps.max(1) as u64),
            opened: true,
            started: Instant::now(),
            frames_read: 0,
            fail_after: None,
        }
    }

    /// Fail every read after `frames` successful ones
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl CameraDevice for SyntheticCamera {
    fn configure(&mut self, config: &CameraConfig) -> Result<DeviceSettings, CameraError> {
        if config.width == 0 || config.height == 0 {
            return Err(CameraError::Format(format!(
                "Unsupported resolution {}x{}",
                config.width, config.height
            )));
        }
        self.width = config.width;
        self.height = config.height;
        Ok(DeviceSettings {
            width: self.width,
            height: self.height,
            fps: 1.0 / self.frame_interval.as_secs_f64(),
        })
    }

    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if !self.opened {
            return Err(CameraError::Read(self.camera_id));
        }

        // Emulate a blocking device read
        std::thread::sleep(self.frame_interval);

        if let Some(limit) = self.fail_after {
            if self.frames_read >= limit {
                return Err(CameraError::Read(self.camera_id));
            }
        }

        self.frames_read += 1;
        let mut frame = VideoFrame::solid(self.width, self.height, synthetic_fill(self.camera_id));
        frame.timestamp_ns = self.started.elapsed().as_nanos() as u64;
        frame.sequence = self.frames_read;
        Ok(frame)
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn release(&mut self) {
        self.opened = false;
    }
}

/// Opener for [`SyntheticCamera`] devices
#[derive(Debug, Default)]
pub struct SyntheticOpener {
    fps: u32,
    /// Number of open calls that fail before one succeeds
    open_failures: AtomicU32,
    /// Camera ids that can never be opened
    missing: Vec<i32>,
    /// Reads fail after this many frames
    fail_after: Option<u64>,
    opens: AtomicU32,
}

impl SyntheticOpener {
    /// Opener producing cameras at `fps`
    pub fn new(fps: u32) -> Self {
        Self {
            fps,
            ..Default::default()
        }
    }

    /// Fail the first `count` open attempts
    pub fn with_open_failures(self, count: u32) -> Self {
        self.open_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Camera ids that are not connected
    pub fn with_missing(mut self, camera_ids: &[i32]) -> Self {
        self.missing = camera_ids.to_vec();
        self
    }

    /// Devices fail every read after `frames` frames
    pub fn with_read_failures_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Total open attempts seen
    pub fn open_attempts(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DeviceOpener for SyntheticOpener {
    fn open(&self, camera_id: i32) -> Result<Box<dyn CameraDevice>, CameraError> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if self.missing.contains(&camera_id) {
            return Err(CameraError::Backend(format!("No device at index {}", camera_id)));
        }

        let failed = self
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(CameraError::Backend(format!("Device {} busy", camera_id)));
        }

        let mut camera = SyntheticCamera::new(camera_id, self.fps.max(1));
        if let Some(frames) = self.fail_after {
            camera = camera.fail_after(frames);
        }
        Ok(Box::new(camera))
    }
}
