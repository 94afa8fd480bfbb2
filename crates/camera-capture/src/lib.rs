//! Camera Capture Library
//!
//! Non-blocking camera capture for the emotion session pipeline:
//! - A dedicated capture thread per camera publishing only the latest frame
//! - Open with bounded retries, device configuration and warm-up
//! - Background initialization so several cameras open while models load
//! - Pluggable devices: synthetic (tests, demos) and OpenCV (feature `opencv`)

pub mod device;
pub mod frame;
pub mod initializer;
#[cfg(feature = "opencv")]
pub mod opencv_device;
pub mod threaded;

pub use device::{synthetic_fill, CameraDevice, DeviceOpener, DeviceSettings, SyntheticCamera, SyntheticOpener};
pub use frame::VideoFrame;
pub use initializer::AsyncCameraInitializer;
pub use threaded::ThreadedCamera;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera {camera_id} after {attempts} attempts: {reason}")]
    Open {
        camera_id: i32,
        attempts: u32,
        reason: String,
    },

    #[error("Failed to read frame from camera {0}")]
    Read(i32),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Camera {camera_id} initialization timed out after {waited_ms}ms")]
    InitTimeout { camera_id: i32, waited_ms: u64 },

    #[error("Failed to spawn capture thread: {0}")]
    Spawn(String),

    #[error("Camera backend error: {0}")]
    Backend(String),
}

impl CameraError {
    /// Camera the error refers to, when known
    pub fn camera_id(&self) -> Option<i32> {
        match self {
            CameraError::Open { camera_id, .. } | CameraError::InitTimeout { camera_id, .. } => {
                Some(*camera_id)
            }
            CameraError::Read(id) => Some(*id),
            _ => None,
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index (0 = first camera)
    pub camera_id: i32,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Device-side buffer depth; kept small so stale frames never pile up
    pub buffer_size: u32,
    /// Frames read and discarded after opening (auto-exposure settle)
    pub warmup_frames: u32,
    /// Open attempts before giving up
    pub open_retries: u32,
    /// Delay between open attempts (milliseconds)
    pub retry_delay_ms: u64,
    /// Capture thread join timeout on stop (milliseconds)
    pub stop_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            camera_id: 0,
            width: 640,
            height: 480,
            fps: 30,
            buffer_size: 2,
            warmup_frames: 5,
            open_retries: 3,
            retry_delay_ms: 1000,
            stop_timeout_ms: 2000,
        }
    }
}

impl CameraConfig {
    /// Default configuration for a given device index
    pub fn for_camera(camera_id: i32) -> Self {
        Self {
            camera_id,
            ..Default::default()
        }
    }

    /// Interval between capture-loop iterations: slightly faster than the target FPS
    pub fn capture_pacing(&self) -> std::time::Duration {
        let fps = self.fps.max(1) as u64;
        std::time::Duration::from_micros(1_000_000 / (fps * 2))
    }
}
