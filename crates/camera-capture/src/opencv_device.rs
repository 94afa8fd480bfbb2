//! OpenCV-backed camera devices (V4L2, AVFoundation, DirectShow via `CAP_ANY`)

use std::time::Instant;

use opencv::core::{AlgorithmHint, Mat};
use opencv::prelude::*;
use opencv::{imgproc, videoio};

use crate::device::{CameraDevice, DeviceOpener, DeviceSettings};
use crate::{CameraConfig, CameraError, VideoFrame};

fn backend(e: opencv::Error) -> CameraError {
    CameraError::Backend(e.to_string())
}

/// Camera opened through `cv::VideoCapture`
pub struct OpenCvCamera {
    camera_id: i32,
    capture: videoio::VideoCapture,
    started: Instant,
}

impl OpenCvCamera {
    /// Open device `camera_id` with the default backend
    pub fn open(camera_id: i32) -> Result<Self, CameraError> {
        let capture = videoio::VideoCapture::new(camera_id, videoio::CAP_ANY).map_err(backend)?;
        if !capture.is_opened().map_err(backend)? {
            return Err(CameraError::Backend(format!("Camera {} did not open", camera_id)));
        }
        Ok(Self {
            camera_id,
            capture,
            started: Instant::now(),
        })
    }
}

impl CameraDevice for OpenCvCamera {
    fn configure(&mut self, config: &CameraConfig) -> Result<DeviceSettings, CameraError> {
        // Drivers may ignore any of these; the accepted values are read back below
        let _ = self.capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.width as f64);
        let _ = self.capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.height as f64);
        let _ = self.capture.set(videoio::CAP_PROP_FPS, config.fps as f64);
        let _ = self.capture.set(videoio::CAP_PROP_BUFFERSIZE, config.buffer_size as f64);

        let width = self.capture.get(videoio::CAP_PROP_FRAME_WIDTH).map_err(backend)?;
        let height = self.capture.get(videoio::CAP_PROP_FRAME_HEIGHT).map_err(backend)?;
        let fps = self.capture.get(videoio::CAP_PROP_FPS).unwrap_or(config.fps as f64);

        if width <= 0.0 || height <= 0.0 {
            return Err(CameraError::Format(format!(
                "Camera {} reports resolution {}x{}",
                self.camera_id, width, height
            )));
        }

        Ok(DeviceSettings {
            width: width as u32,
            height: height as u32,
            fps,
        })
    }

    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        let mut bgr = Mat::default();
        if !self.capture.read(&mut bgr).map_err(backend)? || bgr.empty() {
            return Err(CameraError::Read(self.camera_id));
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color(
            &bgr,
            &mut rgb,
            imgproc::COLOR_BGR2RGB,
            0,
            AlgorithmHint::ALGO_HINT_DEFAULT,
        )
        .map_err(backend)?;

        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb.data_bytes().map_err(backend)?.to_vec();
        let frame = VideoFrame::new(data, width, height, self.started.elapsed().as_nanos() as u64, 0);
        if !frame.is_valid() {
            return Err(CameraError::Format(format!(
                "Camera {} delivered a non-contiguous frame",
                self.camera_id
            )));
        }
        Ok(frame)
    }

    fn is_opened(&self) -> bool {
        self.capture.is_opened().unwrap_or(false)
    }

    fn release(&mut self) {
        let _ = self.capture.release();
    }
}

/// Opens [`OpenCvCamera`] devices
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvOpener;

impl DeviceOpener for OpenCvOpener {
    fn open(&self, camera_id: i32) -> Result<Box<dyn CameraDevice>, CameraError> {
        Ok(Box::new(OpenCvCamera::open(camera_id)?))
    }
}
