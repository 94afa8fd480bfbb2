//! Background camera initialization
//!
//! Opening a camera (retries, configuration, warm-up) can take seconds. The
//! initializer runs [`ThreadedCamera::start`] on a worker thread so the caller
//! can load models or open other cameras meanwhile.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use tracing::{info, warn};

use crate::device::DeviceOpener;
use crate::{CameraConfig, CameraError, ThreadedCamera};

/// Opens a [`ThreadedCamera`] on a background thread
pub struct AsyncCameraInitializer {
    camera_id: i32,
    result_rx: Receiver<Result<ThreadedCamera, CameraError>>,
    /// Result received by `is_ready` but not yet handed out
    ready: Option<Result<ThreadedCamera, CameraError>>,
    worker: Option<JoinHandle<()>>,
    started_at: Instant,
}

impl AsyncCameraInitializer {
    /// Start opening the camera in the background
    pub fn start_opening(
        config: CameraConfig,
        opener: Arc<dyn DeviceOpener>,
    ) -> Result<Self, CameraError> {
        let camera_id = config.camera_id;
        let (result_tx, result_rx) = bounded(1);

        info!("Opening camera {} in background", camera_id);
        let worker = std::thread::Builder::new()
            .name(format!("camera-init-{}", camera_id))
            .spawn(move || {
                let result = ThreadedCamera::start(config, opener.as_ref());
                if let Err(e) = &result {
                    warn!("Background open of camera {} failed: {}", camera_id, e);
                }
                // Receiver gone means the caller gave up; the camera drops and stops here
                let _ = result_tx.send(result);
            })
            .map_err(|e| CameraError::Spawn(e.to_string()))?;

        Ok(Self {
            camera_id,
            result_rx,
            ready: None,
            worker: Some(worker),
            started_at: Instant::now(),
        })
    }

    /// Device index being opened
    pub fn camera_id(&self) -> i32 {
        self.camera_id
    }

    /// Non-blocking check whether initialization finished (successfully or not)
    pub fn is_ready(&mut self) -> bool {
        if self.ready.is_some() {
            return true;
        }
        match self.result_rx.try_recv() {
            Ok(result) => {
                self.ready = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                self.ready = Some(Err(CameraError::Backend(format!(
                    "Initializer for camera {} exited without a result",
                    self.camera_id
                ))));
                true
            }
        }
    }

    /// Wait for the camera, up to `timeout`.
    ///
    /// On timeout the worker is abandoned; if it later opens the camera, the
    /// camera is stopped and released when the worker's send fails.
    pub fn wait_for_camera(mut self, timeout: Duration) -> Result<ThreadedCamera, CameraError> {
        let result = match self.ready.take() {
            Some(result) => result,
            None => match self.result_rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Camera {} initialization timed out after {:?}", self.camera_id, timeout);
                    return Err(CameraError::InitTimeout {
                        camera_id: self.camera_id,
                        waited_ms: self.started_at.elapsed().as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => Err(CameraError::Backend(format!(
                    "Initializer for camera {} exited without a result",
                    self.camera_id
                ))),
            },
        };

        // The worker has sent (or died), so this join returns promptly
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }

        if result.is_ok() {
            info!(
                "Camera {} initialized in {:?}",
                self.camera_id,
                self.started_at.elapsed()
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SyntheticOpener;

    fn fast_config(camera_id: i32) -> CameraConfig {
        CameraConfig {
            camera_id,
            width: 32,
            height: 24,
            fps: 200,
            warmup_frames: 1,
            retry_delay_ms: 5,
            stop_timeout_ms: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn test_background_open_succeeds() {
        let opener: Arc<dyn DeviceOpener> = Arc::new(SyntheticOpener::new(200));
        let init = AsyncCameraInitializer::start_opening(fast_config(0), opener).unwrap();
        assert_eq!(init.camera_id(), 0);

        let camera = init.wait_for_camera(Duration::from_secs(5)).unwrap();
        assert!(camera.is_opened());
        assert_eq!(camera.camera_id(), 0);
    }

    #[test]
    fn test_is_ready_then_wait() {
        let opener: Arc<dyn DeviceOpener> = Arc::new(SyntheticOpener::new(200));
        let mut init = AsyncCameraInitializer::start_opening(fast_config(1), opener).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !init.is_ready() {
            assert!(Instant::now() < deadline, "initializer never became ready");
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(init.is_ready());

        let camera = init.wait_for_camera(Duration::from_millis(1)).unwrap();
        assert!(camera.is_opened());
    }

    #[test]
    fn test_background_open_failure_is_reported() {
        let opener: Arc<dyn DeviceOpener> = Arc::new(SyntheticOpener::new(200).with_missing(&[2]));
        let init = AsyncCameraInitializer::start_opening(fast_config(2), opener).unwrap();

        match init.wait_for_camera(Duration::from_secs(5)) {
            Err(CameraError::Open { camera_id, .. }) => assert_eq!(camera_id, 2),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("missing camera opened"),
        }
    }

    #[test]
    fn test_wait_times_out() {
        // Every attempt fails and retries sleep 200ms, so the result takes ~400ms
        let opener: Arc<dyn DeviceOpener> = Arc::new(SyntheticOpener::new(200).with_open_failures(10));
        let mut config = fast_config(0);
        config.retry_delay_ms = 200;
        let init = AsyncCameraInitializer::start_opening(config, opener).unwrap();

        let result = init.wait_for_camera(Duration::from_millis(20));
        assert!(matches!(
            result,
            Err(CameraError::InitTimeout { camera_id: 0, .. })
        ));
    }
}
