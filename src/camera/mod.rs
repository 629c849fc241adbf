//! Camera capture
//!
//! Frames are captured with nokhwa on a background thread; the render thread
//! picks up the most recent one. Opening the device happens on the capture
//! thread too, and its outcome is sent back so [`CameraCapture::open`] can
//! fail fast when there is no usable camera.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender};
use image::RgbaImage;
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;

use crate::error::CameraError;

/// How long to wait for the driver to open the device
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// One decoded camera frame
#[derive(Clone)]
pub struct CameraFrame {
    pub image: RgbaImage,
    pub frame_number: u64,
    /// When the capture thread decoded the frame
    pub timestamp: Instant,
}

/// Information about an available camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

/// Live camera stream
pub struct CameraCapture {
    latest: Arc<Mutex<Option<Arc<CameraFrame>>>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Resolution the driver actually negotiated
    width: u32,
    height: u32,
    name: String,
    frame_count: Arc<AtomicU64>,
}

/// What the capture thread reports once the device is open
struct Opened {
    width: u32,
    height: u32,
    name: String,
}

impl CameraCapture {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(list) => list
                .iter()
                .enumerate()
                .map(|(idx, info)| CameraInfo {
                    index: idx as u32,
                    name: info.human_name().to_string(),
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    /// Open camera `camera_index`, preferring `width`×`height`, and start
    /// streaming. Fails with [`CameraError::Unavailable`] when the device
    /// cannot be opened.
    pub fn open(camera_index: u32, width: u32, height: u32) -> Result<Self, CameraError> {
        let latest = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));
        let (opened_tx, opened_rx) = crossbeam_channel::bounded(1);

        let latest_clone = latest.clone();
        let running_clone = running.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    camera_index,
                    width,
                    height,
                    opened_tx,
                    latest_clone,
                    running_clone,
                    frame_count_clone,
                );
            })?;

        let opened = match opened_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(opened)) => opened,
            Ok(Err(reason)) => {
                let _ = thread_handle.join();
                return Err(CameraError::Unavailable(reason));
            }
            Err(RecvTimeoutError::Timeout) => {
                running.store(false, Ordering::Release);
                return Err(CameraError::Unavailable(format!(
                    "camera {camera_index} did not open within {}s",
                    OPEN_TIMEOUT.as_secs()
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = thread_handle.join();
                return Err(CameraError::Unavailable(
                    "capture thread exited before opening the camera".to_string(),
                ));
            }
        };

        Ok(Self {
            latest,
            running,
            thread_handle: Some(thread_handle),
            width: opened.width,
            height: opened.height,
            name: opened.name,
            frame_count,
        })
    }

    /// Try the requested resolution first, then whatever the device offers
    fn open_device(camera_index: u32, width: u32, height: u32) -> Result<Camera, String> {
        let index = CameraIndex::Index(camera_index);
        let attempts = [
            RequestedFormatType::HighestResolution(Resolution::new(width, height)),
            RequestedFormatType::AbsoluteHighestResolution,
            RequestedFormatType::None,
        ];

        let mut last_error = String::from("no format attempted");
        for format in attempts {
            let requested = RequestedFormat::new::<RgbAFormat>(format);
            match Camera::new(index.clone(), requested) {
                Ok(camera) => return Ok(camera),
                Err(e) => {
                    tracing::debug!("Camera format rejected: {:?}", e);
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }

    fn capture_thread(
        camera_index: u32,
        width: u32,
        height: u32,
        opened: Sender<Result<Opened, String>>,
        latest: Arc<Mutex<Option<Arc<CameraFrame>>>>,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
    ) {
        tracing::info!(camera_index, "Starting camera capture thread");

        let mut camera = match Self::open_device(camera_index, width, height) {
            Ok(camera) => camera,
            Err(e) => {
                tracing::error!("Failed to open camera {}: {}", camera_index, e);
                let _ = opened.send(Err(e));
                return;
            }
        };

        if let Err(e) = camera.open_stream() {
            tracing::error!("Failed to open camera stream: {:?}", e);
            let _ = opened.send(Err(e.to_string()));
            return;
        }

        let resolution = camera.resolution();
        let name = camera.info().human_name().to_string();
        tracing::info!(
            "Camera opened: {} ({}x{})",
            name,
            resolution.width(),
            resolution.height()
        );
        let _ = opened.send(Ok(Opened {
            width: resolution.width(),
            height: resolution.height(),
            name,
        }));

        while running.load(Ordering::Acquire) {
            let frame = match camera.frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };

            let decoded = match frame.decode_image::<RgbAFormat>() {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::warn!("Failed to decode frame: {:?}", e);
                    continue;
                }
            };

            let (w, h) = (decoded.width(), decoded.height());
            let Some(image) = RgbaImage::from_raw(w, h, decoded.into_raw()) else {
                tracing::warn!("Decoded frame buffer does not match {}x{}", w, h);
                continue;
            };

            let frame_number = frame_count.fetch_add(1, Ordering::Relaxed);
            *latest.lock() = Some(Arc::new(CameraFrame {
                image,
                frame_number,
                timestamp: Instant::now(),
            }));
        }

        if let Err(e) = camera.stop_stream() {
            tracing::debug!("Failed to stop camera stream: {:?}", e);
        }
        tracing::info!("Camera capture thread stopped");
    }

    /// Most recent frame, if one has been captured yet
    pub fn latest_frame(&self) -> Option<Arc<CameraFrame>> {
        self.latest.lock().clone()
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Human readable device name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_unavailable() {
        match CameraCapture::open(u32::MAX, 640, 480) {
            Err(CameraError::Unavailable(reason)) => assert!(!reason.is_empty()),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(camera) => panic!("opened camera '{}'", camera.name()),
        }
    }
}
