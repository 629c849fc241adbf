//! Model adapters
//!
//! Pose and face inference run through ONNX Runtime. Each adapter hides its
//! network's input layout and output decoding behind [`Detector`]: one RGBA
//! frame in, a list of [`DetectedSubject`]s in frame pixel coordinates out.
//!
//! Frames are letterboxed (scaled to fit, padded bottom/right) into the
//! model's square input so keypoints map back to the frame with a single
//! scale factor.

pub mod face;
pub mod pose;

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use serde::{Deserialize, Serialize};

use crate::error::DetectorError;
use crate::geometry::Point;
use crate::subject::{DetectedSubject, ModelKind};

pub use face::{FaceDetector, FaceDetectorConfig};
pub use pose::{DecodingMethod, PoseDetector, PoseDetectorConfig};

/// A pretrained network wrapped behind the per-frame detection contract
pub trait Detector {
    fn kind(&self) -> ModelKind;

    /// Run the network on one frame. Returned subjects are in frame pixel
    /// coordinates, mirrored horizontally when the adapter is configured to.
    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<DetectedSubject>, DetectorError>;
}

/// Where the models live and how each one is configured
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Models directory; searched for next to the executable and in the
    /// working directory when unset
    pub models_dir: Option<PathBuf>,
    /// Pose model file name inside the models directory
    pub pose_model: String,
    /// Face model file name inside the models directory
    pub face_model: String,
    /// ONNX Runtime intra-op threads per session
    pub intra_threads: usize,
    pub pose: PoseDetectorConfig,
    pub face: FaceDetectorConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: None,
            pose_model: "movenet_multipose.onnx".to_string(),
            face_model: "blazeface.onnx".to_string(),
            intra_threads: 2,
            pose: PoseDetectorConfig::default(),
            face: FaceDetectorConfig::default(),
        }
    }
}

impl ModelsConfig {
    /// Full path of the model file for `kind`
    pub fn model_path(&self, kind: ModelKind) -> Result<PathBuf, DetectorError> {
        let dir = match &self.models_dir {
            Some(dir) => dir.clone(),
            None => find_model_dir()?,
        };
        let file = match kind {
            ModelKind::PoseNet => &self.pose_model,
            ModelKind::BlazeFace => &self.face_model,
        };
        Ok(dir.join(file))
    }
}

/// Load the adapter for `kind`
pub fn create_detector(
    kind: ModelKind,
    config: &ModelsConfig,
) -> Result<Box<dyn Detector>, DetectorError> {
    let path = config.model_path(kind)?;
    tracing::info!(model = kind.name(), path = %path.display(), "Loading model");

    let session = load_session(&path, config.intra_threads)?;
    let detector: Box<dyn Detector> = match kind {
        ModelKind::PoseNet => Box::new(PoseDetector::new(session, config.pose.clone())),
        ModelKind::BlazeFace => Box::new(FaceDetector::new(session, config.face.clone())),
    };
    Ok(detector)
}

/// Build an ONNX Runtime session for the model at `path`
pub fn load_session(path: &Path, intra_threads: usize) -> Result<Session, DetectorError> {
    if !path.exists() {
        return Err(DetectorError::ModelNotFound(path.to_path_buf()));
    }

    let session = Session::builder()
        .map_err(ort_error)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort_error)?
        .with_intra_threads(intra_threads.max(1))
        .map_err(ort_error)?
        .commit_from_file(path)
        .map_err(ort_error)?;

    tracing::debug!(path = %path.display(), "Session ready");
    Ok(session)
}

pub(crate) fn ort_error(e: impl std::fmt::Display) -> DetectorError {
    DetectorError::Runtime(e.to_string())
}

/// Find the models directory
pub fn find_model_dir() -> Result<PathBuf, DetectorError> {
    // Relative to the executable, walking up out of target/<profile>
    if let Ok(exe_path) = std::env::current_exe() {
        for dir in exe_path.ancestors().skip(1).take(3) {
            let model_dir = dir.join("models");
            if model_dir.is_dir() {
                return Ok(model_dir);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let model_dir = cwd.join("models");
        if model_dir.is_dir() {
            return Ok(model_dir);
        }
    }

    Err(DetectorError::ModelDirNotFound)
}

/// Mapping between a frame and the square model input it was fitted into
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Model input side length
    pub size: u32,
    /// Frame pixels to input pixels
    pub scale: f32,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Letterbox {
    pub fn fit(frame_width: u32, frame_height: u32, size: u32) -> Self {
        let longest = frame_width.max(frame_height).max(1);
        Self {
            size,
            scale: size as f32 / longest as f32,
            frame_width,
            frame_height,
        }
    }

    /// Size of the frame once scaled into the input
    pub fn scaled_dims(&self) -> (u32, u32) {
        let w = (self.frame_width as f32 * self.scale).round() as u32;
        let h = (self.frame_height as f32 * self.scale).round() as u32;
        (w.clamp(1, self.size), h.clamp(1, self.size))
    }

    /// Normalized input coordinates to frame pixels
    pub fn to_frame(&self, nx: f32, ny: f32) -> Point {
        let k = self.size as f32 / self.scale;
        Point::new(nx * k, ny * k)
    }

    /// Normalized input length to frame pixels
    pub fn length_to_frame(&self, n: f32) -> f32 {
        n * self.size as f32 / self.scale
    }
}

/// Fit `frame` into a `size`×`size` RGB image, padding with black
pub fn letterbox(frame: &RgbaImage, size: u32) -> Result<(RgbImage, Letterbox), DetectorError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(DetectorError::BadInput(format!(
            "empty frame {}x{}",
            frame.width(),
            frame.height()
        )));
    }

    let fit = Letterbox::fit(frame.width(), frame.height(), size);
    let (w, h) = fit.scaled_dims();
    let scaled = imageops::resize(frame, w, h, FilterType::Triangle);

    let mut input = RgbImage::from_pixel(size, size, Rgb([0, 0, 0]));
    for (x, y, pixel) in scaled.enumerate_pixels() {
        let [r, g, b, _] = pixel.0;
        input.put_pixel(x, y, Rgb([r, g, b]));
    }
    Ok((input, fit))
}

/// NHWC tensor of raw 0..255 values
pub fn to_nhwc<T>(image: &RgbImage, convert: impl Fn(u8) -> T) -> Array4<T>
where
    T: Clone + Default,
{
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut array = Array4::<T>::default((1, h, w, 3));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            array[[0, y as usize, x as usize, c]] = convert(pixel.0[c]);
        }
    }
    array
}

/// Mirror a frame-space point about the vertical center line
pub fn flip_point(point: Point, frame_width: u32) -> Point {
    Point::new(frame_width as f32 - point.x, point.y)
}

/// Index of the first output tensor holding exactly `len` values
pub(crate) fn find_output(outputs: &[Vec<f32>], len: usize) -> Option<usize> {
    outputs.iter().position(|o| o.len() == len)
}
