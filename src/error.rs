//! Error types
//!
//! Startup failures (camera, models, configuration) are fatal and reported
//! to the user. Per-frame detector failures are logged by the frame loop
//! and the frame is drawn without overlays.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while acquiring the camera stream.
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("this device does not have a usable camera, or access was denied: {0}")]
    Unavailable(String),
    #[error("Failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Errors raised by a model adapter.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("Models directory not found. Create a 'models' directory with ONNX models.")]
    ModelDirNotFound,
    #[error("ONNX Runtime error: {0}")]
    Runtime(String),
    #[error("Unexpected model output: {0}")]
    BadOutput(String),
    #[error("Invalid input frame: {0}")]
    BadInput(String),
}

/// Errors raised while loading or saving the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level startup error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
    #[error("Graphics initialization failed: {0}")]
    Graphics(String),
}
