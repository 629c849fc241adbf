//! Application configuration
//!
//! Stored as JSON. Every field has a default, so a partial (or absent) file
//! is fine; command line flags override what the file says.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ml::ModelsConfig;
use crate::pipeline::FrameSettings;
use crate::render::{OverlayTarget, PrivacyStyle};
use crate::subject::ModelKind;
use crate::telemetry::LogConfig;

const APP_DIR: &str = "peep-detection";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    /// Requested resolution; the driver may pick another one
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Start with the privacy filter on
    pub enabled: bool,
    pub style: PrivacyStyle,
    pub target: OverlayTarget,
    /// PNG used for the sunglasses overlay; a built-in sprite otherwise
    pub sprite_path: Option<PathBuf>,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            style: PrivacyStyle::default(),
            target: OverlayTarget::default(),
            sprite_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    /// Model loaded at startup
    pub model: ModelKind,
    pub models: ModelsConfig,
    pub privacy: PrivacyConfig,
    pub target_fps: u32,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            model: ModelKind::default(),
            models: ModelsConfig::default(),
            privacy: PrivacyConfig::default(),
            target_fps: 60,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// `<config dir>/peep-detection/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(io_error)
    }

    /// Initial per-frame settings
    pub fn frame_settings(&self) -> FrameSettings {
        FrameSettings {
            privacy_enabled: self.privacy.enabled,
            style: self.privacy.style,
            target: self.privacy.target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.model, ModelKind::PoseNet);
        assert_eq!(config.models.pose.max_detections, 5);
        assert_eq!(config.models.face.max_faces, 10);
        assert!((config.models.face.score_threshold - 0.75).abs() < f32::EPSILON);
        assert!(config.privacy.enabled);
        assert_eq!(config.privacy.style, PrivacyStyle::Sunglasses);
        assert_eq!(config.privacy.target, OverlayTarget::Others);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(config.target_fps, 60);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "model": "blazeface", "privacy": { "style": "red_box" }, "models": { "face": { "max_faces": 3 } } }"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model, ModelKind::BlazeFace);
        assert_eq!(config.privacy.style, PrivacyStyle::RedBox);
        assert!(config.privacy.enabled);
        assert_eq!(config.models.face.max_faces, 3);
        assert!((config.models.face.iou_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.camera.width, 640);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.camera.index = 2;
        config.privacy.target = OverlayTarget::All;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.camera.index, 2);
        assert_eq!(loaded.privacy.target, OverlayTarget::All);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_frame_settings_follow_privacy_config() {
        let mut config = AppConfig::default();
        config.privacy.enabled = false;
        config.privacy.style = PrivacyStyle::EyeLine;
        let settings = config.frame_settings();
        assert!(!settings.privacy_enabled);
        assert_eq!(settings.style, PrivacyStyle::EyeLine);
    }
}
