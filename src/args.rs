use std::path::PathBuf;

use clap::Parser;

use crate::config::AppConfig;
use crate::render::PrivacyStyle;
use crate::subject::ModelKind;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Model to run: posenet or blazeface
    #[arg(short, long)]
    pub model: Option<ModelKind>,

    /// Camera index
    #[arg(short, long)]
    pub camera: Option<u32>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the ONNX models
    #[arg(long)]
    pub models_dir: Option<PathBuf>,

    /// Overlay style: eye-line, red-box or sunglasses
    #[arg(long, value_parser = parse_style)]
    pub style: Option<PrivacyStyle>,

    /// Start with the privacy filter off
    #[arg(long)]
    pub no_privacy: bool,

    /// List available cameras and exit
    #[arg(long)]
    pub list: bool,

    /// Write the effective configuration (file plus flags) back to the
    /// config file and exit
    #[arg(long)]
    pub write_config: bool,
}

fn parse_style(s: &str) -> Result<PrivacyStyle, String> {
    match s.to_ascii_lowercase().replace('_', "-").as_str() {
        "eye-line" | "eyeline" => Ok(PrivacyStyle::EyeLine),
        "red-box" | "redbox" => Ok(PrivacyStyle::RedBox),
        "sunglasses" => Ok(PrivacyStyle::Sunglasses),
        other => Err(format!("unknown style '{other}' (expected eye-line, red-box or sunglasses)")),
    }
}

impl Args {
    /// Apply command line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(index) = self.camera {
            config.camera.index = index;
        }
        if let Some(dir) = &self.models_dir {
            config.models.models_dir = Some(dir.clone());
        }
        if let Some(style) = self.style {
            config.privacy.style = style;
        }
        if self.no_privacy {
            config.privacy.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_and_style() {
        let args = Args::try_parse_from(["peep-detection", "--model", "blazeface", "--style", "red_box"]).unwrap();
        assert_eq!(args.model, Some(ModelKind::BlazeFace));
        assert_eq!(args.style, Some(PrivacyStyle::RedBox));
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        assert!(Args::try_parse_from(["peep-detection", "--model", "yolo"]).is_err());
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let args = Args::try_parse_from(["peep-detection", "-c", "3", "--no-privacy"]).unwrap();
        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config.camera.index, 3);
        assert!(!config.privacy.enabled);
        assert_eq!(config.model, ModelKind::PoseNet);
        assert!(!args.write_config);
    }

    #[test]
    fn test_write_config_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let args = Args::try_parse_from([
            "peep-detection",
            "--write-config",
            "--style",
            "eye-line",
            "--config",
            path.to_str().unwrap(),
        ])
        .unwrap();
        assert!(args.write_config);

        let mut config = AppConfig::load(args.config.as_deref()).unwrap();
        args.apply(&mut config);
        config.save_to(&path).unwrap();

        let written = AppConfig::load_from(&path).unwrap();
        assert_eq!(written.privacy.style, PrivacyStyle::EyeLine);
    }
}
