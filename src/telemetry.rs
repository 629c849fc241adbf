//! Logging configuration and initialization
//!
//! Structured logging with tracing: compact console output for development,
//! JSON for log aggregation, and an optional non-blocking log file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::error::AppError;

/// Environment variable holding the log filter (e.g. "debug", "info,peep_detection=trace")
pub const LOG_ENV: &str = "PEEP_LOG";
/// Environment variable selecting the output format ("json" or anything else)
pub const LOG_FORMAT_ENV: &str = "PEEP_LOG_FORMAT";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Enable console output
    pub console_enabled: bool,
    /// Also write logs to `file_path`
    pub file_enabled: bool,
    /// Log file location (defaults to `peep_detection.log` in the working directory)
    pub file_path: Option<PathBuf>,
    /// Use JSON format on the console
    pub json_format: bool,
    /// Default filter when neither `PEEP_LOG` nor `RUST_LOG` is set
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            file_path: None,
            json_format: false,
            default_level: "info,wgpu_core=warn,wgpu_hal=warn,naga=warn".to_string(),
        }
    }
}

impl LogConfig {
    /// Resolve whether JSON output is requested, honoring `PEEP_LOG_FORMAT`
    fn use_json(&self) -> bool {
        std::env::var(LOG_FORMAT_ENV)
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(self.json_format)
    }

    fn log_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("peep_detection.log"))
    }
}

/// Initialize the global subscriber.
///
/// The returned guard flushes the log file on drop; keep it alive for the
/// lifetime of the program.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, AppError> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let use_json = config.use_json();
    let subscriber = tracing_subscriber::registry().with(env_filter);
    let mut file_guard = None;

    if config.file_enabled {
        let log_path = config.log_path();
        let file = std::fs::File::create(&log_path)
            .map_err(|e| AppError::Logging(format!("{}: {}", log_path.display(), e)))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);

        let console_layer = config
            .console_enabled
            .then(|| fmt::layer().with_target(true).compact());

        subscriber
            .with(file_layer)
            .with(console_layer)
            .try_init()
            .map_err(|e| AppError::Logging(e.to_string()))?;
    } else if config.console_enabled && use_json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
            .map_err(|e| AppError::Logging(e.to_string()))?;
    } else if config.console_enabled {
        subscriber
            .with(fmt::layer().with_target(true).compact())
            .try_init()
            .map_err(|e| AppError::Logging(e.to_string()))?;
    } else {
        subscriber
            .try_init()
            .map_err(|e| AppError::Logging(e.to_string()))?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        json_format = use_json,
        file_enabled = config.file_enabled,
        "Logging initialized"
    );

    Ok(file_guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert!(config.console_enabled);
        assert!(!config.file_enabled);
        assert!(!config.json_format);
        assert!(config.default_level.starts_with("info"));
        assert_eq!(config.log_path(), PathBuf::from("peep_detection.log"));
    }

    #[test]
    fn test_log_config_partial_json() {
        let config: LogConfig = serde_json::from_str(r#"{ "file_enabled": true }"#).unwrap();
        assert!(config.file_enabled);
        assert!(config.console_enabled);
    }
}
