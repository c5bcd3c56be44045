//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{KeyrollError, KeyrollResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where exported images land when no output path is given.
    pub exports_dir: PathBuf,

    /// Default export settings.
    #[serde(default)]
    pub export: ExportDefaults,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Pixels per second of song time.
    pub time_resolution: f64,

    /// Width of the bounded render buffer, which is also the image width.
    pub buffer_width: u32,

    /// Height of the bounded render buffer.
    pub buffer_height: u32,

    /// Semitones added to every note key before drawing.
    pub pitch_shift: i32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "keyroll=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exports_dir: default_exports_dir(),
            export: ExportDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            time_resolution: 100.0,
            buffer_width: 1280,
            buffer_height: 720,
            pitch_shift: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl ExportDefaults {
    /// Reject settings the export engine cannot work with.
    pub fn validate(&self) -> KeyrollResult<()> {
        if !(self.time_resolution.is_finite() && self.time_resolution > 0.0) {
            return Err(KeyrollError::config(format!(
                "time_resolution must be a positive number, got {}",
                self.time_resolution
            )));
        }
        if self.buffer_width == 0 || self.buffer_height == 0 {
            return Err(KeyrollError::config(format!(
                "render buffer must be at least 1x1, got {}x{}",
                self.buffer_width, self.buffer_height
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("keyroll").join("config.json")
}

/// Default exports directory.
fn default_exports_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("keyroll").join("exports")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_export_settings_are_valid() {
        let defaults = ExportDefaults::default();
        assert!(defaults.validate().is_ok());
        assert_eq!(defaults.buffer_height, 720);
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let defaults = ExportDefaults {
            buffer_height: 0,
            ..ExportDefaults::default()
        };
        assert!(matches!(
            defaults.validate(),
            Err(KeyrollError::Config { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_positive_resolution() {
        for resolution in [0.0, -5.0, f64::NAN] {
            let defaults = ExportDefaults {
                time_resolution: resolution,
                ..ExportDefaults::default()
            };
            assert!(defaults.validate().is_err());
        }
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{ "exports_dir": "/tmp/out", "export": { "buffer_height": 256 } }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.exports_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.export.buffer_height, 256);
        assert_eq!(config.export.buffer_width, 1280);
        assert_eq!(config.logging.level, "info");
    }
}
