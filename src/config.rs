//! Configuration management for avhal
//!
//! Provides configuration loading, saving and validation for hotplug
//! watching, stream defaults, the synthetic backend and logging.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables of the form `AVHAL__<SECTION>__<KEY>`
//! (e.g. `AVHAL__STREAM__DEFAULT_VOLUME=0.5`).

use crate::errors::AvError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AvConfig {
    pub hotplug: HotplugConfig,
    pub stream: StreamConfig,
    pub synthetic: SyntheticConfig,
    pub logging: LoggingConfig,
}

/// Hotplug watch thread configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotplugConfig {
    /// Start the watch thread when the context is created
    pub enabled: bool,
    /// How often the watch thread checks its stop flag, and how often
    /// polling backends rescan devices, in milliseconds
    pub poll_interval_ms: u64,
}

/// Stream session defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Buffer latency applied to new streams, in milliseconds
    pub default_buffer_latency_ms: u32,
    /// Volume applied to new audio streams (0.0-1.0)
    pub default_volume: f32,
}

/// Synthetic backend pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Delay between two generated buffers in milliseconds
    pub buffer_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set (env_logger syntax)
    pub level: String,
}

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 500,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            default_buffer_latency_ms: 20,
            default_volume: 1.0,
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            buffer_interval_ms: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "avhal=info".to_string(),
        }
    }
}

impl AvConfig {
    /// Load configuration from a TOML file, with environment overrides.
    ///
    /// A missing file is not an error: defaults (plus environment) are used.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AvError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
        }

        let layered = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("AVHAL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AvError::invalid_config(format!("Failed to read config: {}", e)))?;

        let config: AvConfig = layered
            .try_deserialize()
            .map_err(|e| AvError::invalid_config(format!("Failed to parse config: {}", e)))?;

        config.validate().map_err(AvError::invalid_config)?;
        log::debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AvError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AvError::invalid_config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| AvError::invalid_config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| AvError::invalid_config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("avhal.toml")
    }

    /// Load from default location, falling back to defaults on error
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.hotplug.poll_interval_ms == 0 || self.hotplug.poll_interval_ms > 60_000 {
            return Err("Hotplug poll interval must be between 1 and 60000 ms".to_string());
        }

        if self.stream.default_buffer_latency_ms == 0 || self.stream.default_buffer_latency_ms > 10_000 {
            return Err("Buffer latency must be between 1 and 10000 ms".to_string());
        }
        if !(0.0..=1.0).contains(&self.stream.default_volume) {
            return Err("Default volume must be between 0.0 and 1.0".to_string());
        }

        if self.synthetic.buffer_interval_ms > 10_000 {
            return Err("Synthetic buffer interval must be at most 10000 ms".to_string());
        }

        if self.logging.level.trim().is_empty() {
            return Err("Logging level must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AvConfig::default();
        assert!(config.hotplug.enabled);
        assert_eq!(config.stream.default_buffer_latency_ms, 20);
        assert_eq!(config.stream.default_volume, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad_latency = AvConfig::default();
        bad_latency.stream.default_buffer_latency_ms = 0;
        assert!(bad_latency.validate().is_err());

        let mut bad_volume = AvConfig::default();
        bad_volume.stream.default_volume = 1.5;
        assert!(bad_volume.validate().is_err());

        let mut bad_poll = AvConfig::default();
        bad_poll.hotplug.poll_interval_ms = 0;
        assert!(bad_poll.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("nested").join("avhal.toml");

        let mut config = AvConfig::default();
        config.stream.default_buffer_latency_ms = 40;
        config.synthetic.buffer_interval_ms = 3;
        config.save_to_file(&config_path).unwrap();

        let loaded = AvConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded.stream.default_buffer_latency_ms, 40);
        assert_eq!(loaded.synthetic.buffer_interval_ms, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("partial.toml");
        fs::write(&config_path, "[hotplug]\nenabled = false\n").unwrap();

        let loaded = AvConfig::load_from_file(&config_path).unwrap();
        assert!(!loaded.hotplug.enabled);
        assert_eq!(loaded.hotplug.poll_interval_ms, 500);
        assert_eq!(loaded.stream, StreamConfig::default());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("bad.toml");
        fs::write(&config_path, "[stream]\ndefault_volume = 4.0\n").unwrap();

        let err = AvConfig::load_from_file(&config_path).unwrap_err();
        assert_eq!(err.kind, crate::errors::AvErrorKind::InvalidConfig);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&AvConfig::default()).unwrap();
        assert!(toml_string.contains("[hotplug]"));
        assert!(toml_string.contains("[stream]"));
        assert!(toml_string.contains("[synthetic]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("default_buffer_latency_ms"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = AvConfig::load_from_file(dir.path().join("missing.toml"));
        assert_eq!(result.unwrap().stream.default_buffer_latency_ms, 20);
    }
}
