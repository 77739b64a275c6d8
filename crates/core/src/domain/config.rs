//! Configuration management for Forge
//!
//! This module provides:
//! - Engine settings (rate, block size, smoothing, metering window)
//! - Output device selection
//! - TOML load/save and a manager for `~/.config/forge/config.toml`
//!
//! Only the engine is configured here. Mastering parameters are session
//! state and are never written to disk.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Render engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine sample rate; sources are resampled to it on load
    pub sample_rate: u32,

    /// Maximum frames rendered per chain pass
    pub block_size: usize,

    /// Parameter glide time constant in milliseconds
    pub smoothing_time_constant_ms: f32,

    /// Metering window (samples, power of two)
    pub analysis_window: usize,

    /// Lowest level the visual meter reports
    pub meter_floor_db: f32,

    /// Fixed seed for the noise textures (None = random per session)
    pub noise_seed: Option<u64>,

    /// Slack when deciding that playback reached the end of the source
    pub end_tolerance_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 512,
            smoothing_time_constant_ms: 50.0,
            analysis_window: 2048,
            meter_floor_db: -60.0,
            noise_seed: None,
            end_tolerance_secs: 0.1,
        }
    }
}

impl EngineConfig {
    /// Smoothing time constant in seconds
    pub fn time_constant_secs(&self) -> f32 {
        self.smoothing_time_constant_ms / 1000.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".to_string()));
        }
        if self.block_size == 0 {
            return Err(ConfigError::Invalid("block_size must be non-zero".to_string()));
        }
        if !self.analysis_window.is_power_of_two() || self.analysis_window < 32 {
            return Err(ConfigError::Invalid(format!(
                "analysis_window must be a power of two >= 32, got {}",
                self.analysis_window
            )));
        }
        if self.smoothing_time_constant_ms.is_nan() || self.smoothing_time_constant_ms < 0.0 {
            return Err(ConfigError::Invalid(
                "smoothing_time_constant_ms must be >= 0".to_string(),
            ));
        }
        if self.end_tolerance_secs < 0.0 {
            return Err(ConfigError::Invalid("end_tolerance_secs must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// Audio device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioDeviceConfig {
    /// Output device name (empty = use default)
    #[serde(default)]
    pub output_device: String,
}

/// Complete Forge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ForgeConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub audio: AudioDeviceConfig,
}

impl ForgeConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.engine.validate()?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }
}

/// Manager for the main config file at `~/.config/forge/config.toml`
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("config.toml");
        Self {
            config_dir,
            config_path,
        }
    }

    /// Default config directory
    ///
    /// Returns `~/.config/forge` on Linux, the platform equivalent elsewhere.
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("forge"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// A missing file yields defaults. A corrupt or invalid file is copied to
    /// `config.toml.corrupt` and defaults are used.
    #[instrument(skip(self))]
    pub async fn load(&self) -> ForgeConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, using defaults"
            );
            return ForgeConfig::default();
        }

        match ForgeConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using defaults"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                ForgeConfig::default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &ForgeConfig) -> Result<()> {
        config.engine.validate()?;
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
