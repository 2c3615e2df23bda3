//! Configuration management for Minstrel
//!
//! This module provides:
//! - The application configuration struct with TOML serialization
//! - Clamping of every value on use
//! - A manager for the main config file with corrupt-file recovery

use crate::domain::audio::{StreamConfig, StreamFormat};
use crate::domain::mixer::DuckingSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};

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

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved output channels
    pub channels: u16,

    /// Audio buffer size in frames
    pub buffer_size: u32,

    /// Spectrum analysis window in samples
    pub fft_size: usize,

    /// Visualization refresh rate
    pub analysis_rate_hz: u32,

    /// Output device index (None = system default)
    pub output_device: Option<usize>,

    pub ducking: DuckingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            buffer_size: 512,
            fft_size: 1024,
            analysis_rate_hz: 20,
            output_device: None,
            ducking: DuckingSettings::default(),
        }
    }
}

impl AppConfig {
    pub const SAMPLE_RATE_RANGE: (u32, u32) = (8_000, 192_000);
    pub const MAX_CHANNELS: u16 = 8;
    pub const BUFFER_SIZE_RANGE: (u32, u32) = (32, 8_192);
    pub const FFT_SIZE_RANGE: (usize, usize) = (64, 16_384);
    pub const ANALYSIS_RATE_RANGE: (u32, u32) = (1, 60);

    /// Copy with every value clamped into its valid range
    ///
    /// The FFT size is also rounded up to a power of two.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        let (sr_min, sr_max) = Self::SAMPLE_RATE_RANGE;
        let (buf_min, buf_max) = Self::BUFFER_SIZE_RANGE;
        let (fft_min, fft_max) = Self::FFT_SIZE_RANGE;
        let (rate_min, rate_max) = Self::ANALYSIS_RATE_RANGE;

        let sanitized = Self {
            sample_rate: self.sample_rate.clamp(sr_min, sr_max),
            channels: self.channels.clamp(1, Self::MAX_CHANNELS),
            buffer_size: self.buffer_size.clamp(buf_min, buf_max),
            fft_size: self.fft_size.clamp(fft_min, fft_max).next_power_of_two(),
            analysis_rate_hz: self.analysis_rate_hz.clamp(rate_min, rate_max),
            output_device: self.output_device,
            ducking: self.ducking.sanitized(),
        };

        if sanitized != *self {
            debug!("Configuration values clamped: {:?}", sanitized);
        }
        sanitized
    }

    /// Format of the master stream
    pub fn stream_format(&self) -> StreamFormat {
        let config = self.sanitized();
        StreamFormat::new(config.sample_rate, config.channels)
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            format: self.stream_format(),
            buffer_size: self.sanitized().buffer_size,
        }
    }

    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }
}

/// Manager for the main config file
///
/// The file lives at `<config dir>/minstrel/config.toml`.
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

    /// Get the default config directory path
    ///
    /// Returns `~/.config/minstrel` on Linux, the platform equivalent
    /// elsewhere.
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("minstrel"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Path a corrupt config file is copied to before falling back
    pub fn backup_path(&self) -> PathBuf {
        self.config_path.with_extension("toml.corrupt")
    }

    /// Load configuration from file
    ///
    /// If the config file doesn't exist, writes and returns the factory
    /// default. If it is corrupt, backs it up and returns the default.
    #[instrument(skip(self))]
    pub async fn load(&self) -> AppConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Config file not found, creating factory default"
            );

            let config = AppConfig::default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default config"
                );
            }
            return config;
        }

        match AppConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load config, using factory default"
                );

                let backup_path = self.backup_path();
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt config"
                    );
                }

                AppConfig::default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &AppConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the config file
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(path = %self.config_path.display(), "Configuration cleared");
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
