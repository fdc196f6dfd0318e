//! Recorder configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (`RecorderConfig::default()`)
//! 2. `config/recorder.toml` (optional)
//! 3. Environment variables prefixed with `FOCUS_RECORDER_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use focus_recorder::config::RecorderConfig;
//!
//! let config = RecorderConfig::load()?;
//! println!("Poll interval: {} ms", config.acquisition.poll_interval_ms);
//! # Ok::<(), focus_recorder::error::RecorderError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::acquisition::AcquisitionSettings;
use crate::error::{AppResult, RecorderError};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/recorder.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition timing and buffering
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Sample source selection
    #[serde(default)]
    pub device: DeviceConfig,
    /// Output settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Acquisition loop and session shutdown settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Delay between device polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Consecutive failed polls tolerated before acquisition fails
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    /// Hand-off queue capacity in poll batches. Nothing drains the queue before
    /// shutdown, so this bounds the session length at the given poll rate.
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
    /// How long to wait for each producer to stop, in milliseconds
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

/// Sample source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Source kind. Only `synthetic` ships with the recorder.
    pub kind: String,
    /// Number of EEG channels
    #[serde(default = "default_eeg_channels")]
    pub eeg_channels: usize,
    /// Number of auxiliary (analog) channels
    #[serde(default = "default_aux_channels")]
    pub aux_channels: usize,
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for session artifacts
    pub output_dir: PathBuf,
    /// Whether to write the JSON session manifest
    #[serde(default = "default_enabled")]
    pub write_manifest: bool,
}

// Default value functions
fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_poll_interval() -> u64 {
    100
}

fn default_retry_budget() -> u32 {
    3
}

fn default_handoff_capacity() -> usize {
    // 10 polls/s * 3600 s * 3 hours
    108_000
}

fn default_stop_timeout() -> u64 {
    2000
}

fn default_eeg_channels() -> usize {
    8
}

fn default_aux_channels() -> usize {
    3
}

fn default_sample_rate() -> f64 {
    250.0
}

fn default_enabled() -> bool {
    true
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Focus Recorder".to_string(),
            log_level: "info".to_string(),
            log_format: default_log_format(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            retry_budget: default_retry_budget(),
            handoff_capacity: default_handoff_capacity(),
            stop_timeout_ms: default_stop_timeout(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: "synthetic".to_string(),
            eeg_channels: default_eeg_channels(),
            aux_channels: default_aux_channels(),
            sample_rate_hz: default_sample_rate(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/misc"),
            write_manifest: default_enabled(),
        }
    }
}

impl AcquisitionConfig {
    /// Loop settings derived from this section.
    pub fn settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry_budget: self.retry_budget,
        }
    }

    /// Producer stop timeout.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl RecorderConfig {
    /// Load configuration from `config/recorder.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix FOCUS_RECORDER_
    /// Example: FOCUS_RECORDER_ACQUISITION__RETRY_BUDGET=5
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file leaves the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RecorderConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("FOCUS_RECORDER_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(RecorderError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.acquisition.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be greater than 0".to_string());
        }
        if self.acquisition.handoff_capacity == 0 {
            return invalid("handoff_capacity must be greater than 0".to_string());
        }
        if self.acquisition.handoff_capacity > tokio::sync::Semaphore::MAX_PERMITS {
            return invalid(format!(
                "handoff_capacity must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            ));
        }

        if self.device.kind != "synthetic" {
            return invalid(format!(
                "Unknown device kind '{}'. Must be one of: synthetic",
                self.device.kind
            ));
        }
        if self.device.eeg_channels == 0 {
            return invalid("eeg_channels must be greater than 0".to_string());
        }
        if self.device.aux_channels == 0 {
            return invalid("aux_channels must be greater than 0".to_string());
        }
        if !self.device.sample_rate_hz.is_finite() || self.device.sample_rate_hz <= 0.0 {
            return invalid(format!(
                "Invalid sample_rate_hz {}. Must be positive and finite",
                self.device.sample_rate_hz
            ));
        }

        Ok(())
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| RecorderError::Serialization(e.to_string()))
    }
}
