//! Configuration management for detector tuning
//!
//! This module provides runtime configuration loading from JSON files so the
//! blow heuristic and analyser can be tuned for a given microphone without
//! recompiling. Missing or malformed files fall back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{check_unit_interval, DetectorError};

/// Complete detector configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub analyser: AnalyserConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

/// Blow heuristic tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Base low-band level a blow must exceed, in (0, 1]
    pub threshold: f32,
    /// Multiplier applied to `threshold`, in (0, 1]; lower is more sensitive
    pub sensitivity: f32,
    /// Minimum time between two delivered events
    pub cooldown_ms: u64,
    /// Weight of the newest sample in the progress moving average, in (0, 1]
    pub progress_smoothing: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            sensitivity: 0.7,
            cooldown_ms: 500,
            progress_smoothing: 0.3,
        }
    }
}

/// Spectrum analyser parameters used to turn raw samples into frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    /// FFT window size in samples; frames carry `fft_size / 2` bins
    pub fft_size: usize,
    /// Blend factor between the previous and current magnitude, in [0, 1)
    pub smoothing_time_constant: f32,
    /// Level mapped to byte 0
    pub min_decibels: f32,
    /// Level mapped to byte 255
    pub max_decibels: f32,
    /// Scheduler tick period
    pub tick_interval_ms: u64,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing_time_constant: 0.3,
            min_decibels: -100.0,
            max_decibels: -30.0,
            // ~60 ticks per second, the cadence of a display refresh
            tick_interval_ms: 16,
        }
    }
}

/// Input capture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Size of buffer pool for real-time audio transfer
    pub buffer_pool_size: usize,
    /// Size of each audio buffer in samples
    pub buffer_size: usize,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_pool_size: 32,
            buffer_size: 2048,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or defaults if the file is missing or invalid
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default location
    pub fn load() -> Self {
        Self::load_from_file("assets/blow_config.json")
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !check_unit_interval(self.detection.threshold) {
            return Err(DetectorError::InvalidThreshold {
                value: self.detection.threshold,
            });
        }
        if !check_unit_interval(self.detection.sensitivity) {
            return Err(DetectorError::InvalidSensitivity {
                value: self.detection.sensitivity,
            });
        }
        if !check_unit_interval(self.detection.progress_smoothing) {
            return Err(invalid(
                "detection.progress_smoothing",
                "must be in (0, 1]",
            ));
        }
        if self.analyser.fft_size < 32 || !self.analyser.fft_size.is_power_of_two() {
            return Err(invalid(
                "analyser.fft_size",
                "must be a power of two >= 32",
            ));
        }
        if !(0.0..1.0).contains(&self.analyser.smoothing_time_constant) {
            return Err(invalid(
                "analyser.smoothing_time_constant",
                "must be in [0, 1)",
            ));
        }
        if self.analyser.min_decibels >= self.analyser.max_decibels {
            return Err(invalid(
                "analyser.min_decibels",
                "must be below max_decibels",
            ));
        }
        if self.analyser.tick_interval_ms == 0 {
            return Err(invalid("analyser.tick_interval_ms", "must be > 0"));
        }
        if self.capture.buffer_pool_size == 0 || self.capture.buffer_size == 0 {
            return Err(invalid("capture", "buffer pool dimensions must be > 0"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> DetectorError {
    DetectorError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
