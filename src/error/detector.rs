// Detector configuration and runtime error types

use crate::error::ErrorCode;
use std::fmt;
use tracing::error;

/// Detector error code constants
///
/// Error code range: 2001-2004
pub struct DetectorErrorCodes;

impl DetectorErrorCodes {
    /// Threshold outside (0, 1]
    pub const INVALID_THRESHOLD: i32 = 2001;

    /// Sensitivity outside (0, 1]
    pub const INVALID_SENSITIVITY: i32 = 2002;

    /// Any other rejected configuration value
    pub const INVALID_CONFIG: i32 = 2003;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 2004;
}

/// Log a detector error with structured context
pub fn log_detector_error(err: &DetectorError, context: &str) {
    error!(
        "Detector error in {}: code={}, component=BlowDetector, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised while configuring or driving the detector
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorError {
    /// Threshold must lie in (0, 1]
    InvalidThreshold { value: f32 },

    /// Sensitivity must lie in (0, 1]
    InvalidSensitivity { value: f32 },

    /// A configuration field was rejected
    InvalidConfig { field: String, reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },
}

impl ErrorCode for DetectorError {
    fn code(&self) -> i32 {
        match self {
            DetectorError::InvalidThreshold { .. } => DetectorErrorCodes::INVALID_THRESHOLD,
            DetectorError::InvalidSensitivity { .. } => DetectorErrorCodes::INVALID_SENSITIVITY,
            DetectorError::InvalidConfig { .. } => DetectorErrorCodes::INVALID_CONFIG,
            DetectorError::LockPoisoned { .. } => DetectorErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            DetectorError::InvalidThreshold { value } => {
                format!("Threshold must be in (0, 1] (got {})", value)
            }
            DetectorError::InvalidSensitivity { value } => {
                format!("Sensitivity must be in (0, 1] (got {})", value)
            }
            DetectorError::InvalidConfig { field, reason } => {
                format!("Invalid config field {}: {}", field, reason)
            }
            DetectorError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
        }
    }
}

impl fmt::Display for DetectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DetectorError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for DetectorError {}

/// Check that a tuning factor lies in (0, 1]
pub(crate) fn check_unit_interval(value: f32) -> bool {
    value.is_finite() && value > 0.0 && value <= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_error_codes() {
        assert_eq!(
            DetectorError::InvalidThreshold { value: 0.0 }.code(),
            DetectorErrorCodes::INVALID_THRESHOLD
        );
        assert_eq!(
            DetectorError::InvalidSensitivity { value: 2.0 }.code(),
            DetectorErrorCodes::INVALID_SENSITIVITY
        );
        assert_eq!(
            DetectorError::InvalidConfig {
                field: "analyser.fft_size".to_string(),
                reason: "test".to_string()
            }
            .code(),
            DetectorErrorCodes::INVALID_CONFIG
        );
        assert_eq!(
            DetectorError::LockPoisoned {
                component: "test".to_string()
            }
            .code(),
            DetectorErrorCodes::LOCK_POISONED
        );
    }

    #[test]
    fn test_detector_error_messages() {
        let err = DetectorError::InvalidThreshold { value: 1.5 };
        assert_eq!(err.message(), "Threshold must be in (0, 1] (got 1.5)");

        let err = DetectorError::InvalidConfig {
            field: "analyser.fft_size".to_string(),
            reason: "must be a power of two".to_string(),
        };
        assert!(err.message().contains("analyser.fft_size"));
    }

    #[test]
    fn test_unit_interval() {
        assert!(check_unit_interval(1.0));
        assert!(check_unit_interval(0.01));
        assert!(!check_unit_interval(0.0));
        assert!(!check_unit_interval(-0.5));
        assert!(!check_unit_interval(1.01));
        assert!(!check_unit_interval(f32::NAN));
    }

    #[test]
    fn test_error_propagation() {
        fn may_fail() -> Result<(), DetectorError> {
            Err(DetectorError::InvalidSensitivity { value: 0.0 })
        }

        fn caller() -> Result<(), DetectorError> {
            may_fail()?;
            Ok(())
        }

        assert!(caller().is_err());
    }
}
