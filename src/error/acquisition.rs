// Acquisition error types and constants

use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Acquisition error code constants
///
/// Single source of truth for the codes reported by [`AcquisitionError`].
///
/// Error code range: 1001-1006
pub struct AcquisitionErrorCodes;

impl AcquisitionErrorCodes {
    /// Capture attempted outside a trusted context
    pub const INSECURE_CONTEXT: i32 = 1001;

    /// Platform exposes no input capture capability
    pub const UNSUPPORTED_PLATFORM: i32 = 1002;

    /// User or platform refused microphone access
    pub const PERMISSION_DENIED: i32 = 1003;

    /// No input device present
    pub const DEVICE_NOT_FOUND: i32 = 1004;

    /// Input device held by another application
    pub const DEVICE_BUSY: i32 = 1005;

    /// Any other refusal, carrying the platform's raw reason
    pub const UNKNOWN: i32 = 1006;
}

/// Log an acquisition error with structured context
///
/// Emits error_code, component and message fields so failures can be
/// filtered out of the detector's log stream. Never panics.
pub fn log_acquisition_error(err: &AcquisitionError, context: &str) {
    error!(
        "Acquisition error in {}: code={}, component=CapabilityGate, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Failures raised while acquiring the input device
///
/// Every variant leaves the detector idle (`is_listening`, `has_permission`
/// and `is_loading` all false) and is published through `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AcquisitionError {
    /// Capture requested from an untrusted context; no prompt was shown
    InsecureContext { origin: String },

    /// No capture capability at all
    UnsupportedPlatform,

    /// Access refused; only an out-of-band permission reset recovers
    PermissionDenied,

    /// No matching input device
    DeviceNotFound,

    /// Device exists but could not be opened
    DeviceBusy,

    /// Catch-all with the platform's reason string
    Unknown { reason: String },
}

impl AcquisitionError {
    /// Whether a later `start()` can succeed once the underlying condition
    /// changes, without the user resetting permissions or switching context.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AcquisitionError::DeviceNotFound
                | AcquisitionError::DeviceBusy
                | AcquisitionError::Unknown { .. }
        )
    }

    /// Whether the failure is tied to the environment itself.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AcquisitionError::InsecureContext { .. } | AcquisitionError::UnsupportedPlatform
        )
    }
}

impl ErrorCode for AcquisitionError {
    fn code(&self) -> i32 {
        match self {
            AcquisitionError::InsecureContext { .. } => AcquisitionErrorCodes::INSECURE_CONTEXT,
            AcquisitionError::UnsupportedPlatform => AcquisitionErrorCodes::UNSUPPORTED_PLATFORM,
            AcquisitionError::PermissionDenied => AcquisitionErrorCodes::PERMISSION_DENIED,
            AcquisitionError::DeviceNotFound => AcquisitionErrorCodes::DEVICE_NOT_FOUND,
            AcquisitionError::DeviceBusy => AcquisitionErrorCodes::DEVICE_BUSY,
            AcquisitionError::Unknown { .. } => AcquisitionErrorCodes::UNKNOWN,
        }
    }

    fn message(&self) -> String {
        match self {
            AcquisitionError::InsecureContext { origin } => format!(
                "Microphone capture requires a secure context (HTTPS or localhost); current origin is {}",
                origin
            ),
            AcquisitionError::UnsupportedPlatform => {
                "This platform does not support microphone capture".to_string()
            }
            AcquisitionError::PermissionDenied => {
                "Microphone permission denied. Re-enable access in the system or browser settings and restart."
                    .to_string()
            }
            AcquisitionError::DeviceNotFound => {
                "No microphone found. Check that an input device is connected.".to_string()
            }
            AcquisitionError::DeviceBusy => {
                "Microphone is in use by another application".to_string()
            }
            AcquisitionError::Unknown { reason } => {
                format!("Unknown error while acquiring microphone: {}", reason)
            }
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AcquisitionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AcquisitionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_error_codes() {
        assert_eq!(
            AcquisitionError::InsecureContext {
                origin: "http://192.168.1.4".to_string()
            }
            .code(),
            AcquisitionErrorCodes::INSECURE_CONTEXT
        );
        assert_eq!(
            AcquisitionError::UnsupportedPlatform.code(),
            AcquisitionErrorCodes::UNSUPPORTED_PLATFORM
        );
        assert_eq!(
            AcquisitionError::PermissionDenied.code(),
            AcquisitionErrorCodes::PERMISSION_DENIED
        );
        assert_eq!(
            AcquisitionError::DeviceNotFound.code(),
            AcquisitionErrorCodes::DEVICE_NOT_FOUND
        );
        assert_eq!(
            AcquisitionError::DeviceBusy.code(),
            AcquisitionErrorCodes::DEVICE_BUSY
        );
        assert_eq!(
            AcquisitionError::Unknown {
                reason: "test".to_string()
            }
            .code(),
            AcquisitionErrorCodes::UNKNOWN
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(AcquisitionError::DeviceBusy.is_retryable());
        assert!(AcquisitionError::DeviceNotFound.is_retryable());
        assert!(!AcquisitionError::PermissionDenied.is_retryable());
        assert!(!AcquisitionError::UnsupportedPlatform.is_retryable());

        assert!(AcquisitionError::UnsupportedPlatform.is_fatal());
        assert!(AcquisitionError::InsecureContext {
            origin: String::new()
        }
        .is_fatal());
        assert!(!AcquisitionError::DeviceBusy.is_fatal());
    }

    #[test]
    fn test_messages_carry_details() {
        let err = AcquisitionError::InsecureContext {
            origin: "http://192.168.1.4:3000".to_string(),
        };
        assert!(err.message().contains("http://192.168.1.4:3000"));

        let err = AcquisitionError::Unknown {
            reason: "AbortError".to_string(),
        };
        assert!(err.message().contains("AbortError"));

        let display = format!("{}", AcquisitionError::DeviceBusy);
        assert!(display.contains("AcquisitionError"));
        assert!(display.contains("1005"));
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(AcquisitionError::PermissionDenied).unwrap();
        assert_eq!(json["kind"], "permission_denied");
    }
}
