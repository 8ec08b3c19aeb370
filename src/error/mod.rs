// Error types for the blow detector
//
// This module defines custom error types for device acquisition and detector
// configuration, providing structured error handling with numeric codes that
// UI layers can match on without parsing messages.

mod acquisition;
mod detector;

pub use acquisition::{log_acquisition_error, AcquisitionError, AcquisitionErrorCodes};
pub use detector::{log_detector_error, DetectorError, DetectorErrorCodes};
pub(crate) use detector::check_unit_interval;

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the detector's public surface.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
