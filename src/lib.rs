// Blow Detector Core - real-time breath gesture detection
// Lock-free capture, spectral band analysis and a sustained-frame classifier

// Module declarations
pub mod analysis;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;

// Re-exports for convenience
pub use analysis::emitter::{BlowEvent, BlowEvents};
pub use config::DetectorConfig;
pub use engine::{BlowDetector, BlowDetectorBuilder, DetectorStatus, PermissionState};
pub use error::{AcquisitionError, DetectorError, ErrorCode};
