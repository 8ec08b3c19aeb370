//! Backend abstractions for input acquisition.
//!
//! A [`CaptureBackend`] answers the capability questions the gate asks
//! (secure context, capture support) and opens an [`InputStream`] that yields
//! one spectral frame per read. Backends report refusals in the platform's
//! own vocabulary ([`PlatformRefusal`]); the gate maps them onto the
//! detector's error taxonomy.

use std::time::Instant;

use futures::future::BoxFuture;

use crate::analysis::features::AnalysisFrame;
use crate::config::{AnalyserConfig, DetectorConfig};
use crate::error::AcquisitionError;

/// Parameters passed to a backend when requesting input.
///
/// Signal processing toggles are all off by default so the analyser sees the
/// raw signal; echo cancellation in particular removes most of a blow.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub buffer_pool_size: usize,
    pub buffer_size: usize,
    pub analyser: AnalyserConfig,
}

impl CaptureConstraints {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            echo_cancellation: config.capture.echo_cancellation,
            noise_suppression: config.capture.noise_suppression,
            auto_gain_control: config.capture.auto_gain_control,
            buffer_pool_size: config.capture.buffer_pool_size,
            buffer_size: config.capture.buffer_size,
            analyser: config.analyser.clone(),
        }
    }

    /// Whether any platform signal processing was requested
    pub fn wants_processing(&self) -> bool {
        self.echo_cancellation || self.noise_suppression || self.auto_gain_control
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

/// Refusal reported by a platform when input is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformRefusal {
    /// User or policy denied access
    NotAllowed,
    /// No matching device
    NotFound,
    /// Device exists but could not be started
    NotReadable,
    /// Anything else, with the platform's reason
    Other { reason: String },
}

impl PlatformRefusal {
    /// Map a named platform failure onto a refusal.
    ///
    /// Recognizes both the current and the legacy names browsers and
    /// mobile shells use for the same conditions.
    pub fn from_name(name: &str, message: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                PlatformRefusal::NotAllowed
            }
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                PlatformRefusal::NotFound
            }
            "NotReadableError" | "TrackStartError" | "AbortError" => {
                PlatformRefusal::NotReadable
            }
            _ => PlatformRefusal::Other {
                reason: if message.is_empty() {
                    name.to_string()
                } else {
                    message.to_string()
                },
            },
        }
    }
}

impl From<PlatformRefusal> for AcquisitionError {
    fn from(refusal: PlatformRefusal) -> Self {
        match refusal {
            PlatformRefusal::NotAllowed => AcquisitionError::PermissionDenied,
            PlatformRefusal::NotFound => AcquisitionError::DeviceNotFound,
            PlatformRefusal::NotReadable => AcquisitionError::DeviceBusy,
            PlatformRefusal::Other { reason } => AcquisitionError::Unknown { reason },
        }
    }
}

/// The input stream ended or failed; no further frames will arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamClosed;

/// Live input yielding one spectral frame per read.
///
/// Dropping the stream releases the device.
pub trait InputStream: Send {
    /// Overwrite `frame` with the current spectrum.
    fn read_frame(&mut self, frame: &mut AnalysisFrame) -> Result<(), StreamClosed>;

    /// Bins per frame.
    fn bin_count(&self) -> usize;
}

/// Platform capability surface used by the capability gate.
pub trait CaptureBackend: Send + Sync {
    /// Human-readable origin, reported with insecure-context failures.
    fn origin(&self) -> String;

    /// Whether the execution context may request a microphone at all.
    fn is_secure_context(&self) -> bool;

    /// Whether the platform exposes input capture.
    fn supports_capture(&self) -> bool;

    /// Whether a granted permission is remembered, so a later request opens
    /// the device without prompting.
    fn allows_silent_reacquire(&self) -> bool;

    /// Request an input stream; may prompt the user.
    fn request_input(
        &self,
        constraints: CaptureConstraints,
    ) -> BoxFuture<'static, Result<Box<dyn InputStream>, PlatformRefusal>>;
}

/// Whether an origin is trusted for capture.
///
/// HTTPS and local file origins and loopback hosts qualify; anything else
/// is refused before a prompt is shown.
pub fn is_trusted_origin(origin: &str) -> bool {
    let (scheme, rest) = match origin.split_once("://") {
        Some(parts) => parts,
        None => return false,
    };
    if scheme.eq_ignore_ascii_case("https") || scheme.eq_ignore_ascii_case("file") {
        return true;
    }
    let authority = rest.split('/').next().unwrap_or_default();
    let host = if authority.starts_with('[') {
        authority
            .split_once(']')
            .map(|(host, _)| &host[1..])
            .unwrap_or(authority)
    } else {
        authority.split(':').next().unwrap_or(authority)
    };
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Trait representing a monotonic time source used for frame timestamps.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

mod cpal;
pub use cpal::{list_input_devices, CpalBackend, InputDevice};

mod desktop_stub;
pub use desktop_stub::{FrameScript, ScriptedBackend};

mod wav;
pub use wav::WavReplayBackend;
