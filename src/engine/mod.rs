//! Engine module housing the detector runtime.
//!
//! - `backend`: capture backends (CPAL, scripted, WAV replay) behind one trait
//! - `gate`: permission negotiation producing a `DeviceSession`
//! - `frame_source`: tick-driven frame pulls from the session
//! - `core`: the `BlowDetector` that ties them to the analysis pipeline

pub mod backend;
pub mod core;
pub mod frame_source;
pub mod gate;

pub use backend::{
    list_input_devices, CaptureBackend, CaptureConstraints, CpalBackend, FrameScript,
    InputDevice, InputStream, PlatformRefusal, ScriptedBackend, StreamClosed, SystemTimeSource,
    TimeSource, WavReplayBackend,
};
pub use core::{BlowDetector, BlowDetectorBuilder, DetectorStatus};
pub use frame_source::{FrameScheduler, FrameSource, IntervalTicks, ManualTicker, TickSource};
pub use gate::{CapabilityGate, DeviceSession, PermissionState};
