//! CPAL-based capture backend for desktop platforms (Linux, macOS, Windows)
//!
//! A native process is always a trusted context; CPAL has no prompt of its
//! own, so permission is whatever the OS grants when the device is opened.
//! Opening blocks on the capture thread handshake, so it runs on tokio's
//! blocking pool.

use cpal::traits::{DeviceTrait, HostTrait};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::audio::CpalCaptureStream;

use super::{is_trusted_origin, CaptureBackend, CaptureConstraints, InputStream, PlatformRefusal};

/// Origin reported for native capture
const LOCAL_ORIGIN: &str = "http://localhost";

/// CPAL-based capture backend
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend {
    _unit: (),
}

impl CpalBackend {
    pub fn new() -> Self {
        Self { _unit: () }
    }
}

impl CaptureBackend for CpalBackend {
    fn origin(&self) -> String {
        LOCAL_ORIGIN.to_string()
    }

    fn is_secure_context(&self) -> bool {
        is_trusted_origin(LOCAL_ORIGIN)
    }

    fn supports_capture(&self) -> bool {
        !cpal::available_hosts().is_empty()
    }

    fn allows_silent_reacquire(&self) -> bool {
        true
    }

    fn request_input(
        &self,
        constraints: CaptureConstraints,
    ) -> BoxFuture<'static, Result<Box<dyn InputStream>, PlatformRefusal>> {
        async move {
            let opened =
                tokio::task::spawn_blocking(move || CpalCaptureStream::open(&constraints)).await;
            match opened {
                Ok(Ok(stream)) => Ok(Box::new(stream) as Box<dyn InputStream>),
                Ok(Err(refusal)) => Err(refusal),
                Err(join_err) => Err(PlatformRefusal::Other {
                    reason: format!("Capture open task failed: {}", join_err),
                }),
            }
        }
        .boxed()
    }
}

/// An input device as reported by the default host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub name: String,
    /// Whether the host reports this device as its default input
    pub is_default: bool,
}

/// Input devices on the default host, default device first when present
pub fn list_input_devices() -> Result<Vec<InputDevice>, PlatformRefusal> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|device| device.name().ok());

    let devices = host.input_devices().map_err(|e| {
        crate::audio::map_backend_text(
            &e.to_string(),
            PlatformRefusal::Other {
                reason: String::new(),
            },
        )
    })?;

    let names = devices.filter_map(|device| device.name().ok()).collect();
    Ok(order_devices(names, default_name.as_deref()))
}

fn order_devices(names: Vec<String>, default_name: Option<&str>) -> Vec<InputDevice> {
    let default_pos = names
        .iter()
        .position(|name| Some(name.as_str()) == default_name);
    let mut listed: Vec<InputDevice> = names
        .into_iter()
        .enumerate()
        .map(|(index, name)| InputDevice {
            name,
            is_default: Some(index) == default_pos,
        })
        .collect();
    if let Some(pos) = default_pos {
        let device = listed.remove(pos);
        listed.insert(0, device);
    }
    listed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_default_device_moves_first() {
        let listed = order_devices(names(&["hdmi", "usb mic", "built-in"]), Some("usb mic"));
        assert_eq!(listed[0].name, "usb mic");
        assert!(listed[0].is_default);
        assert_eq!(listed.iter().filter(|device| device.is_default).count(), 1);
    }

    #[test]
    fn test_no_default_marks_nothing() {
        let listed = order_devices(names(&["hdmi", "usb mic"]), None);
        assert!(listed.iter().all(|device| !device.is_default));
        assert_eq!(listed[0].name, "hdmi");

        // Default reported but missing from the enumeration
        let listed = order_devices(names(&["hdmi", "usb mic"]), Some("bluetooth"));
        assert!(listed.iter().all(|device| !device.is_default));
    }

    #[test]
    fn test_cpal_backend_origin_is_trusted() {
        assert!(CpalBackend::new().is_secure_context());
    }
}
