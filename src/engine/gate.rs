//! Capability gate: secure-context check, capture support check and the
//! permission request, mapped onto [`AcquisitionError`].

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::analysis::features::AnalysisFrame;
use crate::engine::backend::{CaptureBackend, CaptureConstraints, InputStream, StreamClosed};
use crate::error::{log_acquisition_error, AcquisitionError};

/// Permission as last observed by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// No request made yet
    #[default]
    Unknown,
    /// A request is pending (the user may be looking at a prompt)
    Prompting,
    Granted,
    Denied,
}

/// An opened input device.
///
/// Owns the backend stream; dropping the session releases the device.
pub struct DeviceSession {
    stream: Box<dyn InputStream>,
}

impl DeviceSession {
    pub fn new(stream: Box<dyn InputStream>) -> Self {
        Self { stream }
    }

    pub fn read_frame(&mut self, frame: &mut AnalysisFrame) -> Result<(), StreamClosed> {
        self.stream.read_frame(frame)
    }

    pub fn bin_count(&self) -> usize {
        self.stream.bin_count()
    }
}

/// Decides whether capture may start and acquires the device.
pub struct CapabilityGate {
    backend: Arc<dyn CaptureBackend>,
    constraints: CaptureConstraints,
    permission: Mutex<PermissionState>,
}

impl CapabilityGate {
    pub fn new(backend: Arc<dyn CaptureBackend>, constraints: CaptureConstraints) -> Self {
        Self {
            backend,
            constraints,
            permission: Mutex::new(PermissionState::Unknown),
        }
    }

    pub fn permission(&self) -> PermissionState {
        match self.permission.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_permission(&self, state: PermissionState, on_change: &dyn Fn(PermissionState)) {
        match self.permission.lock() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
        on_change(state);
    }

    fn refuse(
        &self,
        err: AcquisitionError,
        on_change: &dyn Fn(PermissionState),
    ) -> Result<DeviceSession, AcquisitionError> {
        self.set_permission(PermissionState::Denied, on_change);
        log_acquisition_error(&err, "CapabilityGate::acquire");
        Err(err)
    }

    /// Acquire the input device.
    ///
    /// The secure-context and capability checks run before any request, so
    /// an insecure or unsupported environment never prompts. A previous grant
    /// skips the prompting state when the backend remembers it.
    pub async fn acquire(&self) -> Result<DeviceSession, AcquisitionError> {
        self.acquire_with(|_| {}).await
    }

    /// [`acquire`](Self::acquire), reporting every permission transition of
    /// this attempt to `on_change`.
    pub async fn acquire_with<F>(&self, on_change: F) -> Result<DeviceSession, AcquisitionError>
    where
        F: Fn(PermissionState) + Sync,
    {
        if !self.backend.is_secure_context() {
            return self.refuse(
                AcquisitionError::InsecureContext {
                    origin: self.backend.origin(),
                },
                &on_change,
            );
        }
        if !self.backend.supports_capture() {
            return self.refuse(AcquisitionError::UnsupportedPlatform, &on_change);
        }

        let silent = self.permission() == PermissionState::Granted
            && self.backend.allows_silent_reacquire();
        if !silent {
            self.set_permission(PermissionState::Prompting, &on_change);
        }

        tracing::info!(
            "[CapabilityGate] Requesting input from {} (silent={})",
            self.backend.origin(),
            silent
        );

        match self.backend.request_input(self.constraints.clone()).await {
            Ok(stream) => {
                self.set_permission(PermissionState::Granted, &on_change);
                tracing::info!(
                    "[CapabilityGate] Input granted ({} bins per frame)",
                    stream.bin_count()
                );
                Ok(DeviceSession::new(stream))
            }
            Err(refusal) => self.refuse(refusal.into(), &on_change),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{FrameScript, PlatformRefusal, ScriptedBackend};

    fn gate(backend: ScriptedBackend) -> (CapabilityGate, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        (
            CapabilityGate::new(backend.clone(), CaptureConstraints::default()),
            backend,
        )
    }

    #[tokio::test]
    async fn test_grant_opens_session() {
        let (gate, backend) = gate(ScriptedBackend::new(FrameScript::silence(128)));
        let session = gate.acquire().await.unwrap();
        assert_eq!(session.bin_count(), 128);
        assert_eq!(gate.permission(), PermissionState::Granted);
        assert_eq!(backend.open_streams(), 1);
        drop(session);
        assert_eq!(backend.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_insecure_context_never_requests() {
        let (gate, backend) = gate(ScriptedBackend::default().with_origin("http://example.com"));
        let err = gate.acquire().await.err().unwrap();
        assert_eq!(
            err,
            AcquisitionError::InsecureContext {
                origin: "http://example.com".to_string()
            }
        );
        assert_eq!(backend.request_count(), 0);
        assert_eq!(gate.permission(), PermissionState::Denied);
    }

    #[tokio::test]
    async fn test_unsupported_platform_never_requests() {
        let (gate, backend) = gate(ScriptedBackend::default().without_capture());
        assert_eq!(
            gate.acquire().await.err(),
            Some(AcquisitionError::UnsupportedPlatform)
        );
        assert_eq!(backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_refusal_maps_and_denies() {
        let (gate, backend) = gate(ScriptedBackend::default());
        backend.refuse_next(PlatformRefusal::NotAllowed);
        assert_eq!(
            gate.acquire().await.err(),
            Some(AcquisitionError::PermissionDenied)
        );
        assert_eq!(gate.permission(), PermissionState::Denied);
    }

    #[tokio::test]
    async fn test_transitions_reported_per_attempt() {
        let seen = Mutex::new(Vec::new());
        let (gate, _backend) = gate(ScriptedBackend::default());

        let _first = gate
            .acquire_with(|state| seen.lock().unwrap().push(state))
            .await
            .unwrap();
        let _second = gate
            .acquire_with(|state| seen.lock().unwrap().push(state))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                PermissionState::Prompting,
                PermissionState::Granted,
                PermissionState::Granted
            ]
        );
    }
}
