//! Integration tests for the detector lifecycle
//!
//! These tests drive BlowDetector through the scripted backend and validate:
//! - start/stop idempotence and device release
//! - acquisition failures and the status fields they leave behind
//! - permission prompts, silent re-acquisition and stop during a prompt

use std::sync::Arc;
use std::time::Instant;

use blow_detector::analysis::features::AnalysisFrame;
use blow_detector::engine::{FrameScript, ManualTicker, PlatformRefusal, ScriptedBackend};
use blow_detector::{AcquisitionError, BlowDetector, BlowEvents, PermissionState};

fn detector_with(backend: Arc<ScriptedBackend>, ticks: &ManualTicker) -> (BlowDetector, BlowEvents) {
    BlowDetector::builder()
        .backend(backend)
        .ticks(Arc::new(ticks.clone()))
        .build()
        .expect("default config is valid")
}

fn silent_backend() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::new(FrameScript::silence(128)))
}

fn assert_idle_with_error(detector: &BlowDetector, expected: AcquisitionError) {
    assert!(!detector.is_listening());
    assert!(!detector.has_permission());
    assert!(!detector.is_loading());
    assert_eq!(detector.last_error(), Some(expected));
}

#[tokio::test]
async fn test_start_then_stop_releases_device() {
    let backend = silent_backend();
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    assert!(detector.is_listening());
    assert!(detector.has_permission());
    assert!(!detector.is_loading());
    assert_eq!(detector.permission_status(), PermissionState::Granted);
    assert_eq!(detector.last_error(), None);
    assert_eq!(backend.open_streams(), 1);

    assert!(ticks.tick(Instant::now()).await);

    detector.stop();
    assert!(!detector.is_listening());
    assert_eq!(backend.open_streams(), 0, "stop must release synchronously");

    // Ticks after stop reach nobody
    assert!(!ticks.tick(Instant::now()).await);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let backend = silent_backend();
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.stop();
    detector.stop();
    assert!(!detector.is_listening());

    detector.start().await;
    detector.stop();
    detector.stop();
    assert!(!detector.is_listening());
    assert_eq!(backend.open_streams(), 0);
}

#[tokio::test]
async fn test_start_while_listening_is_ignored() {
    let backend = silent_backend();
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    detector.start().await;
    assert_eq!(backend.request_count(), 1);
    assert_eq!(backend.open_streams(), 1);
}

#[tokio::test]
async fn test_drop_releases_device() {
    let backend = silent_backend();
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    drop(detector);
    assert_eq!(backend.open_streams(), 0);
}

#[tokio::test]
async fn test_refusals_map_to_errors() {
    let cases = [
        (PlatformRefusal::NotAllowed, AcquisitionError::PermissionDenied),
        (PlatformRefusal::NotFound, AcquisitionError::DeviceNotFound),
        (PlatformRefusal::NotReadable, AcquisitionError::DeviceBusy),
        (
            PlatformRefusal::Other {
                reason: "driver crashed".to_string(),
            },
            AcquisitionError::Unknown {
                reason: "driver crashed".to_string(),
            },
        ),
    ];

    for (refusal, expected) in cases {
        let backend = silent_backend();
        backend.refuse_next(refusal);
        let ticks = ManualTicker::new();
        let (detector, _events) = detector_with(backend.clone(), &ticks);

        detector.start().await;
        assert_idle_with_error(&detector, expected);
        assert_eq!(detector.permission_status(), PermissionState::Denied);
        assert_eq!(backend.open_streams(), 0);
    }
}

#[tokio::test]
async fn test_insecure_context_fails_without_prompt() {
    let backend = Arc::new(ScriptedBackend::default().with_origin("http://blow.example"));
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    assert_idle_with_error(
        &detector,
        AcquisitionError::InsecureContext {
            origin: "http://blow.example".to_string(),
        },
    );
    assert_eq!(backend.request_count(), 0);
    assert!(detector.last_error().unwrap().is_fatal());
}

#[tokio::test]
async fn test_unsupported_platform_fails_without_prompt() {
    let backend = Arc::new(ScriptedBackend::default().without_capture());
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    assert_idle_with_error(&detector, AcquisitionError::UnsupportedPlatform);
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test]
async fn test_busy_device_can_be_retried() {
    let backend = silent_backend();
    backend.refuse_next(PlatformRefusal::NotReadable);
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    let err = detector.last_error().unwrap();
    assert!(err.is_retryable());

    detector.start().await;
    assert!(detector.is_listening());
    assert_eq!(detector.last_error(), None);
}

#[tokio::test]
async fn test_restart_reacquires_silently() {
    let backend = silent_backend();
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    detector.stop();
    detector.start().await;

    assert!(detector.is_listening());
    assert_eq!(backend.request_count(), 2);
    assert_eq!(backend.prompt_count(), 1);
}

#[tokio::test]
async fn test_restart_prompts_again_without_silent_reacquire() {
    let backend = Arc::new(ScriptedBackend::new(FrameScript::silence(128)).without_silent_reacquire());
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    detector.stop();
    detector.start().await;

    assert_eq!(backend.prompt_count(), 2);
}

#[tokio::test]
async fn test_stop_during_prompt_discards_late_grant() {
    let backend = silent_backend();
    let release = backend.hold_next_prompt();
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);
    let detector = Arc::new(detector);

    let starter = Arc::clone(&detector);
    let pending = tokio::spawn(async move { starter.start().await });

    for _ in 0..100 {
        if detector.permission_status() == PermissionState::Prompting {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(detector.is_loading());
    assert_eq!(detector.permission_status(), PermissionState::Prompting);

    detector.stop();
    assert!(!detector.is_loading());

    // The prompt resolves after the detector was stopped
    release.notify_one();
    pending.await.expect("start task must not panic");

    assert!(!detector.is_listening());
    assert!(!detector.is_loading());
    assert!(!detector.has_permission());
    assert_eq!(detector.permission_status(), PermissionState::Unknown);
    assert_eq!(backend.open_streams(), 0);
    assert!(!ticks.tick(Instant::now()).await);
}

#[tokio::test]
async fn test_stream_end_returns_to_idle() {
    let frames = vec![AnalysisFrame::zeroed(128); 2];
    let backend = Arc::new(ScriptedBackend::new(FrameScript::once(frames)));
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend.clone(), &ticks);

    detector.start().await;
    let start = Instant::now();
    assert!(ticks.tick(start).await);
    assert!(ticks.tick(start).await);
    // Third tick finds the stream closed
    assert!(!ticks.tick(start).await);

    assert!(!detector.is_listening());
    assert_eq!(detector.last_error(), None, "stream end is not an error");
    assert_eq!(backend.open_streams(), 0);
}

#[tokio::test]
async fn test_status_watch_reports_transitions() {
    let backend = silent_backend();
    let ticks = ManualTicker::new();
    let (detector, _events) = detector_with(backend, &ticks);
    let mut status = detector.subscribe_status();

    detector.start().await;
    assert!(status.has_changed().unwrap());
    assert!(status.borrow_and_update().is_listening);

    detector.stop();
    assert!(status.has_changed().unwrap());
    assert!(!status.borrow_and_update().is_listening);
}
