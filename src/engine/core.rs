//! BlowDetector: owns the capability gate, the active session and the
//! analysis task, and publishes observable status.
//!
//! Liveness is tracked with a generation counter. Every `start()` and
//! `stop()` bumps it; work that was scheduled under an older generation
//! (a permission prompt resolving late, a tick already in flight) checks it
//! before touching shared state and quietly drops its result otherwise.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::analysis::classifier::Tuning;
use crate::analysis::emitter::{BlowEvent, BlowEvents};
use crate::analysis::{AnalysisPipeline, CanFire};
use crate::config::DetectorConfig;
use crate::engine::backend::{CaptureBackend, CaptureConstraints, CpalBackend};
use crate::engine::frame_source::{FrameSource, IntervalTicks, SessionSlot, TickSource};
use crate::engine::gate::{CapabilityGate, DeviceSession, PermissionState};
use crate::error::{check_unit_interval, log_detector_error, AcquisitionError, DetectorError};

/// Snapshot of everything a UI observes about the detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectorStatus {
    pub is_listening: bool,
    pub has_permission: bool,
    pub is_loading: bool,
    pub permission_status: PermissionState,
    pub last_error: Option<AcquisitionError>,
    /// Smoothed progress toward a blow, 0..=100
    pub blow_progress: f32,
}

struct ActiveSession {
    slot: SessionSlot,
    task: JoinHandle<()>,
}

/// State shared between the detector handle and its analysis task.
struct Shared {
    status: watch::Sender<DetectorStatus>,
    generation: AtomicU64,
    active: Mutex<Option<ActiveSession>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("[BlowDetector] Active session lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Publish a permission transition unless `generation` was superseded.
    fn report_permission(&self, generation: u64, permission: PermissionState) {
        if !self.is_current(generation) {
            tracing::debug!("[BlowDetector] Ignoring {:?} from a superseded request", permission);
            return;
        }
        self.status.send_modify(|status| {
            status.permission_status = permission;
            status.has_permission = permission == PermissionState::Granted;
        });
    }

    /// Analysis ended without `stop()`: release the device and go idle.
    fn finish(&self, generation: u64) {
        let mut active = self.lock_active();
        if !self.is_current(generation) {
            return;
        }
        if let Some(session) = active.take() {
            release(&session.slot);
        }
        drop(active);

        self.status.send_modify(|status| {
            status.is_listening = false;
            status.blow_progress = 0.0;
        });
        tracing::info!("[BlowDetector] Input ended, no longer listening");
    }
}

fn release(slot: &SessionSlot) {
    let session = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    drop(session);
}

/// Builder for [`BlowDetector`].
pub struct BlowDetectorBuilder {
    config: DetectorConfig,
    backend: Option<Arc<dyn CaptureBackend>>,
    ticks: Option<Arc<dyn TickSource>>,
    can_fire: CanFire,
}

impl BlowDetectorBuilder {
    fn new() -> Self {
        Self {
            config: DetectorConfig::default(),
            backend: None,
            ticks: None,
            can_fire: Arc::new(|| true),
        }
    }

    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.config.detection.threshold = threshold;
        self
    }

    pub fn sensitivity(mut self, sensitivity: f32) -> Self {
        self.config.detection.sensitivity = sensitivity;
        self
    }

    /// Input backend; defaults to the CPAL microphone backend.
    pub fn backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Tick source; defaults to a timer at `analyser.tick_interval_ms`.
    pub fn ticks(mut self, ticks: Arc<dyn TickSource>) -> Self {
        self.ticks = Some(ticks);
        self
    }

    /// Predicate consulted on every candidate firing.
    pub fn can_fire<F>(mut self, can_fire: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.can_fire = Arc::new(can_fire);
        self
    }

    /// Validate the configuration and build the detector together with the
    /// receiver its blow events are delivered on.
    pub fn build(self) -> Result<(BlowDetector, BlowEvents), DetectorError> {
        let tuning = self
            .config
            .validate()
            .and_then(|_| {
                Tuning::new(
                    self.config.detection.threshold,
                    self.config.detection.sensitivity,
                )
            })
            .inspect_err(|err| log_detector_error(err, "BlowDetectorBuilder::build"))?;
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(CpalBackend::new()) as Arc<dyn CaptureBackend>);
        let ticks = self.ticks.unwrap_or_else(|| {
            Arc::new(IntervalTicks::new(Duration::from_millis(
                self.config.analyser.tick_interval_ms,
            ))) as Arc<dyn TickSource>
        });

        let (status, _) = watch::channel(DetectorStatus::default());
        let shared = Arc::new(Shared {
            status,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
        });

        let gate = CapabilityGate::new(backend, CaptureConstraints::from_config(&self.config));

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tracing::info!(
            "[BlowDetector] Created (threshold {}, sensitivity {}, cooldown {} ms)",
            tuning.threshold,
            tuning.sensitivity,
            self.config.detection.cooldown_ms
        );

        Ok((
            BlowDetector {
                config: self.config,
                gate,
                ticks,
                tuning: Arc::new(RwLock::new(tuning)),
                can_fire: self.can_fire,
                events: events_tx,
                shared,
            },
            events_rx,
        ))
    }
}

/// Real-time blow detector.
///
/// `start()` runs the permission → capture → analysis pipeline; `stop()`
/// tears it down synchronously. Blow events arrive on the [`BlowEvents`]
/// receiver returned by the builder.
pub struct BlowDetector {
    config: DetectorConfig,
    gate: CapabilityGate,
    ticks: Arc<dyn TickSource>,
    tuning: Arc<RwLock<Tuning>>,
    can_fire: CanFire,
    events: mpsc::UnboundedSender<BlowEvent>,
    shared: Arc<Shared>,
}

impl BlowDetector {
    pub fn builder() -> BlowDetectorBuilder {
        BlowDetectorBuilder::new()
    }

    /// Request the device and begin analysis.
    ///
    /// Suspends while the permission request is outstanding. Completion is
    /// reported through the status fields, not a return value. A call while
    /// already listening or loading is ignored.
    pub async fn start(&self) {
        let generation = {
            let active = self.shared.lock_active();
            if active.is_some() || self.shared.status.borrow().is_loading {
                tracing::debug!("[BlowDetector] start() ignored, already active");
                return;
            }
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.status.send_modify(|status| {
                status.is_loading = true;
                status.last_error = None;
            });
            generation
        };

        let shared = &self.shared;
        let acquired = self
            .gate
            .acquire_with(|permission| shared.report_permission(generation, permission))
            .await;

        if !self.shared.is_current(generation) {
            tracing::debug!("[BlowDetector] Acquisition resolved after stop, discarding");
            return;
        }

        match acquired {
            Ok(session) => self.launch(generation, session),
            Err(err) => {
                // The gate already logged the failure
                self.shared.status.send_modify(|status| {
                    status.is_listening = false;
                    status.has_permission = false;
                    status.is_loading = false;
                    status.last_error = Some(err);
                });
            }
        }
    }

    fn launch(&self, generation: u64, session: DeviceSession) {
        let mut active = self.shared.lock_active();
        if !self.shared.is_current(generation) {
            tracing::debug!("[BlowDetector] Stopped before launch, releasing device");
            return;
        }

        let slot: SessionSlot = Arc::new(Mutex::new(Some(session)));
        let source = FrameSource::new(Arc::clone(&slot), self.ticks.scheduler());

        // Frames processed after a stop must not fire
        let live_shared = Arc::clone(&self.shared);
        let user_can_fire = Arc::clone(&self.can_fire);
        let can_fire: CanFire =
            Arc::new(move || user_can_fire() && live_shared.is_current(generation));

        let pipeline = AnalysisPipeline::new(
            Arc::clone(&self.tuning),
            Duration::from_millis(self.config.detection.cooldown_ms),
            self.config.detection.progress_smoothing,
            can_fire,
            self.events.clone(),
        );

        self.shared.status.send_modify(|status| {
            status.is_listening = true;
            status.is_loading = false;
            status.has_permission = true;
            status.last_error = None;
            status.blow_progress = 0.0;
        });

        let task = tokio::spawn(run_analysis(
            source,
            pipeline,
            Arc::clone(&self.shared),
            generation,
        ));
        *active = Some(ActiveSession { slot, task });

        tracing::info!("[BlowDetector] Listening");
    }

    /// Stop analysis and release the device.
    ///
    /// Synchronous and idempotent; safe before `start()`, during a pending
    /// permission request and while a frame is being processed.
    pub fn stop(&self) {
        let taken = {
            let mut active = self.shared.lock_active();
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            active.take()
        };

        if let Some(session) = taken {
            session.task.abort();
            release(&session.slot);
            tracing::info!("[BlowDetector] Stopped, device released");
        }

        self.shared.status.send_if_modified(|status| {
            let prompting = status.permission_status == PermissionState::Prompting;
            let changed = status.is_listening
                || status.is_loading
                || status.blow_progress != 0.0
                || prompting;
            status.is_listening = false;
            status.is_loading = false;
            status.blow_progress = 0.0;
            // Nobody is waiting on an abandoned prompt
            if prompting {
                status.permission_status = PermissionState::Unknown;
            }
            changed
        });
    }

    pub fn status(&self) -> DetectorStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<DetectorStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.status.borrow().is_listening
    }

    pub fn has_permission(&self) -> bool {
        self.shared.status.borrow().has_permission
    }

    pub fn is_loading(&self) -> bool {
        self.shared.status.borrow().is_loading
    }

    pub fn permission_status(&self) -> PermissionState {
        self.shared.status.borrow().permission_status
    }

    pub fn last_error(&self) -> Option<AcquisitionError> {
        self.shared.status.borrow().last_error.clone()
    }

    pub fn blow_progress(&self) -> f32 {
        self.shared.status.borrow().blow_progress
    }

    pub fn tuning(&self) -> Result<Tuning, DetectorError> {
        self.tuning
            .read()
            .map(|guard| *guard)
            .map_err(|_| DetectorError::LockPoisoned {
                component: "tuning".to_string(),
            })
    }

    /// Change the threshold; takes effect on the next frame.
    pub fn set_threshold(&self, threshold: f32) -> Result<(), DetectorError> {
        if !check_unit_interval(threshold) {
            return rejected(
                DetectorError::InvalidThreshold { value: threshold },
                "BlowDetector::set_threshold",
            );
        }
        self.update_tuning(|tuning| tuning.threshold = threshold)
    }

    /// Change the sensitivity; takes effect on the next frame.
    pub fn set_sensitivity(&self, sensitivity: f32) -> Result<(), DetectorError> {
        if !check_unit_interval(sensitivity) {
            return rejected(
                DetectorError::InvalidSensitivity { value: sensitivity },
                "BlowDetector::set_sensitivity",
            );
        }
        self.update_tuning(|tuning| tuning.sensitivity = sensitivity)
    }

    fn update_tuning<F: FnOnce(&mut Tuning)>(&self, apply: F) -> Result<(), DetectorError> {
        let mut guard = self
            .tuning
            .write()
            .map_err(|_| DetectorError::LockPoisoned {
                component: "tuning".to_string(),
            })
            .inspect_err(|err| log_detector_error(err, "BlowDetector::update_tuning"))?;
        apply(&mut guard);
        tracing::info!(
            "[BlowDetector] Tuning updated (threshold {}, sensitivity {})",
            guard.threshold,
            guard.sensitivity
        );
        Ok(())
    }
}

fn rejected(err: DetectorError, context: &str) -> Result<(), DetectorError> {
    log_detector_error(&err, context);
    Err(err)
}

impl Drop for BlowDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_analysis(
    mut source: FrameSource,
    mut pipeline: AnalysisPipeline,
    shared: Arc<Shared>,
    generation: u64,
) {
    tracing::debug!("[AnalysisLoop] Started (generation {})", generation);

    while let Some((at, frame)) = source.next_frame().await {
        if !shared.is_current(generation) {
            break;
        }
        let outcome = pipeline.process_frame(frame, at);
        // `stop()` may have run while the frame was processed
        let updated = shared.status.send_if_modified(|status| {
            if !shared.is_current(generation) || status.blow_progress == outcome.progress {
                return false;
            }
            status.blow_progress = outcome.progress;
            true
        });
        if !updated && !shared.is_current(generation) {
            break;
        }
    }

    source.stop();
    tracing::debug!(
        "[AnalysisLoop] Finished after {} events (generation {})",
        pipeline.delivered(),
        generation
    );
    shared.finish(generation);
}
