//! Frame source: pulls one frame per scheduler tick from the open session.
//!
//! The scheduler is injected so tests can drive ticks by hand. The next tick
//! is only requested after the previous frame has been handed out and
//! processed, so the pipeline never polls ahead of the analysis.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use crate::analysis::features::AnalysisFrame;
use crate::engine::backend::{SystemTimeSource, TimeSource};
use crate::engine::gate::DeviceSession;

/// Slot holding the live session; emptied on teardown.
pub type SessionSlot = Arc<Mutex<Option<DeviceSession>>>;

/// Delivers ticks to one frame source.
pub trait FrameScheduler: Send {
    /// Wait for the next tick; `None` once the scheduler is exhausted.
    fn next_tick(&mut self) -> BoxFuture<'_, Option<Instant>>;
}

/// Creates a scheduler for every new session.
pub trait TickSource: Send + Sync {
    fn scheduler(&self) -> Box<dyn FrameScheduler>;
}

/// Fixed-period ticks from the tokio timer.
///
/// Late ticks are skipped rather than bursted, so a slow consumer drops
/// frames instead of queueing them.
pub struct IntervalTicks {
    period: Duration,
    clock: Arc<dyn TimeSource>,
}

impl IntervalTicks {
    pub fn new(period: Duration) -> Self {
        Self::with_clock(period, Arc::new(SystemTimeSource::default()))
    }

    pub fn with_clock(period: Duration, clock: Arc<dyn TimeSource>) -> Self {
        Self { period, clock }
    }
}

impl TickSource for IntervalTicks {
    fn scheduler(&self) -> Box<dyn FrameScheduler> {
        Box::new(IntervalScheduler {
            period: self.period,
            clock: Arc::clone(&self.clock),
            interval: None,
        })
    }
}

struct IntervalScheduler {
    period: Duration,
    clock: Arc<dyn TimeSource>,
    interval: Option<tokio::time::Interval>,
}

impl FrameScheduler for IntervalScheduler {
    fn next_tick(&mut self) -> BoxFuture<'_, Option<Instant>> {
        async move {
            let period = self.period;
            let interval = self.interval.get_or_insert_with(|| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                interval
            });
            interval.tick().await;
            Some(self.clock.now())
        }
        .boxed()
    }
}

type ManualTick = (Instant, oneshot::Sender<()>);

/// Hand-driven ticks for deterministic tests and tooling.
///
/// Each [`ManualTicker::tick`] resolves once the frame it triggered has been
/// fully processed, so callers can assert on detector state right after.
#[derive(Clone, Default)]
pub struct ManualTicker {
    current: Arc<Mutex<Option<mpsc::UnboundedSender<ManualTick>>>>,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver one tick stamped `at`.
    ///
    /// Returns false when no session is consuming ticks, or the session
    /// ended without processing this one.
    pub async fn tick(&self, at: Instant) -> bool {
        let sender = match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(sender) = sender else {
            return false;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if sender.send((at, ack_tx)).is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }
}

impl TickSource for ManualTicker {
    fn scheduler(&self) -> Box<dyn FrameScheduler> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.current.lock() {
            Ok(mut guard) => *guard = Some(tx),
            Err(poisoned) => *poisoned.into_inner() = Some(tx),
        }
        Box::new(ManualScheduler { rx, pending: None })
    }
}

struct ManualScheduler {
    rx: mpsc::UnboundedReceiver<ManualTick>,
    /// Ack for the tick whose frame is being processed
    pending: Option<oneshot::Sender<()>>,
}

impl FrameScheduler for ManualScheduler {
    fn next_tick(&mut self) -> BoxFuture<'_, Option<Instant>> {
        async move {
            if let Some(ack) = self.pending.take() {
                let _ = ack.send(());
            }
            let (at, ack) = self.rx.recv().await?;
            self.pending = Some(ack);
            Some(at)
        }
        .boxed()
    }
}

/// Lazy sequence of frames from one session.
pub struct FrameSource {
    slot: SessionSlot,
    scheduler: Box<dyn FrameScheduler>,
    frame: AnalysisFrame,
}

impl FrameSource {
    pub fn new(slot: SessionSlot, scheduler: Box<dyn FrameScheduler>) -> Self {
        Self {
            slot,
            scheduler,
            frame: AnalysisFrame::default(),
        }
    }

    /// Wait for the next tick and read a frame.
    ///
    /// Returns `None` when the scheduler is exhausted, the session has been
    /// torn down, or the stream closed (which also releases the device).
    pub async fn next_frame(&mut self) -> Option<(Instant, &AnalysisFrame)> {
        let at = self.scheduler.next_tick().await?;

        let mut slot = match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let session = slot.as_mut()?;
        if session.read_frame(&mut self.frame).is_err() {
            tracing::warn!("[FrameSource] Input stream closed, releasing device");
            slot.take();
            return None;
        }
        Some((at, &self.frame))
    }

    /// Release the session. Idempotent.
    pub fn stop(&self) {
        let session = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if session.is_some() {
            tracing::debug!("[FrameSource] Session released");
        }
    }
}
