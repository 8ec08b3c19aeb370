// Event emitter - turns classifier candidates into delivered blow events
//
// A candidate frame becomes an event only when the owner's `can_fire` gate
// allows it and the cooldown since the last delivered event has strictly
// elapsed. Delivery resets the sustained count so a continuing exhalation has
// to rebuild credit before it can fire again.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::classifier::ClassifierState;

/// Default minimum spacing between two delivered events
pub const COOLDOWN: Duration = Duration::from_millis(500);

/// Upper bound of the progress indicator
pub const MAX_PROGRESS: f32 = 100.0;

/// Payload delivered to the owner for every detected blow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlowEvent {
    /// 1-based count of events delivered by this detector
    pub sequence: u64,
    /// Low band energy of the firing frame
    pub low_energy: f32,
    /// Sustained count at the moment of firing
    pub sustained_frames: u32,
    /// Time since the first frame the emitter saw
    pub elapsed_ms: u64,
}

/// Receiving half handed to the detector owner
pub type BlowEvents = mpsc::UnboundedReceiver<BlowEvent>;

/// Applies the owner gate and the cooldown, then delivers events
pub struct EventEmitter {
    cooldown: Duration,
    sink: mpsc::UnboundedSender<BlowEvent>,
    sequence: u64,
    origin: Option<Instant>,
}

impl EventEmitter {
    pub fn new(cooldown: Duration, sink: mpsc::UnboundedSender<BlowEvent>) -> Self {
        Self {
            cooldown,
            sink,
            sequence: 0,
            origin: None,
        }
    }

    /// Emitter plus the receiver its events arrive on
    pub fn channel(cooldown: Duration) -> (Self, BlowEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(cooldown, tx), rx)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Number of events delivered so far
    pub fn delivered(&self) -> u64 {
        self.sequence
    }

    /// Whether the cooldown since the last event has strictly elapsed at `now`
    pub fn cooldown_elapsed(&self, state: &ClassifierState, now: Instant) -> bool {
        match state.last_event_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.cooldown,
        }
    }

    /// Attempt to deliver an event for the current frame
    ///
    /// `can_fire` is consulted first and only for candidate frames. On
    /// delivery `state.last_event_at` becomes `now` and the sustained count
    /// resets to zero. Returns whether an event was delivered.
    pub fn try_fire(
        &mut self,
        candidate: bool,
        now: Instant,
        state: &mut ClassifierState,
        low_energy: f32,
        can_fire: &dyn Fn() -> bool,
    ) -> bool {
        let origin = *self.origin.get_or_insert(now);

        if !candidate || !can_fire() || !self.cooldown_elapsed(state, now) {
            return false;
        }

        self.sequence += 1;
        let event = BlowEvent {
            sequence: self.sequence,
            low_energy,
            sustained_frames: state.sustained_count,
            elapsed_ms: now.saturating_duration_since(origin).as_millis() as u64,
        };

        tracing::info!(
            "[EventEmitter] Blow #{} (low={:.3}, sustained={})",
            event.sequence,
            event.low_energy,
            event.sustained_frames
        );

        if self.sink.send(event).is_err() {
            tracing::warn!("[EventEmitter] Event receiver dropped, blow not delivered");
        }

        state.last_event_at = Some(now);
        state.sustained_count = 0;
        true
    }
}

/// Exponential moving average of the low band, scaled to 0..=100
///
/// 100 means the low band sits at or above the effective gate
/// (`threshold * sensitivity`).
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    smoothing: f32,
    value: f32,
}

impl ProgressMeter {
    /// `smoothing` is the weight of the newest sample, in (0, 1]
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing,
            value: 0.0,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn update(&mut self, low: f32, threshold: f32, sensitivity: f32) -> f32 {
        let gate = threshold * sensitivity;
        let target = if gate > 0.0 {
            (low / gate * MAX_PROGRESS).clamp(0.0, MAX_PROGRESS)
        } else {
            0.0
        };
        self.value += self.smoothing * (target - self.value);
        self.value = self.value.clamp(0.0, MAX_PROGRESS);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}
