// Classifier - heuristic blow pattern recognition
//
// A blow is broadband noise whose energy sits mostly in the lowest bins. The
// per-frame predicate requires the low band to clear the tuned threshold, to
// dominate the mid and high bands, and to clear an absolute floor. A
// sustained-count state machine then filters out single-frame spikes:
// matching frames add one credit, non-matching frames remove one (never below
// zero), and a firing is only a candidate while the credit lies within
// [MIN_SUSTAINED_FRAMES, MAX_SUSTAINED_FRAMES]. Plateaus longer than the
// upper bound are treated as steady background noise rather than a breath.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::analysis::features::BandEnergy;
use crate::error::{check_unit_interval, DetectorError};

/// Frames of credit needed before a firing is considered
pub const MIN_SUSTAINED_FRAMES: u32 = 3;

/// Credit above which the signal counts as a plateau, not a breath
pub const MAX_SUSTAINED_FRAMES: u32 = 20;

/// Low band must exceed the mid band by this factor
pub const MID_DOMINANCE_RATIO: f32 = 1.5;

/// Low band must exceed the high band by this factor
pub const HIGH_DOMINANCE_RATIO: f32 = 2.0;

/// Low band floor applied regardless of tuning
pub const ABSOLUTE_LOW_FLOOR: f32 = 0.3;

/// Threshold and sensitivity used by the predicate
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tuning {
    /// Base level in (0, 1]
    pub threshold: f32,
    /// Multiplier in (0, 1]
    pub sensitivity: f32,
}

impl Tuning {
    /// Validated tuning
    pub fn new(threshold: f32, sensitivity: f32) -> Result<Self, DetectorError> {
        if !check_unit_interval(threshold) {
            return Err(DetectorError::InvalidThreshold { value: threshold });
        }
        if !check_unit_interval(sensitivity) {
            return Err(DetectorError::InvalidSensitivity { value: sensitivity });
        }
        Ok(Self {
            threshold,
            sensitivity,
        })
    }

    /// Effective low-band gate
    pub fn gate(&self) -> f32 {
        self.threshold * self.sensitivity
    }
}

/// Sustained-count and cooldown bookkeeping for one analysis pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassifierState {
    pub sustained_count: u32,
    /// Instant of the last delivered event
    pub last_event_at: Option<Instant>,
}

impl ClassifierState {
    /// Whether the current credit allows a firing
    pub fn is_candidate(&self) -> bool {
        (MIN_SUSTAINED_FRAMES..=MAX_SUSTAINED_FRAMES).contains(&self.sustained_count)
    }
}

/// Per-frame blow predicate
pub fn is_blow_frame(energy: &BandEnergy, threshold: f32, sensitivity: f32) -> bool {
    energy.low > threshold * sensitivity
        && energy.low > energy.mid * MID_DOMINANCE_RATIO
        && energy.low > energy.high * HIGH_DOMINANCE_RATIO
        && energy.low > ABSOLUTE_LOW_FLOOR
}

/// Classify one frame and advance the sustained count
///
/// Returns whether the frame matched and the updated state. The count is not
/// capped; only firing is limited by the candidate window.
pub fn classify(
    energy: BandEnergy,
    state: ClassifierState,
    threshold: f32,
    sensitivity: f32,
) -> (bool, ClassifierState) {
    let matched = is_blow_frame(&energy, threshold, sensitivity);
    let sustained_count = if matched {
        state.sustained_count.saturating_add(1)
    } else {
        state.sustained_count.saturating_sub(1)
    };

    (
        matched,
        ClassifierState {
            sustained_count,
            ..state
        },
    )
}

/// BlowClassifier applies the predicate with shared, runtime-adjustable tuning
///
/// The tuning lives behind an `Arc<RwLock<_>>` so the owner of the detector
/// can retune while the analysis task is running.
pub struct BlowClassifier {
    tuning: Arc<RwLock<Tuning>>,
}

impl BlowClassifier {
    /// Create a new BlowClassifier with a shared tuning reference
    pub fn new(tuning: Arc<RwLock<Tuning>>) -> Self {
        Self { tuning }
    }

    /// Current tuning, or `None` if the lock was poisoned
    pub fn tuning(&self) -> Option<Tuning> {
        match self.tuning.read() {
            Ok(guard) => Some(*guard),
            Err(_) => {
                tracing::error!("[Classifier] Tuning lock poisoned");
                None
            }
        }
    }

    /// Classify a frame against the current tuning
    ///
    /// A poisoned tuning lock is treated as a non-matching frame so the
    /// credit drains instead of firing on stale parameters.
    pub fn classify(&self, energy: BandEnergy, state: &mut ClassifierState) -> bool {
        let (matched, next) = match self.tuning() {
            Some(tuning) => classify(energy, *state, tuning.threshold, tuning.sensitivity),
            None => classify(BandEnergy::default(), *state, 1.0, 1.0),
        };
        *state = next;
        matched
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
