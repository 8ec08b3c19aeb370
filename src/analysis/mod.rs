// Analysis module - per-frame blow detection pipeline
//
// Architecture:
// - features: AnalysisFrame → BandEnergy (low/mid/high means)
// - classifier: BandEnergy → blow predicate + sustained-count state machine
// - emitter: candidate → cooldown / can_fire gates → BlowEvent delivery
//
// AnalysisPipeline runs those stages in order for one frame at a time. It is
// owned by exactly one analysis task, so its state needs no locking; only
// the tuning is shared with the detector owner.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

pub mod classifier;
pub mod emitter;
pub mod features;

use classifier::{BlowClassifier, ClassifierState, Tuning};
use emitter::{BlowEvent, EventEmitter, ProgressMeter};
use features::{AnalysisFrame, BandEnergy, BandExtractor};
use tokio::sync::mpsc;

/// Low band level above which frames are traced
const LEVEL_TRACE_FLOOR: f32 = 0.1;

/// Predicate the owner uses to suppress firing (e.g. while a cue is shown)
pub type CanFire = Arc<dyn Fn() -> bool + Send + Sync>;

/// What happened while processing one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutcome {
    pub energy: BandEnergy,
    pub is_blow_frame: bool,
    /// Whether a BlowEvent was delivered for this frame
    pub fired: bool,
    /// Smoothed progress toward the blow gate, 0..=100
    pub progress: f32,
}

/// Extract → classify → gate → emit for a stream of frames
pub struct AnalysisPipeline {
    extractor: BandExtractor,
    classifier: BlowClassifier,
    state: ClassifierState,
    emitter: EventEmitter,
    progress: ProgressMeter,
    can_fire: CanFire,
}

impl AnalysisPipeline {
    pub fn new(
        tuning: Arc<RwLock<Tuning>>,
        cooldown: Duration,
        progress_smoothing: f32,
        can_fire: CanFire,
        sink: mpsc::UnboundedSender<BlowEvent>,
    ) -> Self {
        Self {
            extractor: BandExtractor::new(),
            classifier: BlowClassifier::new(tuning),
            state: ClassifierState::default(),
            emitter: EventEmitter::new(cooldown, sink),
            progress: ProgressMeter::new(progress_smoothing),
            can_fire,
        }
    }

    pub fn state(&self) -> ClassifierState {
        self.state
    }

    /// Events delivered by this pipeline
    pub fn delivered(&self) -> u64 {
        self.emitter.delivered()
    }

    /// Run one frame through the pipeline
    ///
    /// `now` is the scheduler timestamp of the tick that produced `frame`.
    pub fn process_frame(&mut self, frame: &AnalysisFrame, now: Instant) -> FrameOutcome {
        let energy = self.extractor.extract(frame);

        if energy.low > LEVEL_TRACE_FLOOR {
            tracing::debug!(
                "[AnalysisPipeline] Level low={:.3} mid={:.3} high={:.3} count={}",
                energy.low,
                energy.mid,
                energy.high,
                self.state.sustained_count
            );
        }

        let is_blow_frame = self.classifier.classify(energy, &mut self.state);
        let candidate = is_blow_frame && self.state.is_candidate();
        let can_fire = Arc::clone(&self.can_fire);
        let fired =
            self.emitter
                .try_fire(candidate, now, &mut self.state, energy.low, &*can_fire);

        let progress = match self.classifier.tuning() {
            Some(tuning) => self
                .progress
                .update(energy.low, tuning.threshold, tuning.sensitivity),
            None => self.progress.value(),
        };

        FrameOutcome {
            energy,
            is_blow_frame,
            fired,
            progress,
        }
    }

    /// Clear classifier credit, cooldown history and progress
    pub fn reset(&mut self) {
        self.state = ClassifierState::default();
        self.progress.reset();
    }
}
