// Types module - Data structures flowing through the feature extractor
//
// An AnalysisFrame is what the frame source hands over on every tick; a
// BandEnergy is what the extractor reduces it to.

use serde::{Deserialize, Serialize};

/// Largest magnitude a frame bin can hold
pub const MAX_MAGNITUDE: u8 = u8::MAX;

/// One tick's worth of frequency-domain magnitudes
///
/// Bins are ordered from DC upwards. The frame is reused by the frame source
/// between ticks, so consumers must not hold on to it past one step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalysisFrame {
    bins: Vec<u8>,
}

impl AnalysisFrame {
    pub fn new(bins: Vec<u8>) -> Self {
        Self { bins }
    }

    /// Silent frame with `bin_count` bins
    pub fn zeroed(bin_count: usize) -> Self {
        Self {
            bins: vec![0; bin_count],
        }
    }

    /// Build a frame whose bands sit at the given normalized levels
    ///
    /// Uses the band layout for `bin_count`, so `extract` on the result
    /// returns the levels back up to byte quantization.
    pub fn from_band_levels(bin_count: usize, low: f32, mid: f32, high: f32) -> Self {
        let layout = super::BandLayout::for_bin_count(bin_count);
        let quantize = |level: f32| (level.clamp(0.0, 1.0) * MAX_MAGNITUDE as f32).round() as u8;

        let bins = (0..bin_count)
            .map(|i| {
                if i < layout.low_end() {
                    quantize(low)
                } else if i < layout.mid_end() {
                    quantize(mid)
                } else {
                    quantize(high)
                }
            })
            .collect();

        Self { bins }
    }

    pub fn bins(&self) -> &[u8] {
        &self.bins
    }

    pub fn bins_mut(&mut self) -> &mut [u8] {
        &mut self.bins
    }

    /// Resize in place, zero-filling new bins
    pub fn resize(&mut self, bin_count: usize) {
        self.bins.resize(bin_count, 0);
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}

/// Normalized mean magnitude of the three frequency bands
///
/// Each field lies in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BandEnergy {
    /// Breath noise concentrates here
    pub low: f32,
    pub mid: f32,
    /// Hiss, sibilants and clicks
    pub high: f32,
}

impl BandEnergy {
    pub fn new(low: f32, mid: f32, high: f32) -> Self {
        Self { low, mid, high }
    }
}
