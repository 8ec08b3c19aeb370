// Band energy extraction for blow detection
//
// Reduces an AnalysisFrame to three band energies (low, mid, high). Bands are
// defined by bin counts at a reference resolution of 128 bins (FFT size 256):
// low = first 15 bins, mid = next 30, high = the rest. Frames at other
// resolutions get proportionally rescaled boundaries so the bands keep
// covering the same physical frequency ranges.
//
// Module organization:
// - types: Data structures (AnalysisFrame, BandEnergy)
// - fft: Sample window → byte magnitude spectrum (SpectrumAnalyser)
// - mod.rs: Band layout and extraction

mod fft;
mod types;

pub use fft::SpectrumAnalyser;
pub use types::{AnalysisFrame, BandEnergy, MAX_MAGNITUDE};

/// Bin count the band sizes below are defined against
pub const REFERENCE_BIN_COUNT: usize = 128;

/// Low band width at the reference resolution
pub const LOW_BAND_BINS: usize = 15;

/// Mid band width at the reference resolution
pub const MID_BAND_BINS: usize = 30;

/// Bin boundaries of the three bands for one frame length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandLayout {
    bin_count: usize,
    low_end: usize,
    mid_end: usize,
}

impl BandLayout {
    /// Layout for frames of `bin_count` bins
    pub fn for_bin_count(bin_count: usize) -> Self {
        let scale = |bins: usize| -> usize {
            if bin_count == REFERENCE_BIN_COUNT {
                bins
            } else {
                ((bins * bin_count) as f64 / REFERENCE_BIN_COUNT as f64).round() as usize
            }
        };

        let low_end = scale(LOW_BAND_BINS).max(1).min(bin_count);
        let mid_end = (low_end + scale(MID_BAND_BINS).max(1)).min(bin_count);

        Self {
            bin_count,
            low_end,
            mid_end,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Exclusive end of the low band
    pub fn low_end(&self) -> usize {
        self.low_end
    }

    /// Exclusive end of the mid band
    pub fn mid_end(&self) -> usize {
        self.mid_end
    }

    /// Reduce `bins` to band energies
    ///
    /// `bins` must have `bin_count` entries.
    pub fn split(&self, bins: &[u8]) -> BandEnergy {
        debug_assert_eq!(bins.len(), self.bin_count);
        BandEnergy {
            low: band_mean(&bins[..self.low_end]),
            mid: band_mean(&bins[self.low_end..self.mid_end]),
            high: band_mean(&bins[self.mid_end..]),
        }
    }
}

/// Mean of `bins` normalized by the largest representable magnitude
fn band_mean(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    sum as f32 / bins.len() as f32 / MAX_MAGNITUDE as f32
}

/// Reduce a frame to band energies
///
/// Pure function of the frame; the layout is derived from the frame length.
pub fn extract(frame: &AnalysisFrame) -> BandEnergy {
    BandLayout::for_bin_count(frame.len()).split(frame.bins())
}

/// Extractor that caches the band layout between frames
///
/// Produces the same result as [`extract`]; the layout is recomputed only
/// when the frame length changes.
#[derive(Debug, Default)]
pub struct BandExtractor {
    layout: Option<BandLayout>,
}

impl BandExtractor {
    pub fn new() -> Self {
        Self { layout: None }
    }

    pub fn extract(&mut self, frame: &AnalysisFrame) -> BandEnergy {
        let layout = match self.layout {
            Some(layout) if layout.bin_count() == frame.len() => layout,
            _ => {
                let layout = BandLayout::for_bin_count(frame.len());
                tracing::debug!(
                    "[BandExtractor] Layout for {} bins: low 0..{}, mid {}..{}, high {}..{}",
                    frame.len(),
                    layout.low_end(),
                    layout.low_end(),
                    layout.mid_end(),
                    layout.mid_end(),
                    frame.len()
                );
                self.layout = Some(layout);
                layout
            }
        };
        layout.split(frame.bins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_layout() {
        let layout = BandLayout::for_bin_count(REFERENCE_BIN_COUNT);
        assert_eq!(layout.low_end(), 15);
        assert_eq!(layout.mid_end(), 45);
    }

    #[test]
    fn test_layout_rescales_with_resolution() {
        let layout = BandLayout::for_bin_count(256);
        assert_eq!(layout.low_end(), 30);
        assert_eq!(layout.mid_end(), 90);

        let layout = BandLayout::for_bin_count(64);
        assert_eq!(layout.low_end(), 8);
        assert_eq!(layout.mid_end(), 23);
    }

    #[test]
    fn test_tiny_frames_do_not_overflow() {
        let layout = BandLayout::for_bin_count(2);
        assert!(layout.low_end() <= 2);
        assert!(layout.mid_end() <= 2);

        let energy = extract(&AnalysisFrame::zeroed(0));
        assert_eq!(energy, BandEnergy::default());
    }

    #[test]
    fn test_extract_band_means() {
        let mut bins = vec![0u8; 128];
        bins[..15].iter_mut().for_each(|b| *b = 255);
        bins[15..45].iter_mut().for_each(|b| *b = 51);
        let energy = extract(&AnalysisFrame::new(bins));

        assert!((energy.low - 1.0).abs() < 1e-6);
        assert!((energy.mid - 0.2).abs() < 1e-6);
        assert_eq!(energy.high, 0.0);
    }

    #[test]
    fn test_extract_is_mean_not_sum() {
        // Half the low bins at full scale average to 0.5
        let mut bins = vec![0u8; 128];
        bins[..15].iter_mut().step_by(2).for_each(|b| *b = 255);
        let energy = extract(&AnalysisFrame::new(bins));
        assert!((energy.low - 8.0 / 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_band_levels_round_trip() {
        let frame = AnalysisFrame::from_band_levels(128, 0.5, 0.2, 0.1);
        let energy = extract(&frame);
        assert!((energy.low - 0.5).abs() < 0.01);
        assert!((energy.mid - 0.2).abs() < 0.01);
        assert!((energy.high - 0.1).abs() < 0.01);
    }

    #[test]
    fn test_cached_extractor_tracks_length_changes() {
        let mut extractor = BandExtractor::new();
        let small = AnalysisFrame::from_band_levels(64, 0.8, 0.1, 0.0);
        let large = AnalysisFrame::from_band_levels(256, 0.8, 0.1, 0.0);

        assert_eq!(extractor.extract(&small), extract(&small));
        assert_eq!(extractor.extract(&large), extract(&large));
        assert_eq!(extractor.extract(&small), extract(&small));
    }
}
