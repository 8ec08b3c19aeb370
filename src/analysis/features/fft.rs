// FFT module - turns raw samples into byte magnitude frames
//
// Keeps a rolling window of the most recent `fft_size` samples. On every
// frame request the window is Hann-weighted, transformed, smoothed against
// the previous spectrum and mapped from decibels onto 0..=255, so frames
// look the same whether they come from a live microphone or a WAV replay.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::types::{AnalysisFrame, MAX_MAGNITUDE};
use crate::config::AnalyserConfig;

/// Rolling spectrum analyser producing [`AnalysisFrame`]s
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    /// Hann window (pre-computed)
    window: Vec<f32>,
    /// Circular buffer of the latest samples; `write_pos` is the oldest
    time_domain: Vec<f32>,
    write_pos: usize,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothing_time_constant: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl SpectrumAnalyser {
    /// Create an analyser for the given configuration
    ///
    /// `fft_size` is expected to be validated already (power of two).
    pub fn new(config: &AnalyserConfig) -> Self {
        let fft_size = config.fft_size;
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        // Pre-compute Hann window to reduce spectral leakage
        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (fft_size as f32 - 1.0)).cos())
            })
            .collect();

        Self {
            fft,
            fft_size,
            window,
            time_domain: vec![0.0; fft_size],
            write_pos: 0,
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothing_time_constant: config.smoothing_time_constant,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
        }
    }

    /// Number of bins in the frames this analyser produces
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Append mono samples to the rolling window
    pub fn push_samples(&mut self, samples: &[f32]) {
        // Only the tail can survive in the window
        let start = samples.len().saturating_sub(self.fft_size);
        for &sample in &samples[start..] {
            self.time_domain[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Compute the current spectrum into `frame`
    pub fn fill_frame(&mut self, frame: &mut AnalysisFrame) {
        let n = self.fft_size;

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = self.time_domain[(self.write_pos + i) % n];
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let tau = self.smoothing_time_constant;
        let range = self.max_decibels - self.min_decibels;
        frame.resize(self.bin_count());

        for (k, bin) in frame.bins_mut().iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() / n as f32;
            self.smoothed[k] = tau * self.smoothed[k] + (1.0 - tau) * magnitude;

            let level = self.smoothed[k];
            *bin = if level <= f32::MIN_POSITIVE {
                0
            } else {
                let db = 20.0 * level.log10();
                let scaled = (db - self.min_decibels) / range * MAX_MAGNITUDE as f32;
                scaled.clamp(0.0, MAX_MAGNITUDE as f32) as u8
            };
        }
    }
}
