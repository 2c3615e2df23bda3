//! FFT spectrum analysis for visualization
//!
//! Runs off the mix path on a copy of recent samples. Output is the
//! magnitude of the first `fft_size / 2` bins in decibels.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Added to every magnitude so silence maps to a finite floor
const MAGNITUDE_EPSILON: f32 = 1e-10;

/// Smallest FFT the analyzer will plan
pub const MIN_FFT_SIZE: usize = 16;

/// Per-bin magnitudes in dB from one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSnapshot {
    pub bins: Vec<f32>,
    pub fft_size: usize,
    pub sample_rate: u32,
}

impl SpectrumSnapshot {
    /// All bins at the silence floor
    pub fn silent(fft_size: usize, sample_rate: u32) -> Self {
        Self {
            bins: vec![20.0 * MAGNITUDE_EPSILON.log10(); fft_size / 2],
            fft_size,
            sample_rate,
        }
    }

    /// Center frequency of bin `index` in Hz
    pub fn bin_frequency(&self, index: usize) -> f32 {
        bin_frequency(index, self.sample_rate, self.fft_size)
    }

    /// Loudest bin as `(frequency, dB)`
    pub fn peak(&self) -> Option<(f32, f32)> {
        self.bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, db)| (self.bin_frequency(i), *db))
    }
}

/// Frequency of bin `index`: `index * sample_rate / fft_size`
pub fn bin_frequency(index: usize, sample_rate: u32, fft_size: usize) -> f32 {
    index as f32 * sample_rate as f32 / fft_size.max(1) as f32
}

/// Hann-windowed magnitude analyzer
///
/// Every buffer is allocated at construction; [`analyze`](Self::analyze)
/// does not allocate.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    spectrum: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(MIN_FFT_SIZE);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let denom = (fft_size - 1) as f32;
        let window = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / denom).cos()))
            .collect();

        debug!("Spectrum analyzer planned for {} points", fft_size);

        Self {
            fft,
            window,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
            spectrum: vec![20.0 * MAGNITUDE_EPSILON.log10(); fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Analyze the first `fft_size` samples of `samples`
    ///
    /// A window shorter than the FFT leaves the previous result untouched.
    pub fn analyze(&mut self, samples: &[f32]) -> &[f32] {
        let n = self.fft_size();
        if samples.len() < n {
            return &self.spectrum;
        }

        for ((slot, &sample), &w) in self.buffer.iter_mut().zip(samples).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        // Forward transform scaled by 1/n
        let scale = 1.0 / n as f32;
        for (db, bin) in self.spectrum.iter_mut().zip(&self.buffer) {
            let magnitude = bin.norm() * scale;
            *db = 20.0 * (magnitude + MAGNITUDE_EPSILON).log10();
        }

        &self.spectrum
    }

    /// Current result as an owned snapshot
    pub fn snapshot(&self, sample_rate: u32) -> SpectrumSnapshot {
        SpectrumSnapshot {
            bins: self.spectrum.clone(),
            fft_size: self.fft_size(),
            sample_rate,
        }
    }

    /// Frequencies of every reported bin
    pub fn frequency_bins(&self, sample_rate: u32) -> Vec<f32> {
        (0..self.spectrum.len())
            .map(|i| bin_frequency(i, sample_rate, self.fft_size()))
            .collect()
    }
}
