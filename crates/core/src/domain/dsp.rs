//! Digital Signal Processing effects for audio processing
//!
//! This module provides the channel-strip processing units:
//! - 7-band Equalizer (cascaded peaking biquads)
//! - Envelope-following Compressor
//! - Distortion (overdrive, fuzz, tanh saturation)
//! - Reverb (eight parallel feedback delay lines)
//!
//! All effects are designed for:
//! - Zero allocations in the hot path (state is sized at construction)
//! - Interleaved buffers of any channel count
//! - Errors that never unwind: a failing unit is restored and bypassed

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod chain;
mod compressor;
mod distortion;
mod equalizer;
mod reverb;

pub use chain::{EffectChain, EffectId, EffectParams, EffectSlot, EffectUnit, MAX_EFFECTS};
pub use compressor::{Compressor, CompressorParams};
pub use distortion::{Distortion, DistortionMode, DistortionParams};
pub use equalizer::{EqBand, Equalizer, EqualizerCoeffs, EqualizerSettings};
pub use reverb::{Reverb, ReverbParams};

/// Largest block a unit is asked to process at once
///
/// Streams chunk larger reads so scratch buffers can be sized once.
pub const MAX_BLOCK: usize = 4096;

/// Errors raised by DSP units in the real-time path
///
/// `Copy` and allocation-free so it can be reported from the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DspError {
    /// Processing produced NaN or infinity
    #[error("{unit} produced a non-finite sample")]
    NonFiniteOutput { unit: &'static str },

    /// Block exceeds the preallocated scratch space
    #[error("block of {len} samples exceeds the {max} sample limit")]
    BlockTooLarge { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, DspError>;

/// Core trait for all audio effects
///
/// All effects process interleaved audio in-place on f32 buffers normalized
/// to [-1.0, 1.0].
pub trait Effect: Send {
    /// Process a buffer of audio samples in-place
    ///
    /// # Requirements
    /// - No allocations in the hot path
    /// - Handle buffer of any size up to [`MAX_BLOCK`]
    fn process(&mut self, buffer: &mut [f32]) -> Result<()>;

    /// Reset effect state to initial conditions
    ///
    /// Clears envelopes, filter memories and delay lines.
    fn reset(&mut self);

    /// Check if effect is bypassed (zero processing overhead when true)
    fn is_bypassed(&self) -> bool;

    /// Toggle bypass state
    fn set_bypass(&mut self, bypass: bool);

    /// Get effect name for debugging/display
    fn name(&self) -> &'static str;
}

/// Run `unit` over `block`, restoring the input if it fails
///
/// `dry` must hold at least `block.len()` samples. Non-finite output counts
/// as a failure.
pub fn process_guarded<E: Effect + ?Sized>(
    unit: &mut E,
    block: &mut [f32],
    dry: &mut [f32],
) -> Result<()> {
    if block.len() > dry.len() {
        return Err(DspError::BlockTooLarge {
            len: block.len(),
            max: dry.len(),
        });
    }

    let dry = &mut dry[..block.len()];
    dry.copy_from_slice(block);

    let outcome = unit.process(block).and_then(|()| {
        if block.iter().all(|s| s.is_finite()) {
            Ok(())
        } else {
            Err(DspError::NonFiniteOutput { unit: unit.name() })
        }
    });

    if outcome.is_err() {
        block.copy_from_slice(dry);
        unit.reset();
    }
    outcome
}

/// Parameter constraints for DSP effects
///
/// All parameters are clamped to these ranges to prevent
/// invalid states and ensure numerical stability.
pub mod params {
    /// Equalizer band gain range (dB)
    pub const EQ_GAIN_MIN: f32 = -20.0;
    pub const EQ_GAIN_MAX: f32 = 20.0;

    /// Bandwidth of every equalizer band
    pub const EQ_Q: f32 = 1.0;

    /// Compressor threshold range (linear amplitude)
    pub const THRESHOLD_MIN: f32 = 0.001;
    pub const THRESHOLD_MAX: f32 = 1.0;

    /// Compressor ratio range (1:1 to 20:1)
    pub const RATIO_MIN: f32 = 1.0;
    pub const RATIO_MAX: f32 = 20.0;

    /// Envelope smoothing coefficients, applied once per sample
    pub const SMOOTHING_MIN: f32 = 0.000_001;
    pub const SMOOTHING_MAX: f32 = 1.0;

    /// Linear make-up gain (+24 dB ceiling)
    pub const MAKEUP_MIN: f32 = 0.0;
    pub const MAKEUP_MAX: f32 = 15.85;
}

/// Clamp to `[min, max]`, mapping NaN to `fallback`
#[inline]
pub(crate) fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

// ============================================================================
// BIQUAD FILTER (Low-level IIR filter for EQ)
// ============================================================================

/// Biquad filter coefficients
///
/// Direct Form I implementation for numerical stability.
/// Coefficients are pre-computed to avoid per-sample calculations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

impl BiquadCoeffs {
    /// Calculate coefficients for a peaking EQ filter (Audio EQ Cookbook)
    ///
    /// Boosts or cuts frequencies around a center frequency.
    ///
    /// # Parameters
    /// - `sample_rate`: Audio sample rate in Hz
    /// - `freq`: Center frequency in Hz, kept below Nyquist
    /// - `gain_db`: Boost/cut in decibels (clamped to +/- 20dB)
    /// - `q`: Bandwidth as Q factor
    #[must_use]
    pub fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let gain_db = clamp_or(gain_db, params::EQ_GAIN_MIN, params::EQ_GAIN_MAX, 0.0);
        if gain_db == 0.0 {
            // Exact pass-through rather than a filter that cancels itself
            return Self::default();
        }

        let freq = freq.clamp(1.0, sample_rate * 0.49);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;

        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        // Normalize by a0
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Stateful biquad filter using Direct Form I
///
/// Direct Form I keeps the input history separate from the output history,
/// so swapping coefficients between blocks does not disturb the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    // Previous input samples (x[n-1], x[n-2])
    x1: f32,
    x2: f32,
    // Previous output samples (y[n-1], y[n-2])
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    /// Create a new biquad filter with given coefficients
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Create a bypass filter (unity gain)
    pub fn bypass() -> Self {
        Self::new(BiquadCoeffs::default())
    }

    /// Update filter coefficients
    ///
    /// Only called between blocks, never per sample.
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> BiquadCoeffs {
        self.coeffs
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        // Direct Form I: y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2]
        //                        - a1*y[n-1] - a2*y[n-2]
        let y = self.coeffs.b0 * x + self.coeffs.b1 * self.x1 + self.coeffs.b2 * self.x2
            - self.coeffs.a1 * self.y1
            - self.coeffs.a2 * self.y2;

        // Update state
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }

    /// Process a buffer of mono samples
    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}
