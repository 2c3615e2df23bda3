//! 7-band graphic equalizer built from peaking biquads
//!
//! [`EqualizerSettings`] is the control-side value (seven gains in dB).
//! [`EqualizerCoeffs`] is the derived coefficient set, computed off the
//! audio thread and handed to [`Equalizer::set_coeffs`] as one unit, so the
//! audio thread sees either the old or the new set, never a mix.

use super::{clamp_or, params, BiquadCoeffs, BiquadFilter, Effect, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// The seven fixed equalizer bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EqBand {
    Hz60,
    Hz170,
    Hz310,
    Hz600,
    Hz1k,
    Hz3k,
    Hz6k,
}

impl EqBand {
    pub const ALL: [EqBand; 7] = [
        EqBand::Hz60,
        EqBand::Hz170,
        EqBand::Hz310,
        EqBand::Hz600,
        EqBand::Hz1k,
        EqBand::Hz3k,
        EqBand::Hz6k,
    ];

    /// Center frequency in Hz
    pub fn frequency(self) -> f32 {
        match self {
            EqBand::Hz60 => 60.0,
            EqBand::Hz170 => 170.0,
            EqBand::Hz310 => 310.0,
            EqBand::Hz600 => 600.0,
            EqBand::Hz1k => 1000.0,
            EqBand::Hz3k => 3000.0,
            EqBand::Hz6k => 6000.0,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Per-band gains in decibels, each clamped to [-20, +20]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EqualizerSettings {
    bands: [f32; 7],
}

impl EqualizerSettings {
    /// All bands at 0 dB
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn from_gains(gains: [f32; 7]) -> Self {
        let mut settings = Self::flat();
        for (band, gain) in EqBand::ALL.into_iter().zip(gains) {
            settings.set_gain(band, gain);
        }
        settings
    }

    pub fn gain(&self, band: EqBand) -> f32 {
        self.bands[band.index()]
    }

    /// Set a band gain, returning the clamped value actually stored
    pub fn set_gain(&mut self, band: EqBand, gain_db: f32) -> f32 {
        let gain = clamp_or(gain_db, params::EQ_GAIN_MIN, params::EQ_GAIN_MAX, 0.0);
        self.bands[band.index()] = gain;
        gain
    }

    pub fn gains(&self) -> [f32; 7] {
        self.bands
    }

    pub fn is_flat(&self) -> bool {
        self.bands.iter().all(|&g| g == 0.0)
    }

    pub fn reset(&mut self) {
        self.bands = [0.0; 7];
    }

    /// Derive the full coefficient set for a sample rate
    pub fn coefficients(&self, sample_rate: u32) -> EqualizerCoeffs {
        let sr = sample_rate as f32;
        let bands = EqBand::ALL.map(|band| {
            BiquadCoeffs::peaking(sr, band.frequency(), self.gain(band), params::EQ_Q)
        });

        trace!(
            "EQ coefficients rebuilt at {} Hz: {:?} dB",
            sample_rate,
            self.bands
        );

        EqualizerCoeffs { bands }
    }
}

/// Coefficients for all seven bands, published as one value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqualizerCoeffs {
    bands: [BiquadCoeffs; 7],
}

impl EqualizerCoeffs {
    pub fn band(&self, band: EqBand) -> BiquadCoeffs {
        self.bands[band.index()]
    }
}

/// Real-time equalizer processor
///
/// One bank of seven cascaded filters per interleaved channel.
#[derive(Debug, Clone)]
pub struct Equalizer {
    bypass: bool,
    banks: Vec<[BiquadFilter; 7]>,
}

impl Equalizer {
    /// Create an equalizer for `channels` interleaved channels
    pub fn new(coeffs: &EqualizerCoeffs, channels: usize) -> Self {
        let bank = coeffs.bands.map(BiquadFilter::new);
        Self {
            bypass: false,
            banks: vec![bank; channels.max(1)],
        }
    }

    /// Flat equalizer (identity transform)
    pub fn flat(sample_rate: u32, channels: usize) -> Self {
        Self::new(&EqualizerSettings::flat().coefficients(sample_rate), channels)
    }

    /// Swap in a complete coefficient set
    ///
    /// Filter memories are kept so the change does not click.
    pub fn set_coeffs(&mut self, coeffs: &EqualizerCoeffs) {
        for bank in &mut self.banks {
            for (filter, c) in bank.iter_mut().zip(coeffs.bands) {
                filter.set_coeffs(c);
            }
        }
    }

    pub fn channels(&self) -> usize {
        self.banks.len()
    }
}

impl Effect for Equalizer {
    fn process(&mut self, buffer: &mut [f32]) -> Result<()> {
        if self.bypass {
            return Ok(());
        }

        let channels = self.banks.len();
        for frame in buffer.chunks_mut(channels) {
            for (sample, bank) in frame.iter_mut().zip(self.banks.iter_mut()) {
                let mut s = *sample;
                for filter in bank.iter_mut() {
                    s = filter.process_sample(s);
                }
                *sample = s;
            }
        }

        Ok(())
    }

    fn reset(&mut self) {
        for bank in &mut self.banks {
            for filter in bank.iter_mut() {
                filter.reset();
            }
        }
    }

    fn is_bypassed(&self) -> bool {
        self.bypass
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
        if bypass {
            self.reset();
        }
    }

    fn name(&self) -> &'static str {
        "Equalizer"
    }
}
