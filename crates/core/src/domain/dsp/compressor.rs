//! Envelope-following compressor

use super::{clamp_or, params, Effect, Result};
use serde::{Deserialize, Serialize};

/// Compressor parameters
///
/// `attack` and `release` are per-sample smoothing coefficients, not times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorParams {
    /// Level above which gain reduction starts (linear amplitude)
    pub threshold: f32,
    /// Compression ratio (1.0 = no compression)
    pub ratio: f32,
    pub attack: f32,
    pub release: f32,
    /// Linear gain applied after compression
    pub makeup_gain: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            ratio: 4.0,
            attack: 0.003,
            release: 0.1,
            makeup_gain: 1.0,
        }
    }
}

impl CompressorParams {
    /// Clamp every field into its valid range
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            threshold: clamp_or(
                self.threshold,
                params::THRESHOLD_MIN,
                params::THRESHOLD_MAX,
                defaults.threshold,
            ),
            ratio: clamp_or(self.ratio, params::RATIO_MIN, params::RATIO_MAX, defaults.ratio),
            attack: clamp_or(
                self.attack,
                params::SMOOTHING_MIN,
                params::SMOOTHING_MAX,
                defaults.attack,
            ),
            release: clamp_or(
                self.release,
                params::SMOOTHING_MIN,
                params::SMOOTHING_MAX,
                defaults.release,
            ),
            makeup_gain: clamp_or(
                self.makeup_gain,
                params::MAKEUP_MIN,
                params::MAKEUP_MAX,
                defaults.makeup_gain,
            ),
        }
    }

    /// Static gain for a given envelope value
    #[inline]
    pub fn static_gain(&self, envelope: f32) -> f32 {
        if envelope <= self.threshold || self.ratio <= 1.0 {
            return 1.0;
        }
        let excess = envelope - self.threshold;
        (self.threshold + excess / self.ratio) / envelope
    }
}

/// Dynamic range compressor
///
/// A single envelope follows the interleaved stream sample by sample, so
/// every channel of a strip shares one detector and one gain curve.
#[derive(Debug, Clone)]
pub struct Compressor {
    params: CompressorParams,
    envelope: f32,
    bypass: bool,
}

impl Compressor {
    pub fn new(params: CompressorParams) -> Self {
        Self {
            params: params.sanitized(),
            envelope: 0.0,
            bypass: false,
        }
    }

    pub fn params(&self) -> CompressorParams {
        self.params
    }

    /// Replace parameters; the envelope carries over
    pub fn set_params(&mut self, params: CompressorParams) {
        self.params = params.sanitized();
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }
}

impl Effect for Compressor {
    fn process(&mut self, buffer: &mut [f32]) -> Result<()> {
        if self.bypass {
            return Ok(());
        }

        let p = self.params;

        for sample in buffer.iter_mut() {
            let level = sample.abs();
            let coeff = if level > self.envelope { p.attack } else { p.release };
            self.envelope += (level - self.envelope) * coeff;

            *sample *= p.static_gain(self.envelope) * p.makeup_gain;
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn is_bypassed(&self) -> bool {
        self.bypass
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    fn name(&self) -> &'static str {
        "Compressor"
    }
}
