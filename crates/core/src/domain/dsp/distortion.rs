//! Waveshaping distortion with three voicings

use super::{clamp_or, Effect, Result};
use serde::{Deserialize, Serialize};

/// Waveshaper selected by the distortion unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistortionMode {
    /// Soft knee above a drive-dependent threshold
    #[default]
    Overdrive,
    /// Hard limit to +/-1
    Fuzz,
    /// tanh saturation
    Distortion,
}

/// Distortion parameters, all normalized to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionParams {
    pub drive: f32,
    pub tone: f32,
    pub level: f32,
    pub mode: DistortionMode,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self {
            drive: 0.5,
            tone: 0.5,
            level: 0.8,
            mode: DistortionMode::Overdrive,
        }
    }
}

impl DistortionParams {
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            drive: clamp_or(self.drive, 0.0, 1.0, defaults.drive),
            tone: clamp_or(self.tone, 0.0, 1.0, defaults.tone),
            level: clamp_or(self.level, 0.0, 1.0, defaults.level),
            mode: self.mode,
        }
    }

    /// Run one sample through every stage
    #[inline]
    pub fn shape(&self, input: f32) -> f32 {
        let drive = self.drive;
        let mut out = input * (1.0 + drive * 10.0);

        out = match self.mode {
            DistortionMode::Overdrive => {
                let threshold = 0.7 - drive * 0.4;
                let magnitude = out.abs();
                if magnitude > threshold {
                    (threshold + (magnitude - threshold) * 0.3).copysign(out)
                } else {
                    out
                }
            }
            DistortionMode::Fuzz => (out * (1.0 + drive * 5.0)).clamp(-1.0, 1.0),
            DistortionMode::Distortion => (out * (1.0 + drive * 3.0)).tanh(),
        };

        out *= 0.5 + self.tone * 0.5;
        out *= self.level;

        // NaN survives clamp, so map it to silence
        if out.is_nan() {
            0.0
        } else {
            out.clamp(-1.0, 1.0)
        }
    }
}

/// Distortion unit
///
/// Stateless apart from its parameters; works on any channel layout.
#[derive(Debug, Clone)]
pub struct Distortion {
    params: DistortionParams,
    bypass: bool,
}

impl Distortion {
    pub fn new(params: DistortionParams) -> Self {
        Self {
            params: params.sanitized(),
            bypass: false,
        }
    }

    pub fn params(&self) -> DistortionParams {
        self.params
    }

    pub fn set_params(&mut self, params: DistortionParams) {
        self.params = params.sanitized();
    }
}

impl Effect for Distortion {
    fn process(&mut self, buffer: &mut [f32]) -> Result<()> {
        if self.bypass {
            return Ok(());
        }

        let params = self.params;
        for sample in buffer.iter_mut() {
            *sample = params.shape(*sample);
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn is_bypassed(&self) -> bool {
        self.bypass
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.bypass = bypass;
    }

    fn name(&self) -> &'static str {
        "Distortion"
    }
}
