//! Reverb from eight parallel damped feedback delay lines

use super::{clamp_or, Effect, Result};
use serde::{Deserialize, Serialize};

/// Delay line lengths in samples
pub const DELAY_LENGTHS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    /// Feedback amount written back into each line
    pub room_size: f32,
    /// One-pole smoothing of the feedback path
    pub damping: f32,
    pub wet_level: f32,
    pub dry_level: f32,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            room_size: 0.5,
            damping: 0.5,
            wet_level: 0.3,
            dry_level: 0.7,
        }
    }
}

impl ReverbParams {
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            room_size: clamp_or(self.room_size, 0.0, 1.0, defaults.room_size),
            damping: clamp_or(self.damping, 0.0, 1.0, defaults.damping),
            wet_level: clamp_or(self.wet_level, 0.0, 1.0, defaults.wet_level),
            dry_level: clamp_or(self.dry_level, 0.0, 1.0, defaults.dry_level),
        }
    }
}

#[derive(Debug, Clone)]
struct DelayLine {
    buffer: Box<[f32]>,
    index: usize,
    feedback: f32,
}

impl DelayLine {
    fn new(length: usize) -> Self {
        Self {
            buffer: vec![0.0; length].into_boxed_slice(),
            index: 0,
            feedback: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, room_size: f32, damping: f32) -> f32 {
        let output = self.buffer[self.index];
        self.feedback = output * (1.0 - damping) + self.feedback * damping;
        self.buffer[self.index] = input + self.feedback * room_size;

        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
        self.feedback = 0.0;
    }
}

/// Reverb unit
///
/// One set of eight lines runs over the interleaved stream, so channels of
/// a multichannel strip feed the same tank.
#[derive(Debug, Clone)]
pub struct Reverb {
    params: ReverbParams,
    lines: [DelayLine; 8],
    bypass: bool,
}

impl Reverb {
    pub fn new(params: ReverbParams) -> Self {
        Self {
            params: params.sanitized(),
            lines: DELAY_LENGTHS.map(DelayLine::new),
            bypass: false,
        }
    }

    pub fn params(&self) -> ReverbParams {
        self.params
    }

    pub fn set_params(&mut self, params: ReverbParams) {
        self.params = params.sanitized();
    }
}

impl Effect for Reverb {
    fn process(&mut self, buffer: &mut [f32]) -> Result<()> {
        if self.bypass {
            return Ok(());
        }

        let p = self.params;
        let scale = 1.0 / DELAY_LENGTHS.len() as f32;

        for sample in buffer.iter_mut() {
            let input = *sample;
            let wet: f32 = self
                .lines
                .iter_mut()
                .map(|line| line.process(input, p.room_size, p.damping))
                .sum::<f32>()
                * scale;

            *sample = if p.wet_level == 0.0 {
                input * p.dry_level
            } else {
                input * p.dry_level + wet * p.wet_level
            };
        }

        Ok(())
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.clear();
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
        "Reverb"
    }
}
