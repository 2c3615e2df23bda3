//! Ordered, strongly-typed effect chain
//!
//! Effects form a closed set: [`EffectParams`] names the variant and carries
//! its parameter record, [`EffectUnit`] is the matching processor. Dispatch is
//! a `match`, never a name lookup.

use super::{
    process_guarded, Compressor, CompressorParams, Distortion, DistortionParams, DspError, Effect,
    Result, Reverb, ReverbParams, MAX_BLOCK,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Most effects a single chain will hold
pub const MAX_EFFECTS: usize = 16;

/// Identifier of an effect inside its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectId(pub u64);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fx-{}", self.0)
    }
}

/// Effect variant together with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum EffectParams {
    Compressor(CompressorParams),
    Distortion(DistortionParams),
    Reverb(ReverbParams),
}

impl EffectParams {
    /// Variant name, as used in logs and snapshots
    pub fn kind(&self) -> &'static str {
        match self {
            EffectParams::Compressor(_) => "Compressor",
            EffectParams::Distortion(_) => "Distortion",
            EffectParams::Reverb(_) => "Reverb",
        }
    }

    #[must_use]
    pub fn sanitized(self) -> Self {
        match self {
            EffectParams::Compressor(p) => EffectParams::Compressor(p.sanitized()),
            EffectParams::Distortion(p) => EffectParams::Distortion(p.sanitized()),
            EffectParams::Reverb(p) => EffectParams::Reverb(p.sanitized()),
        }
    }

    /// Whether both values are the same variant
    pub fn same_kind(&self, other: &EffectParams) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Build a fresh processor
    pub fn build(&self) -> EffectUnit {
        match *self {
            EffectParams::Compressor(p) => EffectUnit::Compressor(Compressor::new(p)),
            EffectParams::Distortion(p) => EffectUnit::Distortion(Distortion::new(p)),
            EffectParams::Reverb(p) => EffectUnit::Reverb(Reverb::new(p)),
        }
    }
}

impl From<CompressorParams> for EffectParams {
    fn from(p: CompressorParams) -> Self {
        EffectParams::Compressor(p)
    }
}

impl From<DistortionParams> for EffectParams {
    fn from(p: DistortionParams) -> Self {
        EffectParams::Distortion(p)
    }
}

impl From<ReverbParams> for EffectParams {
    fn from(p: ReverbParams) -> Self {
        EffectParams::Reverb(p)
    }
}

/// Processor for one effect variant
#[derive(Debug, Clone)]
pub enum EffectUnit {
    Compressor(Compressor),
    Distortion(Distortion),
    Reverb(Reverb),
}

impl EffectUnit {
    pub fn params(&self) -> EffectParams {
        match self {
            EffectUnit::Compressor(u) => EffectParams::Compressor(u.params()),
            EffectUnit::Distortion(u) => EffectParams::Distortion(u.params()),
            EffectUnit::Reverb(u) => EffectParams::Reverb(u.params()),
        }
    }

    /// Apply parameters of the same variant
    ///
    /// Returns `false` and leaves the unit untouched on a variant mismatch.
    pub fn set_params(&mut self, params: EffectParams) -> bool {
        match (self, params) {
            (EffectUnit::Compressor(u), EffectParams::Compressor(p)) => u.set_params(p),
            (EffectUnit::Distortion(u), EffectParams::Distortion(p)) => u.set_params(p),
            (EffectUnit::Reverb(u), EffectParams::Reverb(p)) => u.set_params(p),
            _ => return false,
        }
        true
    }

    fn as_effect(&mut self) -> &mut dyn Effect {
        match self {
            EffectUnit::Compressor(u) => u,
            EffectUnit::Distortion(u) => u,
            EffectUnit::Reverb(u) => u,
        }
    }

    fn as_effect_ref(&self) -> &dyn Effect {
        match self {
            EffectUnit::Compressor(u) => u,
            EffectUnit::Distortion(u) => u,
            EffectUnit::Reverb(u) => u,
        }
    }
}

impl Effect for EffectUnit {
    fn process(&mut self, buffer: &mut [f32]) -> Result<()> {
        self.as_effect().process(buffer)
    }

    fn reset(&mut self) {
        self.as_effect().reset();
    }

    fn is_bypassed(&self) -> bool {
        self.as_effect_ref().is_bypassed()
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.as_effect().set_bypass(bypass);
    }

    fn name(&self) -> &'static str {
        self.as_effect_ref().name()
    }
}

/// One entry of a chain: the unit plus its enabled flag
#[derive(Debug, Clone)]
pub struct EffectSlot {
    pub id: EffectId,
    pub enabled: bool,
    failed: bool,
    pub unit: EffectUnit,
}

impl EffectSlot {
    pub fn new(id: EffectId, params: EffectParams) -> Self {
        Self {
            id,
            enabled: true,
            failed: false,
            unit: params.build(),
        }
    }

    /// Whether the unit failed and is bypassed for good
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    fn is_active(&self) -> bool {
        self.enabled && !self.failed && !self.unit.is_bypassed()
    }
}

/// Effects applied in insertion order
///
/// Slots are boxed so inserting and removing only moves pointers; both
/// happen between reads, never during one.
pub struct EffectChain {
    slots: Vec<Box<EffectSlot>>,
    dry: Vec<f32>,
}

impl Default for EffectChain {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectChain {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(MAX_EFFECTS),
            dry: vec![0.0; MAX_BLOCK],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append a slot; hands it back when the chain is full
    pub fn push(&mut self, slot: Box<EffectSlot>) -> std::result::Result<(), Box<EffectSlot>> {
        if self.slots.len() >= MAX_EFFECTS {
            return Err(slot);
        }
        self.slots.push(slot);
        Ok(())
    }

    pub fn remove(&mut self, id: EffectId) -> Option<Box<EffectSlot>> {
        let index = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(index))
    }

    pub fn get(&self, id: EffectId) -> Option<&EffectSlot> {
        self.slots.iter().find(|s| s.id == id).map(|s| &**s)
    }

    pub fn get_mut(&mut self, id: EffectId) -> Option<&mut EffectSlot> {
        self.slots.iter_mut().find(|s| s.id == id).map(|s| &mut **s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectSlot> {
        self.slots.iter().map(|s| &**s)
    }

    /// Run every active slot over `block` in order
    ///
    /// A slot that fails gets its input back for this block, is latched as
    /// failed, and is reported through `on_fault` with its id and unit name.
    pub fn process(
        &mut self,
        block: &mut [f32],
        mut on_fault: impl FnMut(EffectId, &'static str, DspError),
    ) {
        for slot in self.slots.iter_mut().filter(|s| s.is_active()) {
            if let Err(err) = process_guarded(&mut slot.unit, block, &mut self.dry) {
                slot.failed = true;
                on_fault(slot.id, slot.unit.name(), err);
            }
        }
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.unit.reset();
        }
    }
}
