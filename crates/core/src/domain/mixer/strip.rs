//! Real-time half of a mixer channel

use super::{ChannelId, ChannelShared, ProcessingFault, Retired};
use crate::domain::audio::StreamFormat;
use crate::domain::dsp::{
    process_guarded, EffectChain, EffectId, EffectParams, EffectSlot, Equalizer, EqualizerCoeffs,
    MAX_BLOCK,
};
use crate::domain::stream::SampleStream;
use std::sync::Arc;

/// Processing path of one channel:
/// source → gain → equalizer → effect chain
///
/// Owned by the [`MasterStream`](super::MasterStream) and only touched on
/// the audio thread. All buffers are sized at construction.
pub struct ChannelStrip {
    id: ChannelId,
    shared: Arc<ChannelShared>,
    source: Option<Box<dyn SampleStream>>,
    equalizer: Equalizer,
    eq_failed: bool,
    chain: EffectChain,
    dry: Vec<f32>,
}

impl ChannelStrip {
    pub(crate) fn new(id: ChannelId, shared: Arc<ChannelShared>, format: StreamFormat) -> Self {
        Self {
            id,
            shared,
            source: None,
            equalizer: Equalizer::flat(format.hz(), format.stride()),
            eq_failed: false,
            chain: EffectChain::new(),
            dry: vec![0.0; MAX_BLOCK],
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn chain(&self) -> &EffectChain {
        &self.chain
    }

    /// Pull one block through the strip
    ///
    /// Returns `None` when no source is bound. Otherwise returns the number
    /// of samples the source produced; the rest of `block` is zero-filled
    /// and still runs through the effects so tails can ring out.
    pub fn read_processed(
        &mut self,
        block: &mut [f32],
        mut report: impl FnMut(ProcessingFault),
    ) -> Option<usize> {
        let source = self.source.as_mut()?;
        let len = block.len().min(MAX_BLOCK);
        let block = &mut block[..len];

        let produced = source.read(block);
        block[produced..].fill(0.0);

        let gain = self.shared.gain();
        for sample in block.iter_mut() {
            *sample *= gain;
        }

        let channel = self.id;
        if !self.eq_failed {
            if let Err(error) = process_guarded(&mut self.equalizer, block, &mut self.dry) {
                self.eq_failed = true;
                report(ProcessingFault {
                    channel,
                    effect: None,
                    unit: "Equalizer",
                    error,
                });
            }
        }

        self.chain.process(block, |effect, unit, error| {
            report(ProcessingFault {
                channel,
                effect: Some(effect),
                unit,
                error,
            })
        });

        let peak = block.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        self.shared.set_peak(peak);

        Some(produced)
    }

    // ------------------------------------------------------------------
    // Command application. Each returns whatever it displaced.
    // ------------------------------------------------------------------

    pub(crate) fn replace_source(
        &mut self,
        source: Option<Box<dyn SampleStream>>,
    ) -> Option<Retired> {
        let old = std::mem::replace(&mut self.source, source);
        if self.source.is_none() {
            self.shared.set_peak(0.0);
        }
        old.map(Retired::Source)
    }

    pub(crate) fn set_equalizer(&mut self, coeffs: &EqualizerCoeffs) {
        self.equalizer.set_coeffs(coeffs);
    }

    pub(crate) fn add_effect(&mut self, slot: Box<EffectSlot>) -> Option<Retired> {
        self.chain.push(slot).err().map(Retired::Effect)
    }

    pub(crate) fn remove_effect(&mut self, id: EffectId) -> Option<Retired> {
        self.chain.remove(id).map(Retired::Effect)
    }

    pub(crate) fn set_effect_enabled(&mut self, id: EffectId, enabled: bool) {
        if let Some(slot) = self.chain.get_mut(id) {
            slot.enabled = enabled;
        }
    }

    pub(crate) fn set_effect_params(&mut self, id: EffectId, params: EffectParams) {
        if let Some(slot) = self.chain.get_mut(id) {
            slot.unit.set_params(params);
        }
    }
}
