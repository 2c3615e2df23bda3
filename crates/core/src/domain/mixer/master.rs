//! Master bus: sums every channel strip into the output stream

use super::{
    AtomicF32, AudioLevel, ChannelId, ChannelStrip, MixerCommand, ProcessingFault, Retired,
    MAX_CHANNELS,
};
use crate::domain::audio::StreamFormat;
use crate::domain::dsp::{self, MAX_BLOCK};
use crate::domain::engine::PlaybackState;
use crate::domain::stream::SampleStream;
use crate::domain::tap::SampleTap;
use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Master scalars shared between the engine and the audio thread
#[derive(Debug)]
pub struct MasterParams {
    volume: AtomicF32,
    muted: AtomicBool,
    state: AtomicU8,
    peak: AtomicF32,
    /// Faults lost because the fault queue was full
    dropped_faults: AtomicU64,
    /// Retired objects freed on the audio thread because the queue was full
    dropped_retired: AtomicU64,
}

impl Default for MasterParams {
    fn default() -> Self {
        Self {
            volume: AtomicF32::new(1.0),
            muted: AtomicBool::new(false),
            state: AtomicU8::new(PlaybackState::Stopped as u8),
            peak: AtomicF32::new(0.0),
            dropped_faults: AtomicU64::new(0),
            dropped_retired: AtomicU64::new(0),
        }
    }
}

impl MasterParams {
    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub(crate) fn set_volume(&self, volume: f32) -> f32 {
        let volume = dsp::clamp_or(volume, 0.0, 1.0, 0.0);
        self.volume.store(volume);
        volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Master gain for the next block (mute wins over volume)
    #[inline]
    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            self.volume()
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Peak level of the last master block
    pub fn level(&self) -> AudioLevel {
        AudioLevel::from_amplitude(self.peak.load())
    }

    pub fn dropped_faults(&self) -> u64 {
        self.dropped_faults.load(Ordering::Relaxed)
    }

    pub fn dropped_retired(&self) -> u64 {
        self.dropped_retired.load(Ordering::Relaxed)
    }
}

/// The single stream handed to the output sink
///
/// Each read first applies every pending [`MixerCommand`], then sums the
/// strips. Outside of `Playing` it produces silence. The stream never ends.
pub struct MasterStream {
    format: StreamFormat,
    strips: Vec<Box<ChannelStrip>>,
    commands: Receiver<MixerCommand>,
    retired: Sender<Retired>,
    faults: Sender<ProcessingFault>,
    params: Arc<MasterParams>,
    tap: Arc<SampleTap>,
    scratch: Vec<f32>,
}

impl MasterStream {
    pub(crate) fn new(
        format: StreamFormat,
        commands: Receiver<MixerCommand>,
        retired: Sender<Retired>,
        faults: Sender<ProcessingFault>,
        params: Arc<MasterParams>,
        tap: Arc<SampleTap>,
    ) -> Self {
        Self {
            format,
            strips: Vec::with_capacity(MAX_CHANNELS),
            commands,
            retired,
            faults,
            params,
            tap,
            scratch: vec![0.0; MAX_BLOCK],
        }
    }

    pub fn params(&self) -> &MasterParams {
        &self.params
    }

    pub fn channel_count(&self) -> usize {
        self.strips.len()
    }

    /// Hand an object back to the control side
    ///
    /// When the retired queue is full the object is dropped right here
    /// and counted.
    fn retire(&self, item: Retired) {
        if self.retired.try_send(item).is_err() {
            self.params.dropped_retired.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn strip_mut(&mut self, id: ChannelId) -> Option<&mut ChannelStrip> {
        self.strips
            .iter_mut()
            .find(|s| s.id() == id)
            .map(|s| &mut **s)
    }

    /// Apply everything the control path queued since the last read
    pub(crate) fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            if let Some(displaced) = self.apply(command) {
                self.retire(displaced);
            }
        }
    }

    fn apply(&mut self, command: MixerCommand) -> Option<Retired> {
        match command {
            MixerCommand::AddStrip(strip) => {
                if self.strips.len() >= MAX_CHANNELS {
                    return Some(Retired::Strip(strip));
                }
                self.strips.push(strip);
                None
            }
            MixerCommand::RemoveStrip(id) => {
                let index = self.strips.iter().position(|s| s.id() == id)?;
                Some(Retired::Strip(self.strips.remove(index)))
            }
            MixerCommand::SetSource(id, source) => match self.strip_mut(id) {
                Some(strip) => strip.replace_source(Some(source)),
                None => Some(Retired::Source(source)),
            },
            MixerCommand::ClearSource(id) => self.strip_mut(id)?.replace_source(None),
            MixerCommand::SetEqualizer(id, coeffs) => {
                self.strip_mut(id)?.set_equalizer(&coeffs);
                None
            }
            MixerCommand::AddEffect(id, slot) => match self.strip_mut(id) {
                Some(strip) => strip.add_effect(slot),
                None => Some(Retired::Effect(slot)),
            },
            MixerCommand::RemoveEffect(id, effect) => self.strip_mut(id)?.remove_effect(effect),
            MixerCommand::SetEffectEnabled(id, effect, enabled) => {
                self.strip_mut(id)?.set_effect_enabled(effect, enabled);
                None
            }
            MixerCommand::SetEffectParams(id, effect, params) => {
                self.strip_mut(id)?.set_effect_params(effect, params);
                None
            }
        }
    }

    /// Sum every strip into `out`, then apply master gain
    fn mix(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        let stride = self.format.stride();
        let block_len = (MAX_BLOCK - MAX_BLOCK % stride).max(stride);
        let faults = &self.faults;
        let params = &self.params;
        let scratch = &mut self.scratch;

        for chunk in out.chunks_mut(block_len) {
            let scratch = &mut scratch[..chunk.len()];
            for strip in self.strips.iter_mut() {
                let contributed = strip.read_processed(scratch, |fault| {
                    if faults.try_send(fault).is_err() {
                        params.dropped_faults.fetch_add(1, Ordering::Relaxed);
                    }
                });
                if contributed.is_some() {
                    for (o, s) in chunk.iter_mut().zip(scratch.iter()) {
                        *o += *s;
                    }
                }
            }
        }

        let gain = self.params.gain();
        for sample in out.iter_mut() {
            *sample *= gain;
        }
    }
}

impl SampleStream for MasterStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        self.apply_commands();

        if self.params.state() == PlaybackState::Playing {
            self.mix(buffer);
        } else {
            buffer.fill(0.0);
        }

        let peak = buffer.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        self.params.peak.store(peak);
        self.tap.push(buffer);

        buffer.len()
    }
}
