//! Channels, mixing and signal metering
//!
//! The mixer is split along the real-time boundary:
//! - [`Channel`] is the control-side handle. It validates and clamps every
//!   change, keeps a mirror of the channel configuration, and publishes
//!   changes either through atomics or as [`MixerCommand`]s.
//! - [`ChannelStrip`] and [`MasterStream`] live on the audio thread. They
//!   apply pending commands at the start of a read and never block.
//!
//! Anything the audio thread displaces (old sources, removed effects,
//! removed strips) travels back on a bounded channel and is dropped on the
//! control side.

use crate::domain::audio::{AudioError, StreamFormat};
use crate::domain::dsp::{
    self, DspError, EffectId, EffectParams, EffectSlot, EqBand, EqualizerCoeffs,
    EqualizerSettings, MAX_EFFECTS,
};
use crate::domain::engine::{ChannelSnapshot, EffectSnapshot};
use crate::domain::stream::SampleStream;
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

mod ducking;
mod master;
mod strip;

pub use ducking::{DuckingController, DuckingSettings};
pub use master::{MasterParams, MasterStream};
pub use strip::ChannelStrip;

pub type Result<T> = std::result::Result<T, AudioError>;

/// Most channels a mixer will hold
pub const MAX_CHANNELS: usize = 64;

/// Unique identifier for a mixer channel
///
/// Ids are handed out by the engine and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// `f32` stored as raw bits in an `AtomicU32`
#[derive(Debug, Default)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub(crate) fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub(crate) fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub(crate) fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Convert linear gain to decibels, floored at -60 dB
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 || gain.is_nan() {
        AudioLevel::MIN_LEVEL
    } else {
        (20.0 * gain.log10()).max(AudioLevel::MIN_LEVEL)
    }
}

/// Effective channel gain: `volume * (muted ? 0 : 1) * (ducked ? duck_level : 1)`
///
/// Always within [0, 1], whatever the inputs.
#[inline]
pub fn effective_gain(volume: f32, muted: bool, ducked: bool, duck_level: f32) -> f32 {
    if muted {
        return 0.0;
    }
    let gain = if ducked { volume * duck_level } else { volume };
    dsp::clamp_or(gain, 0.0, 1.0, 0.0)
}

/// Audio level meter in decibels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioLevel {
    pub current_db: f32,
    pub peak_db: f32,
}

impl AudioLevel {
    pub const MIN_LEVEL: f32 = -60.0;
    pub const MAX_LEVEL: f32 = 0.0;

    pub fn new() -> Self {
        Self {
            current_db: Self::MIN_LEVEL,
            peak_db: Self::MIN_LEVEL,
        }
    }

    /// Level of a block whose absolute peak was `amplitude`
    pub fn from_amplitude(amplitude: f32) -> Self {
        let mut level = Self::new();
        level.update(amplitude);
        level
    }

    /// Update level with new sample value
    pub fn update(&mut self, sample: f32) {
        let level = gain_to_db(sample.abs()).clamp(Self::MIN_LEVEL, Self::MAX_LEVEL);
        self.current_db = level;
        self.peak_db = self.peak_db.max(level);
    }

    /// Decay peak level (call periodically)
    pub fn decay_peak(&mut self, amount: f32) {
        self.peak_db = (self.peak_db - amount).max(Self::MIN_LEVEL);
    }
}

impl Default for AudioLevel {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel state shared between the control handle and the audio thread
#[derive(Debug)]
pub(crate) struct ChannelShared {
    volume: AtomicF32,
    muted: AtomicBool,
    ducked: AtomicBool,
    auto_ducked: AtomicBool,
    duck_level: AtomicF32,
    peak: AtomicF32,
}

impl ChannelShared {
    fn new(duck_level: f32) -> Self {
        Self {
            volume: AtomicF32::new(1.0),
            muted: AtomicBool::new(false),
            ducked: AtomicBool::new(false),
            auto_ducked: AtomicBool::new(false),
            duck_level: AtomicF32::new(duck_level),
            peak: AtomicF32::new(0.0),
        }
    }

    /// Gain for the next block, read once per block
    #[inline]
    pub(crate) fn gain(&self) -> f32 {
        let ducked =
            self.ducked.load(Ordering::Relaxed) || self.auto_ducked.load(Ordering::Relaxed);
        effective_gain(
            self.volume.load(),
            self.muted.load(Ordering::Relaxed),
            ducked,
            self.duck_level.load(),
        )
    }

    pub(crate) fn set_peak(&self, peak: f32) {
        self.peak.store(peak);
    }

    pub(crate) fn set_auto_ducked(&self, ducked: bool) {
        self.auto_ducked.store(ducked, Ordering::Relaxed);
    }

    pub(crate) fn level(&self) -> AudioLevel {
        AudioLevel::from_amplitude(self.peak.load())
    }
}

/// Read-only view of one channel's output level
///
/// The engine publishes the current list as a copy-on-write
/// `Arc<[ChannelMeter]>`.
#[derive(Debug, Clone)]
pub struct ChannelMeter {
    pub id: ChannelId,
    pub name: Arc<str>,
    shared: Arc<ChannelShared>,
}

impl ChannelMeter {
    /// Peak level of the last processed block
    pub fn level(&self) -> AudioLevel {
        self.shared.level()
    }
}

/// Failure of a DSP unit inside a channel strip
///
/// Raised on the audio thread, drained and logged on the control path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingFault {
    pub channel: ChannelId,
    /// `None` for the channel equalizer
    pub effect: Option<EffectId>,
    pub unit: &'static str,
    pub error: DspError,
}

impl fmt::Display for ProcessingFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.effect {
            Some(effect) => write!(
                f,
                "{} on {} ({}) bypassed: {}",
                self.unit, self.channel, effect, self.error
            ),
            None => write!(f, "{} on {} bypassed: {}", self.unit, self.channel, self.error),
        }
    }
}

/// Structural change applied by the mixer at the next buffer boundary
pub(crate) enum MixerCommand {
    AddStrip(Box<ChannelStrip>),
    RemoveStrip(ChannelId),
    SetSource(ChannelId, Box<dyn SampleStream>),
    ClearSource(ChannelId),
    SetEqualizer(ChannelId, EqualizerCoeffs),
    AddEffect(ChannelId, Box<EffectSlot>),
    RemoveEffect(ChannelId, EffectId),
    SetEffectEnabled(ChannelId, EffectId, bool),
    SetEffectParams(ChannelId, EffectId, EffectParams),
}

/// Objects the audio thread hands back for dropping
#[allow(dead_code)] // payloads are only ever dropped
pub(crate) enum Retired {
    Strip(Box<ChannelStrip>),
    Source(Box<dyn SampleStream>),
    Effect(Box<EffectSlot>),
    Command(MixerCommand),
}

/// Control-side ends of the mixer's queues
#[derive(Clone)]
pub(crate) struct MixerLink {
    commands: Sender<MixerCommand>,
    retired: Receiver<Retired>,
}

impl MixerLink {
    pub(crate) fn new(commands: Sender<MixerCommand>, retired: Receiver<Retired>) -> Self {
        Self { commands, retired }
    }

    /// Drop everything the audio thread has handed back so far
    pub(crate) fn collect(&self) -> usize {
        self.retired.try_iter().count()
    }

    pub(crate) fn send(&self, command: MixerCommand) -> Result<()> {
        self.collect();
        self.commands
            .send(command)
            .map_err(|_| AudioError::StreamError("mixer is no longer running".to_string()))
    }
}

#[derive(Debug, Clone)]
struct EffectEntry {
    id: EffectId,
    params: EffectParams,
    enabled: bool,
}

/// Control-side handle of a mixer channel
///
/// Obtained from [`Engine::channel_mut`](crate::domain::engine::Engine::channel_mut).
/// Every setter clamps out-of-range input instead of rejecting it.
pub struct Channel {
    id: ChannelId,
    name: String,
    format: StreamFormat,
    shared: Arc<ChannelShared>,
    equalizer: EqualizerSettings,
    effects: Vec<EffectEntry>,
    next_effect: u64,
    has_source: bool,
    link: MixerLink,
}

impl Channel {
    /// Create a channel and the strip that processes it
    pub(crate) fn new(
        id: ChannelId,
        name: String,
        format: StreamFormat,
        duck_level: f32,
        link: MixerLink,
    ) -> (Self, ChannelStrip) {
        let shared = Arc::new(ChannelShared::new(dsp::clamp_or(duck_level, 0.0, 1.0, 0.3)));
        let strip = ChannelStrip::new(id, Arc::clone(&shared), format);

        let channel = Self {
            id,
            name,
            format,
            shared,
            equalizer: EqualizerSettings::flat(),
            effects: Vec::with_capacity(MAX_EFFECTS),
            next_effect: 1,
            has_source: false,
            link,
        };
        (channel, strip)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub(crate) fn meter(&self) -> ChannelMeter {
        ChannelMeter {
            id: self.id,
            name: Arc::from(self.name.as_str()),
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn shared(&self) -> &ChannelShared {
        &self.shared
    }

    // ------------------------------------------------------------------
    // Gain stage
    // ------------------------------------------------------------------

    pub fn volume(&self) -> f32 {
        self.shared.volume.load()
    }

    /// Set volume as linear gain, clamped to [0, 1]
    pub fn set_volume(&mut self, volume: f32) {
        let volume = dsp::clamp_or(volume, 0.0, 1.0, 0.0);
        self.shared.volume.store(volume);
        debug!("Channel {} volume set to {:.3}", self.name, volume);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
        debug!("Channel {} muted: {}", self.name, muted);
    }

    /// Manual duck flag
    pub fn is_ducked(&self) -> bool {
        self.shared.ducked.load(Ordering::Relaxed)
    }

    pub fn set_ducked(&mut self, ducked: bool) {
        self.shared.ducked.store(ducked, Ordering::Relaxed);
        debug!("Channel {} ducked: {}", self.name, ducked);
    }

    /// Whether an active ducking trigger currently targets this channel
    pub fn is_auto_ducked(&self) -> bool {
        self.shared.auto_ducked.load(Ordering::Relaxed)
    }

    pub fn duck_level(&self) -> f32 {
        self.shared.duck_level.load()
    }

    pub fn set_duck_level(&mut self, level: f32) {
        let level = dsp::clamp_or(level, 0.0, 1.0, 0.0);
        self.shared.duck_level.store(level);
        debug!("Channel {} duck level set to {:.3}", self.name, level);
    }

    /// Gain the strip will apply on its next block
    pub fn effective_gain(&self) -> f32 {
        self.shared.gain()
    }

    pub fn level(&self) -> AudioLevel {
        self.shared.level()
    }

    // ------------------------------------------------------------------
    // Equalizer
    // ------------------------------------------------------------------

    pub fn equalizer(&self) -> &EqualizerSettings {
        &self.equalizer
    }

    /// Set one band and publish the new coefficient set
    ///
    /// Returns the gain actually applied after clamping.
    pub fn set_eq_band(&mut self, band: EqBand, gain_db: f32) -> Result<f32> {
        let mut settings = self.equalizer;
        let gain = settings.set_gain(band, gain_db);
        self.set_equalizer(settings)?;
        Ok(gain)
    }

    /// Replace all seven bands and publish the new coefficient set
    pub fn set_equalizer(&mut self, settings: EqualizerSettings) -> Result<()> {
        let settings = EqualizerSettings::from_gains(settings.gains());
        let coeffs = settings.coefficients(self.format.hz());
        self.link.send(MixerCommand::SetEqualizer(self.id, coeffs))?;
        self.equalizer = settings;
        debug!("Channel {} equalizer set to {:?} dB", self.name, settings.gains());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// Effects in processing order: `(id, params, enabled)`
    pub fn effects(&self) -> impl Iterator<Item = (EffectId, EffectParams, bool)> + '_ {
        self.effects.iter().map(|e| (e.id, e.params, e.enabled))
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Append an effect to the end of the chain
    pub fn add_effect(&mut self, params: impl Into<EffectParams>) -> Result<EffectId> {
        if self.effects.len() >= MAX_EFFECTS {
            return Err(AudioError::CapacityExceeded(format!(
                "channel {} already holds {} effects",
                self.name, MAX_EFFECTS
            )));
        }

        let params = params.into().sanitized();
        let id = EffectId(self.next_effect);
        let slot = EffectSlot::new(id, params);
        self.link.send(MixerCommand::AddEffect(self.id, Box::new(slot)))?;

        self.next_effect += 1;
        self.effects.push(EffectEntry {
            id,
            params,
            enabled: true,
        });
        debug!("Channel {}: added {} as {}", self.name, params.kind(), id);
        Ok(id)
    }

    pub fn remove_effect(&mut self, id: EffectId) -> Result<()> {
        let index = self.effect_index(id)?;
        self.link.send(MixerCommand::RemoveEffect(self.id, id))?;
        let removed = self.effects.remove(index);
        debug!("Channel {}: removed {} {}", self.name, removed.params.kind(), id);
        Ok(())
    }

    /// Enable or bypass an effect without removing it
    pub fn set_effect_enabled(&mut self, id: EffectId, enabled: bool) -> Result<()> {
        let index = self.effect_index(id)?;
        self.link
            .send(MixerCommand::SetEffectEnabled(self.id, id, enabled))?;
        self.effects[index].enabled = enabled;
        debug!("Channel {}: {} enabled: {}", self.name, id, enabled);
        Ok(())
    }

    /// Replace an effect's parameters; the variant must match
    pub fn set_effect_params(&mut self, id: EffectId, params: impl Into<EffectParams>) -> Result<()> {
        let index = self.effect_index(id)?;
        let params = params.into().sanitized();
        let current = self.effects[index].params;

        if !current.same_kind(&params) {
            return Err(AudioError::InvalidConfiguration(format!(
                "{} is a {}, not a {}",
                id,
                current.kind(),
                params.kind()
            )));
        }

        self.link
            .send(MixerCommand::SetEffectParams(self.id, id, params))?;
        self.effects[index].params = params;
        trace!("Channel {}: {} params {:?}", self.name, id, params);
        Ok(())
    }

    fn effect_index(&self, id: EffectId) -> Result<usize> {
        self.effects
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| AudioError::EffectNotFound(format!("{} on channel {}", id, self.name)))
    }

    // ------------------------------------------------------------------
    // Source
    // ------------------------------------------------------------------

    pub fn has_source(&self) -> bool {
        self.has_source
    }

    /// Bind a source stream
    ///
    /// The source must already be in the channel's format; on rejection the
    /// channel is left without a source.
    pub fn set_source(&mut self, source: Box<dyn SampleStream>) -> Result<()> {
        let format = source.format();
        if format != self.format {
            if self.has_source {
                self.clear_source()?;
            }
            return Err(AudioError::UnsupportedConfiguration(format!(
                "source is {}, channel {} expects {}",
                format, self.name, self.format
            )));
        }

        self.link.send(MixerCommand::SetSource(self.id, source))?;
        self.has_source = true;
        debug!("Channel {}: source bound ({})", self.name, format);
        Ok(())
    }

    pub fn clear_source(&mut self) -> Result<()> {
        self.link.send(MixerCommand::ClearSource(self.id))?;
        self.has_source = false;
        debug!("Channel {}: source cleared", self.name);
        Ok(())
    }

    /// Configuration snapshot (sources are not part of it)
    pub fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            name: self.name.clone(),
            volume: self.volume(),
            muted: self.is_muted(),
            duck_level: self.duck_level(),
            equalizer: self.equalizer,
            effects: self
                .effects
                .iter()
                .map(|e| EffectSnapshot {
                    effect: e.params,
                    enabled: e.enabled,
                })
                .collect(),
        }
    }

    /// Apply a snapshot's settings to this channel
    pub fn apply_snapshot(&mut self, snapshot: &ChannelSnapshot) -> Result<()> {
        self.set_volume(snapshot.volume);
        self.set_muted(snapshot.muted);
        self.set_duck_level(snapshot.duck_level);
        self.set_equalizer(snapshot.equalizer)?;

        let existing: Vec<EffectId> = self.effects.iter().map(|e| e.id).collect();
        for id in existing {
            self.remove_effect(id)?;
        }
        for effect in &snapshot.effects {
            let id = self.add_effect(effect.effect)?;
            if !effect.enabled {
                self.set_effect_enabled(id, false)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("format", &self.format)
            .field("volume", &self.volume())
            .field("muted", &self.is_muted())
            .field("effects", &self.effects.len())
            .field("has_source", &self.has_source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, unbounded};
    use proptest::prelude::*;

    fn channel() -> (Channel, ChannelStrip, Receiver<MixerCommand>) {
        let (tx, rx) = unbounded();
        let (_retired_tx, retired_rx) = bounded(8);
        let link = MixerLink::new(tx, retired_rx);
        let (channel, strip) = Channel::new(
            ChannelId(1),
            "Test".to_string(),
            StreamFormat::new(44100, 1),
            0.3,
            link,
        );
        (channel, strip, rx)
    }

    #[test]
    fn test_channel_id_display() {
        assert_eq!(ChannelId(7).to_string(), "ch-7");
    }

    #[test]
    fn test_gain_to_db() {
        assert!((gain_to_db(1.0) - 0.0).abs() < 0.001);
        assert!((gain_to_db(0.5) - (-6.02)).abs() < 0.1);
        assert_eq!(gain_to_db(0.0), -60.0);
        assert_eq!(gain_to_db(1e-9), -60.0);
    }

    #[test]
    fn test_audio_level() {
        let mut level = AudioLevel::new();

        level.update(1.0);
        assert_eq!(level.current_db, 0.0);
        assert_eq!(level.peak_db, 0.0);

        level.update(0.5);
        assert!((level.current_db - (-6.02)).abs() < 0.1);
        assert_eq!(level.peak_db, 0.0); // Peak remains

        level.decay_peak(3.0);
        assert_eq!(level.peak_db, -3.0);

        // Overs are pinned at 0 dB
        assert_eq!(AudioLevel::from_amplitude(2.0).current_db, 0.0);
    }

    #[test]
    fn test_channel_defaults() {
        let (channel, _strip, _rx) = channel();
        assert_eq!(channel.volume(), 1.0);
        assert!(!channel.is_muted());
        assert!(!channel.is_ducked());
        assert_eq!(channel.duck_level(), 0.3);
        assert!(channel.equalizer().is_flat());
        assert!(!channel.has_source());
        assert_eq!(channel.effective_gain(), 1.0);
    }

    #[test]
    fn test_channel_gain_stage() {
        let (mut channel, _strip, _rx) = channel();

        channel.set_volume(0.5);
        assert_eq!(channel.effective_gain(), 0.5);

        channel.set_ducked(true);
        assert!((channel.effective_gain() - 0.15).abs() < 1e-6);

        channel.set_muted(true);
        assert_eq!(channel.effective_gain(), 0.0);

        // Out-of-range input is clamped, not rejected
        channel.set_muted(false);
        channel.set_ducked(false);
        channel.set_volume(3.0);
        assert_eq!(channel.volume(), 1.0);
        channel.set_volume(f32::NAN);
        assert_eq!(channel.volume(), 0.0);
    }

    #[test]
    fn test_auto_duck_combines_with_manual_flag() {
        let (mut channel, _strip, _rx) = channel();
        channel.set_duck_level(0.5);

        channel.shared().set_auto_ducked(true);
        assert!(channel.is_auto_ducked());
        assert_eq!(channel.effective_gain(), 0.5);

        // Both flags still duck only once
        channel.set_ducked(true);
        assert_eq!(channel.effective_gain(), 0.5);
    }

    #[test]
    fn test_effect_bookkeeping() {
        let (mut channel, _strip, rx) = channel();

        let comp = channel
            .add_effect(dsp::CompressorParams::default())
            .unwrap();
        let verb = channel.add_effect(dsp::ReverbParams::default()).unwrap();
        assert_ne!(comp, verb);
        assert_eq!(channel.effect_count(), 2);

        channel.set_effect_enabled(verb, false).unwrap();
        let enabled: Vec<bool> = channel.effects().map(|(_, _, e)| e).collect();
        assert_eq!(enabled, vec![true, false]);

        // Variant mismatch is a configuration error
        let err = channel
            .set_effect_params(comp, dsp::DistortionParams::default())
            .unwrap_err();
        assert!(matches!(err, AudioError::InvalidConfiguration(_)));

        channel.remove_effect(comp).unwrap();
        assert!(matches!(
            channel.remove_effect(comp),
            Err(AudioError::EffectNotFound(_))
        ));

        // add, add, toggle, remove
        assert_eq!(rx.try_iter().count(), 4);
    }

    #[test]
    fn test_effect_capacity() {
        let (mut channel, _strip, _rx) = channel();
        for _ in 0..MAX_EFFECTS {
            channel.add_effect(dsp::DistortionParams::default()).unwrap();
        }
        assert!(matches!(
            channel.add_effect(dsp::DistortionParams::default()),
            Err(AudioError::CapacityExceeded(_))
        ));
    }

    #[test]
    fn test_source_format_mismatch_leaves_no_source() {
        use crate::domain::stream::Silence;

        let (mut channel, _strip, _rx) = channel();
        channel
            .set_source(Box::new(Silence::new(StreamFormat::new(44100, 1))))
            .unwrap();
        assert!(channel.has_source());

        let err = channel
            .set_source(Box::new(Silence::new(StreamFormat::new(48000, 2))))
            .unwrap_err();
        assert!(matches!(err, AudioError::UnsupportedConfiguration(_)));
        assert!(!channel.has_source());
    }

    #[test]
    fn test_eq_band_clamped_and_published() {
        let (mut channel, _strip, rx) = channel();
        let applied = channel.set_eq_band(EqBand::Hz3k, 40.0).unwrap();
        assert_eq!(applied, 20.0);
        assert_eq!(channel.equalizer().gain(EqBand::Hz3k), 20.0);
        assert!(matches!(
            rx.try_recv(),
            Ok(MixerCommand::SetEqualizer(ChannelId(1), _))
        ));
    }

    #[test]
    fn test_sending_fails_once_mixer_is_gone() {
        let (mut channel, _strip, rx) = channel();
        drop(rx);
        assert!(matches!(
            channel.add_effect(dsp::ReverbParams::default()),
            Err(AudioError::StreamError(_))
        ));
        assert_eq!(channel.effect_count(), 0);
    }

    proptest! {
        #[test]
        fn prop_effective_gain_invariant(
            volume in 0.0f32..=1.0,
            muted: bool,
            ducked: bool,
            duck_level in 0.0f32..=1.0,
        ) {
            let gain = effective_gain(volume, muted, ducked, duck_level);
            let expected = volume
                * if muted { 0.0 } else { 1.0 }
                * if ducked { duck_level } else { 1.0 };

            prop_assert_eq!(gain, expected.clamp(0.0, 1.0));
        }

        #[test]
        fn prop_effective_gain_bounded(
            volume in -10.0f32..10.0,
            muted: bool,
            ducked: bool,
            duck_level in -10.0f32..10.0,
        ) {
            let gain = effective_gain(volume, muted, ducked, duck_level);
            prop_assert!((0.0..=1.0).contains(&gain));
        }
    }
}
