//! Mixing engine
//!
//! The [`Engine`] owns the channel registry, the ducking rules and the
//! transport. It builds one [`MasterStream`] at construction and hands it to
//! an [`OutputSink`], which pulls from it on its own real-time thread. After
//! that, everything the engine does reaches the audio thread through atomics
//! or queued commands.

use crate::domain::audio::{AudioError, StreamFormat};
use crate::domain::config::AppConfig;
use crate::domain::dsp::{EffectParams, EqualizerSettings};
use crate::domain::mixer::{
    AudioLevel, Channel, ChannelId, ChannelMeter, DuckingController, DuckingSettings,
    MasterParams, MasterStream, MixerCommand, MixerLink, ProcessingFault, MAX_CHANNELS,
};
use crate::domain::stream::SampleStream;
use crate::domain::tap::SampleTap;
use crossbeam::channel::{bounded, unbounded, Receiver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub type Result<T> = std::result::Result<T, AudioError>;

/// Capacity of the queue carrying displaced objects back from the audio thread
const RETIRED_CAPACITY: usize = 256;

/// Capacity of the real-time fault queue
const FAULT_CAPACITY: usize = 64;

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlaybackState {
    Stopped = 0,
    Playing = 1,
    Paused = 2,
}

impl PlaybackState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

// ============================================================================
// OUTPUT SINK
// ============================================================================

/// Destination that pulls the master stream
///
/// Sinks own their device handles, which are often tied to the thread that
/// created them, so the trait does not require `Send`.
pub trait OutputSink {
    /// Take ownership of the master stream and prepare a device for it
    fn initialize(&mut self, stream: MasterStream) -> Result<()>;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Switch to the output device at `index` in the sink's own listing
    fn select_device(&mut self, index: usize) -> Result<()>;
}

/// Sink that renders on demand instead of driving a device
///
/// Clones share the same stream, so a caller can keep one clone to render
/// from after handing another to the [`Engine`].
#[derive(Clone, Default)]
pub struct OfflineSink {
    stream: Arc<Mutex<Option<MasterStream>>>,
}

impl OfflineSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pull `samples` interleaved samples from the master stream
    pub fn render(&self, samples: usize) -> Result<Vec<f32>> {
        let mut buffer = vec![0.0; samples];
        self.render_into(&mut buffer)?;
        Ok(buffer)
    }

    pub fn render_into(&self, buffer: &mut [f32]) -> Result<usize> {
        let mut guard = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let stream = guard
            .as_mut()
            .ok_or_else(|| AudioError::StreamError("offline sink is not initialized".to_string()))?;
        Ok(stream.read(buffer))
    }
}

impl OutputSink for OfflineSink {
    fn initialize(&mut self, stream: MasterStream) -> Result<()> {
        let mut guard = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(stream);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn select_device(&mut self, index: usize) -> Result<()> {
        if index == 0 {
            Ok(())
        } else {
            Err(AudioError::DeviceNotFound(format!(
                "offline sink has no device {index}"
            )))
        }
    }
}

// ============================================================================
// SNAPSHOTS
// ============================================================================

/// One effect of a channel snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectSnapshot {
    pub effect: EffectParams,
    pub enabled: bool,
}

/// Channel configuration without its source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub name: String,
    pub volume: f32,
    pub muted: bool,
    pub duck_level: f32,
    pub equalizer: EqualizerSettings,
    pub effects: Vec<EffectSnapshot>,
}

/// Ducking rule with channels referenced by their index in the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuckingRuleSnapshot {
    pub trigger: usize,
    pub targets: Vec<usize>,
}

/// Engine configuration: master bus, channels and ducking rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub master_volume: f32,
    pub master_muted: bool,
    pub ducking: DuckingSettings,
    pub channels: Vec<ChannelSnapshot>,
    pub ducking_rules: Vec<DuckingRuleSnapshot>,
}

// ============================================================================
// MONITOR
// ============================================================================

/// Thread-safe read-only view of the engine for visualization
#[derive(Clone)]
pub struct EngineMonitor {
    format: StreamFormat,
    master: Arc<MasterParams>,
    tap: Arc<SampleTap>,
    meters: watch::Receiver<Arc<[ChannelMeter]>>,
}

impl EngineMonitor {
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn state(&self) -> PlaybackState {
        self.master.state()
    }

    pub fn master_level(&self) -> AudioLevel {
        self.master.level()
    }

    /// Faults the audio thread could not queue, since construction
    pub fn dropped_faults(&self) -> u64 {
        self.master.dropped_faults()
    }

    /// Retired objects freed on the audio thread, since construction
    pub fn dropped_retired(&self) -> u64 {
        self.master.dropped_retired()
    }

    /// Copy the most recent master samples (interleaved) into `out`
    pub fn waveform(&self, out: &mut [f32]) -> usize {
        self.tap.latest(out)
    }

    /// Levels of every channel, in creation order
    pub fn channel_levels(&self) -> Vec<(ChannelId, Arc<str>, AudioLevel)> {
        self.meters
            .borrow()
            .iter()
            .map(|m| (m.id, Arc::clone(&m.name), m.level()))
            .collect()
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Channel registry, ducking rules and transport around one master stream
pub struct Engine {
    format: StreamFormat,
    channels: BTreeMap<ChannelId, Channel>,
    next_channel: u64,
    ducking: DuckingController,
    master: Arc<MasterParams>,
    tap: Arc<SampleTap>,
    link: MixerLink,
    faults: Receiver<ProcessingFault>,
    /// Dropped-fault count already logged by `drain_faults`
    reported_drops: u64,
    meters: watch::Sender<Arc<[ChannelMeter]>>,
    sink: Box<dyn OutputSink>,
}

impl Engine {
    /// Build the master stream and hand it to `sink`
    ///
    /// A sink that cannot be initialized fails construction.
    pub fn new(config: &AppConfig, mut sink: Box<dyn OutputSink>) -> Result<Self> {
        let config = config.sanitized();
        let format = config.stream_format();

        let (command_tx, command_rx) = unbounded();
        let (retired_tx, retired_rx) = bounded(RETIRED_CAPACITY);
        let (fault_tx, fault_rx) = bounded(FAULT_CAPACITY);

        let master = Arc::new(MasterParams::default());
        // Enough history for one analysis window of every channel
        let tap = Arc::new(SampleTap::new(config.fft_size * format.stride() * 2));

        let stream = MasterStream::new(
            format,
            command_rx,
            retired_tx,
            fault_tx,
            Arc::clone(&master),
            Arc::clone(&tap),
        );
        sink.initialize(stream)?;

        if let Some(index) = config.output_device {
            sink.select_device(index)?;
        }

        let empty: Arc<[ChannelMeter]> = Arc::from(Vec::new());
        let (meters, _) = watch::channel(empty);

        info!("Engine initialized at {}", format);

        Ok(Self {
            format,
            channels: BTreeMap::new(),
            next_channel: 1,
            ducking: DuckingController::new(config.ducking),
            master,
            tap,
            link: MixerLink::new(command_tx, retired_rx),
            faults: fault_rx,
            reported_drops: 0,
            meters,
            sink,
        })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn monitor(&self) -> EngineMonitor {
        EngineMonitor {
            format: self.format,
            master: Arc::clone(&self.master),
            tap: Arc::clone(&self.tap),
            meters: self.meters.subscribe(),
        }
    }

    // ------------------------------------------------------------------
    // Channel registry
    // ------------------------------------------------------------------

    /// Create a channel with a fresh id
    pub fn create_channel(&mut self, name: impl Into<String>) -> Result<ChannelId> {
        if self.channels.len() >= MAX_CHANNELS {
            return Err(AudioError::CapacityExceeded(format!(
                "the mixer already holds {MAX_CHANNELS} channels"
            )));
        }

        let name = name.into();
        let id = ChannelId(self.next_channel);
        let (channel, strip) = Channel::new(
            id,
            name,
            self.format,
            self.ducking.settings().duck_level,
            self.link.clone(),
        );
        self.link.send(MixerCommand::AddStrip(Box::new(strip)))?;
        self.next_channel += 1;

        info!("Created channel {} ({})", channel.name(), id);
        self.channels.insert(id, channel);
        self.publish_meters();
        Ok(id)
    }

    /// Remove a channel and purge it from every ducking rule
    pub fn remove_channel(&mut self, id: ChannelId) -> Result<()> {
        let channel = self
            .channels
            .remove(&id)
            .ok_or_else(|| AudioError::ChannelNotFound(id.to_string()))?;

        self.link.send(MixerCommand::RemoveStrip(id))?;
        self.ducking.remove_channel(id);
        self.apply_ducking();
        self.publish_meters();

        info!("Removed channel {} ({})", channel.name(), id);
        Ok(())
    }

    pub fn rename_channel(&mut self, id: ChannelId, name: impl Into<String>) -> Result<()> {
        self.channel_mut(id)
            .ok_or_else(|| AudioError::ChannelNotFound(id.to_string()))?
            .set_name(name.into());
        self.publish_meters();
        Ok(())
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    /// Channels in creation order
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Bind a source to a channel
    pub fn set_source(&mut self, id: ChannelId, source: Box<dyn SampleStream>) -> Result<()> {
        self.channel_mut(id)
            .ok_or_else(|| AudioError::ChannelNotFound(id.to_string()))?
            .set_source(source)
    }

    fn publish_meters(&self) {
        let meters: Arc<[ChannelMeter]> = self.channels.values().map(Channel::meter).collect();
        self.meters.send_replace(meters);
    }

    // ------------------------------------------------------------------
    // Master bus
    // ------------------------------------------------------------------

    pub fn master_volume(&self) -> f32 {
        self.master.volume()
    }

    /// Set master volume, clamped to [0, 1]
    pub fn set_master_volume(&mut self, volume: f32) {
        let volume = self.master.set_volume(volume);
        debug!("Master volume set to {:.3}", volume);
    }

    pub fn is_master_muted(&self) -> bool {
        self.master.is_muted()
    }

    pub fn set_master_muted(&mut self, muted: bool) {
        self.master.set_muted(muted);
        debug!("Master muted: {}", muted);
    }

    pub fn master_level(&self) -> AudioLevel {
        self.master.level()
    }

    // ------------------------------------------------------------------
    // Ducking
    // ------------------------------------------------------------------

    pub fn ducking(&self) -> &DuckingController {
        &self.ducking
    }

    /// Replace the ducking settings; the duck level seeds new channels only
    pub fn set_ducking_settings(&mut self, settings: DuckingSettings) {
        self.ducking.set_settings(settings);
    }

    /// Register `trigger` to duck `targets` while it is active
    pub fn set_ducking_trigger(
        &mut self,
        trigger: ChannelId,
        targets: impl IntoIterator<Item = ChannelId>,
    ) -> Result<()> {
        self.require(trigger)?;
        let targets: Vec<ChannelId> = targets.into_iter().collect();
        for target in &targets {
            self.require(*target)?;
        }

        self.ducking.set_trigger(trigger, targets);
        self.apply_ducking();
        Ok(())
    }

    pub fn remove_ducking_trigger(&mut self, trigger: ChannelId) -> bool {
        let removed = self.ducking.remove_trigger(trigger);
        self.apply_ducking();
        removed
    }

    /// Mark a trigger channel as sounding (or silent)
    pub fn set_trigger_active(&mut self, trigger: ChannelId, active: bool) -> Result<()> {
        self.require(trigger)?;
        self.ducking.set_active(trigger, active);
        self.apply_ducking();
        debug!("Ducking trigger {} active: {}", trigger, active);
        Ok(())
    }

    /// Push the current auto-duck state to every channel
    fn apply_ducking(&self) {
        let ducked = self.ducking.ducked_targets();
        for (id, channel) in &self.channels {
            channel.shared().set_auto_ducked(ducked.contains(id));
        }
    }

    fn require(&self, id: ChannelId) -> Result<()> {
        if self.channels.contains_key(&id) {
            Ok(())
        } else {
            Err(AudioError::ChannelNotFound(id.to_string()))
        }
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.master.state()
    }

    /// Start playback from any state
    ///
    /// The mix graph is maintained incrementally, so starting only refreshes
    /// derived state before the sink is engaged.
    pub fn start(&mut self) -> Result<()> {
        if self.state() == PlaybackState::Playing {
            return Ok(());
        }

        self.link.collect();
        self.apply_ducking();
        self.transition(PlaybackState::Playing, |sink| sink.play())?;
        info!("Playback started with {} channels", self.channels.len());
        Ok(())
    }

    /// Pause playback; a no-op unless playing
    pub fn pause(&mut self) -> Result<()> {
        if self.state() != PlaybackState::Playing {
            return Ok(());
        }
        self.transition(PlaybackState::Paused, |sink| sink.pause())?;
        info!("Playback paused");
        Ok(())
    }

    /// Resume from pause; a no-op unless paused
    pub fn resume(&mut self) -> Result<()> {
        if self.state() != PlaybackState::Paused {
            return Ok(());
        }
        self.transition(PlaybackState::Playing, |sink| sink.play())?;
        info!("Playback resumed");
        Ok(())
    }

    /// Stop playback from any state
    pub fn stop(&mut self) -> Result<()> {
        if self.state() == PlaybackState::Stopped {
            return Ok(());
        }
        self.transition(PlaybackState::Stopped, |sink| sink.stop())?;
        info!("Playback stopped");
        Ok(())
    }

    /// Set the state, then drive the sink; the state is rolled back if the
    /// sink fails
    fn transition(
        &mut self,
        state: PlaybackState,
        drive: impl FnOnce(&mut dyn OutputSink) -> Result<()>,
    ) -> Result<()> {
        let previous = self.state();
        self.master.set_state(state);
        if let Err(e) = drive(self.sink.as_mut()) {
            self.master.set_state(previous);
            return Err(e);
        }
        Ok(())
    }

    /// Switch the sink to another output device
    pub fn set_output_device(&mut self, index: usize) -> Result<()> {
        self.sink.select_device(index)?;
        if self.state() == PlaybackState::Playing {
            self.sink.play()?;
        }
        info!("Output switched to device {}", index);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    /// Take every fault reported by the audio thread since the last call
    ///
    /// Also drops whatever the audio thread has handed back.
    pub fn drain_faults(&mut self) -> Vec<ProcessingFault> {
        self.link.collect();
        let faults: Vec<ProcessingFault> = self.faults.try_iter().collect();
        for fault in &faults {
            warn!("Processing fault: {}", fault);
        }

        let dropped = self.master.dropped_faults();
        if dropped > self.reported_drops {
            warn!(
                "{} processing faults lost to a full fault queue",
                dropped - self.reported_drops
            );
            self.reported_drops = dropped;
        }
        faults
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> EngineSnapshot {
        let index: BTreeMap<ChannelId, usize> = self
            .channels
            .keys()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let ducking_rules = self
            .ducking
            .rules()
            .filter_map(|(trigger, targets)| {
                Some(DuckingRuleSnapshot {
                    trigger: *index.get(&trigger)?,
                    targets: targets.iter().filter_map(|t| index.get(t).copied()).collect(),
                })
            })
            .collect();

        EngineSnapshot {
            master_volume: self.master_volume(),
            master_muted: self.is_master_muted(),
            ducking: self.ducking.settings(),
            channels: self.channels.values().map(Channel::snapshot).collect(),
            ducking_rules,
        }
    }

    /// Replace every channel with the snapshot's
    ///
    /// Returns the ids of the new channels in snapshot order. Sources are
    /// not part of a snapshot and must be bound again.
    pub fn restore(&mut self, snapshot: &EngineSnapshot) -> Result<Vec<ChannelId>> {
        let existing: Vec<ChannelId> = self.channels.keys().copied().collect();
        for id in existing {
            self.remove_channel(id)?;
        }
        self.ducking.clear();

        self.set_master_volume(snapshot.master_volume);
        self.set_master_muted(snapshot.master_muted);
        self.set_ducking_settings(snapshot.ducking);

        let mut ids = Vec::with_capacity(snapshot.channels.len());
        for channel in &snapshot.channels {
            let id = self.create_channel(channel.name.clone())?;
            if let Some(handle) = self.channel_mut(id) {
                handle.apply_snapshot(channel)?;
            }
            ids.push(id);
        }

        for rule in &snapshot.ducking_rules {
            let Some(&trigger) = ids.get(rule.trigger) else {
                warn!("Skipping ducking rule with unknown trigger index {}", rule.trigger);
                continue;
            };
            let targets = rule.targets.iter().filter_map(|i| ids.get(*i).copied());
            self.set_ducking_trigger(trigger, targets)?;
        }

        info!("Restored {} channels from snapshot", ids.len());
        Ok(ids)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.sink.stop() {
            warn!("Failed to stop output sink: {}", e);
        }
    }
}
