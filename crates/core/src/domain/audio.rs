//! Audio format and device abstractions
//!
//! This module defines the format metadata carried by every sample stream
//! and the platform-agnostic device interfaces. Implementations for specific
//! platforms live in the `infra` crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or playback control
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for a channel, effect or device
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Input/Output error at the OS level
    #[error("OS error: {0}")]
    OsError(String),

    /// Source or device does not support the requested format
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// No channel with this id is registered
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// No effect with this id in the channel's chain
    #[error("Effect not found: {0}")]
    EffectNotFound(String),

    /// The mixer has no room for another channel or effect
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Unique identifier for an audio device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz96000,
    Hz192000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Hz192000 => 192000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            192000 => SampleRate::Hz192000,
            hz => SampleRate::Custom(hz),
        }
    }
}

/// Number of audio channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
    Surround(u16),
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
            ChannelCount::Surround(n) => *n,
        }
    }

    pub fn from_count(n: u16) -> Self {
        match n {
            1 => ChannelCount::Mono,
            2 => ChannelCount::Stereo,
            n => ChannelCount::Surround(n),
        }
    }
}

/// Format descriptor shared by every [`SampleStream`](super::stream::SampleStream)
///
/// Samples are always interleaved `f32` normalized to [-1.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: SampleRate::from_hz(sample_rate),
            channels: ChannelCount::from_count(channels.max(1)),
        }
    }

    /// Number of interleaved channels as a slice stride
    pub fn stride(&self) -> usize {
        self.channels.count().max(1) as usize
    }

    pub fn hz(&self) -> u32 {
        self.sample_rate.hz()
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz44100,
            channels: ChannelCount::Stereo,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz / {} ch", self.hz(), self.channels.count())
    }
}

/// Configuration for a device stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub format: StreamFormat,
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            format: StreamFormat::default(),
            buffer_size: 512,
        }
    }
}

/// Type of audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Input,
    Output,
    Duplex,
}

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub default_sample_rate: Option<SampleRate>,
}

/// Trait for enumerating available audio devices
///
/// Enumeration belongs to the sink side; the engine only ever selects an
/// output by index.
pub trait AudioEnumerator {
    /// List all available audio devices
    fn devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Get all input devices
    fn input_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Get all output devices
    fn output_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Get the default output device
    fn default_output_device(&self) -> Result<DeviceInfo>;
}
