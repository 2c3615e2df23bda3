//! Domain entities and business rules

pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod metronome;
pub mod mixer;
pub mod spectrum;
pub mod stream;
pub mod tap;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{
    AudioEnumerator, AudioError, ChannelCount, DeviceId, DeviceInfo, DeviceType, SampleRate,
    StreamConfig, StreamFormat,
};
pub use config::{AppConfig, ConfigError, ConfigManager};
pub use dsp::{
    BiquadCoeffs, BiquadFilter, CompressorParams, DistortionMode, DistortionParams, DspError,
    Effect, EffectId, EffectParams, EqBand, EqualizerSettings, ReverbParams,
};
pub use engine::{
    ChannelSnapshot, DuckingRuleSnapshot, EffectSnapshot, Engine, EngineMonitor, EngineSnapshot,
    OfflineSink, OutputSink, PlaybackState,
};
pub use metronome::{Metronome, MetronomeControl};
pub use mixer::{
    AudioLevel, Channel, ChannelId, ChannelMeter, DuckingController, DuckingSettings, MasterParams,
    MasterStream, ProcessingFault, MAX_CHANNELS,
};
pub use spectrum::{SpectrumAnalyzer, SpectrumSnapshot};
pub use stream::{BufferSource, LoopRegion, SampleStream, Silence};
pub use tap::SampleTap;
