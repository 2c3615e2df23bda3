//! Shared fixtures for the Minstrel integration tests

use minstrel_core::domain::{
    AppConfig, BufferSource, Engine, OfflineSink, SampleStream, StreamFormat,
};

pub const SAMPLE_RATE: u32 = 44100;

/// Mono format used by most scenarios
pub fn mono() -> StreamFormat {
    StreamFormat::new(SAMPLE_RATE, 1)
}

/// Playing-ready engine on an offline sink
pub fn engine(format: StreamFormat) -> (Engine, OfflineSink) {
    let config = AppConfig {
        sample_rate: format.hz(),
        channels: format.channels.count(),
        ..Default::default()
    };
    let sink = OfflineSink::new();
    let engine = Engine::new(&config, Box::new(sink.clone())).expect("offline engine");
    (engine, sink)
}

pub fn generate_sine_wave(frequency: f32, sample_rate: u32, frames: usize, peak: f32) -> Vec<f32> {
    (0..frames)
        .map(|i| 2.0 * std::f32::consts::PI * frequency * i as f32 / sample_rate as f32)
        .map(|phase| phase.sin() * peak)
        .collect()
}

pub fn source(samples: Vec<f32>, format: StreamFormat) -> Box<dyn SampleStream> {
    Box::new(BufferSource::new(samples, format))
}

pub fn constant(value: f32, frames: usize, format: StreamFormat) -> Box<dyn SampleStream> {
    source(vec![value; frames * format.stride()], format)
}
