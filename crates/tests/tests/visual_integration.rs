//! Visualization frames built from a running mix

use minstrel_core::domain::{AudioLevel, PlaybackState, SpectrumSnapshot};
use minstrel_infra::VisualizationService;
use minstrel_tests::{constant, engine, generate_sine_wave, mono, source, SAMPLE_RATE};
use std::time::Duration;

const FFT_SIZE: usize = 1024;

#[tokio::test]
async fn test_frames_follow_the_mix() {
    let (mut engine, sink) = engine(mono());
    let tone = engine.create_channel("Tone").unwrap();
    let quiet = engine.create_channel("Quiet").unwrap();

    // Exactly on bin 32
    let freq = 32.0 * SAMPLE_RATE as f32 / FFT_SIZE as f32;
    let sine = generate_sine_wave(freq, SAMPLE_RATE, 8192, 0.5);
    engine.set_source(tone, source(sine, mono())).unwrap();
    engine.set_source(quiet, constant(0.0, 8192, mono())).unwrap();
    engine.start().unwrap();
    sink.render(4096).unwrap();

    let (service, mut frames) = VisualizationService::new(engine.monitor(), FFT_SIZE, 30);
    let handle = service.spawn();

    tokio::time::timeout(Duration::from_secs(2), frames.changed())
        .await
        .unwrap()
        .unwrap();
    let frame = frames.borrow_and_update().clone();

    assert_eq!(frame.state, PlaybackState::Playing);
    assert_eq!(frame.waveform.len(), FFT_SIZE);

    let (peak_freq, _) = frame.spectrum.peak().unwrap();
    assert!((peak_freq - freq).abs() < 1.0, "peak at {peak_freq} Hz");

    let names: Vec<&str> = frame.channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Tone", "Quiet"]);
    assert!(frame.channels[0].level.current_db > -7.0);
    assert_eq!(frame.channels[1].level.current_db, AudioLevel::MIN_LEVEL);

    drop(frames);
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_paused_engine_publishes_silence() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("Tone").unwrap();
    let sine = generate_sine_wave(440.0, SAMPLE_RATE, 8192, 0.8);
    engine.set_source(id, source(sine, mono())).unwrap();
    engine.start().unwrap();
    sink.render(2048).unwrap();

    engine.pause().unwrap();
    sink.render(FFT_SIZE * 2).unwrap();

    let (mut service, frames) = VisualizationService::new(engine.monitor(), FFT_SIZE, 20);
    let frame = service.tick();

    assert_eq!(frame.state, PlaybackState::Paused);
    assert!(frame.waveform.iter().all(|&s| s == 0.0));
    assert_eq!(frame.spectrum, SpectrumSnapshot::silent(FFT_SIZE, SAMPLE_RATE));
    assert_eq!(frames.borrow().sequence, 1);
}
