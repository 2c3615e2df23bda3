//! Integration tests for the mixing engine
//!
//! These tests drive the complete pipeline through an offline sink:
//! sources, channel gain, equalizer, effect chains, ducking, the master bus
//! and snapshots.

use minstrel_core::domain::dsp::{
    CompressorParams, DistortionMode, DistortionParams, Effect, EffectParams, EqBand,
    EqualizerSettings, Reverb, ReverbParams,
};
use minstrel_core::domain::{
    AudioError, BufferSource, ChannelId, Metronome, PlaybackState, SampleStream, StreamFormat,
};
use minstrel_infra::audio::ResampleStream;
use minstrel_tests::{constant, engine, generate_sine_wave, mono, source, SAMPLE_RATE};
use proptest::prelude::*;

// ============================================================================
// BASIC MIXING TESTS
// ============================================================================

#[test]
fn test_two_channels_with_master_volume() {
    let (mut engine, sink) = engine(mono());
    let a = engine.create_channel("A").unwrap();
    let b = engine.create_channel("B").unwrap();
    engine.set_source(a, constant(0.25, 2048, mono())).unwrap();
    engine.set_source(b, constant(0.5, 2048, mono())).unwrap();
    engine.set_master_volume(0.8);
    engine.start().unwrap();

    let output = sink.render(512).unwrap();
    let expected = 0.8 * (0.25 + 0.5);
    for sample in output {
        assert!((sample - expected).abs() < 1e-6, "got {sample}");
    }
}

#[test]
fn test_stereo_channels_stay_interleaved() {
    let format = StreamFormat::new(SAMPLE_RATE, 2);
    let (mut engine, sink) = engine(format);
    let id = engine.create_channel("Stereo").unwrap();
    let frames: Vec<f32> = (0..1024).flat_map(|_| [0.5, -0.25]).collect();
    engine.set_source(id, source(frames, format)).unwrap();
    engine.start().unwrap();

    let output = sink.render(256).unwrap();
    for frame in output.chunks(2) {
        assert_eq!(frame, [0.5, -0.25]);
    }
}

#[test]
fn test_source_end_is_silence_not_error() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("Short").unwrap();
    engine.set_source(id, constant(0.5, 100, mono())).unwrap();
    engine.start().unwrap();

    let output = sink.render(300).unwrap();
    assert_eq!(output.len(), 300);
    assert!(output[..100].iter().all(|&s| s == 0.5));
    assert!(output[100..].iter().all(|&s| s == 0.0));
    assert!(engine.drain_faults().is_empty());
}

#[test]
fn test_channel_without_source_is_silent() {
    let (mut engine, sink) = engine(mono());
    let a = engine.create_channel("Bound").unwrap();
    engine.create_channel("Unbound").unwrap();
    engine.set_source(a, constant(0.3, 1024, mono())).unwrap();
    engine.start().unwrap();

    let output = sink.render(64).unwrap();
    assert!(output.iter().all(|&s| (s - 0.3).abs() < 1e-6));
}

#[test]
fn test_rejected_source_leaves_channel_silent() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("A").unwrap();
    engine.set_source(id, constant(0.5, 1024, mono())).unwrap();

    let wrong = StreamFormat::new(48000, 1);
    let err = engine.set_source(id, constant(0.9, 1024, wrong)).unwrap_err();
    assert!(matches!(err, AudioError::UnsupportedConfiguration(_)));
    assert!(!engine.channel(id).unwrap().has_source());

    engine.start().unwrap();
    assert!(sink.render(64).unwrap().iter().all(|&s| s == 0.0));
}

#[test]
fn test_resampled_source_can_be_bound() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("Resampled").unwrap();

    let slow = StreamFormat::new(22050, 1);
    let resampled =
        ResampleStream::new(BufferSource::new(vec![0.5; 2000], slow), SAMPLE_RATE).unwrap();
    assert_eq!(resampled.format(), mono());
    engine.set_source(id, Box::new(resampled)).unwrap();
    engine.start().unwrap();

    let output = sink.render(5000).unwrap();
    assert!(output[500..3500].iter().all(|&s| (s - 0.5).abs() < 0.01));
    // 2000 frames at half the rate last 4000 frames
    assert!(output[4000..].iter().all(|&s| s == 0.0));
}

// ============================================================================
// GAIN STAGE TESTS
// ============================================================================

#[test]
fn test_mute_and_master_mute() {
    let (mut engine, sink) = engine(mono());
    let a = engine.create_channel("A").unwrap();
    let b = engine.create_channel("B").unwrap();
    engine.set_source(a, constant(0.25, 4096, mono())).unwrap();
    engine.set_source(b, constant(0.5, 4096, mono())).unwrap();
    engine.start().unwrap();

    engine.channel_mut(b).unwrap().set_muted(true);
    assert!(sink.render(32).unwrap().iter().all(|&s| s == 0.25));

    engine.set_master_muted(true);
    assert!(sink.render(32).unwrap().iter().all(|&s| s == 0.0));
}

#[test]
fn test_out_of_range_settings_are_clamped() {
    let (mut engine, _sink) = engine(mono());
    let id = engine.create_channel("A").unwrap();

    engine.set_master_volume(7.0);
    assert_eq!(engine.master_volume(), 1.0);

    let channel = engine.channel_mut(id).unwrap();
    channel.set_volume(-1.0);
    assert_eq!(channel.volume(), 0.0);
    assert_eq!(channel.set_eq_band(EqBand::Hz60, -100.0).unwrap(), -20.0);

    let fx = channel
        .add_effect(DistortionParams {
            drive: 9.0,
            ..Default::default()
        })
        .unwrap();
    let (_, params, _) = channel.effects().find(|(id, _, _)| *id == fx).unwrap();
    let expected = DistortionParams {
        drive: 1.0,
        ..Default::default()
    };
    assert_eq!(params, EffectParams::Distortion(expected));
}

// ============================================================================
// DUCKING TESTS
// ============================================================================

#[test]
fn test_ducking_trigger_reduces_and_restores_targets() {
    let (mut engine, sink) = engine(mono());
    let t = engine.create_channel("Voice").unwrap();
    let a = engine.create_channel("Music").unwrap();
    let b = engine.create_channel("Ambience").unwrap();
    engine.set_source(a, constant(0.5, 8192, mono())).unwrap();
    engine.set_source(b, constant(0.25, 8192, mono())).unwrap();
    engine.start().unwrap();

    let duck_level = engine.channel(a).unwrap().duck_level();
    engine.set_ducking_trigger(t, [a, b]).unwrap();
    engine.set_trigger_active(t, true).unwrap();

    let expected = 0.5 * duck_level + 0.25 * duck_level;
    for sample in sink.render(128).unwrap() {
        assert!((sample - expected).abs() < 1e-6);
    }
    assert!(engine.channel(a).unwrap().is_auto_ducked());

    assert!(engine.remove_ducking_trigger(t));
    for sample in sink.render(128).unwrap() {
        assert!((sample - 0.75).abs() < 1e-6);
    }
    assert!(!engine.channel(b).unwrap().is_auto_ducked());
}

#[test]
fn test_ducking_uses_each_targets_own_level() {
    let (mut engine, _sink) = engine(mono());
    let t = engine.create_channel("T").unwrap();
    let a = engine.create_channel("A").unwrap();
    engine.channel_mut(a).unwrap().set_duck_level(0.5);
    engine.channel_mut(a).unwrap().set_volume(0.8);

    engine.set_ducking_trigger(t, [a]).unwrap();
    engine.set_trigger_active(t, true).unwrap();
    assert!((engine.channel(a).unwrap().effective_gain() - 0.4).abs() < 1e-6);

    engine.set_trigger_active(t, false).unwrap();
    assert!((engine.channel(a).unwrap().effective_gain() - 0.8).abs() < 1e-6);
}

// ============================================================================
// EFFECT CHAIN TESTS
// ============================================================================

/// Envelope follower and static gain, sample by sample
fn reference_compressor(input: &[f32], params: CompressorParams) -> (Vec<f32>, Vec<f32>) {
    let mut env = 0.0_f32;
    let mut envelopes = Vec::with_capacity(input.len());
    let output = input
        .iter()
        .map(|&x| {
            let level = x.abs();
            let coeff = if level > env { params.attack } else { params.release };
            env += (level - env) * coeff;
            envelopes.push(env);
            x * (params.static_gain(env) * params.makeup_gain)
        })
        .collect();
    (output, envelopes)
}

#[test]
fn test_compressor_end_to_end() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("A").unwrap();

    let params = CompressorParams {
        threshold: 0.7,
        ratio: 4.0,
        attack: 0.003,
        release: 0.1,
        makeup_gain: 1.0,
    };
    let sine = generate_sine_wave(110.0, SAMPLE_RATE, SAMPLE_RATE as usize, 10.0);
    {
        let channel = engine.channel_mut(id).unwrap();
        channel.set_volume(0.5);
        channel.add_effect(params).unwrap();
    }
    engine.set_source(id, source(sine.clone(), mono())).unwrap();
    engine.start().unwrap();

    let output = sink.render(sine.len()).unwrap();

    // Volume is applied before the chain
    let at_compressor: Vec<f32> = sine.iter().map(|s| s * 0.5).collect();
    assert!(at_compressor.iter().any(|s| s.abs() > 0.7));
    let (expected, envelopes) = reference_compressor(&at_compressor, params);

    let mut attenuated = 0;
    for i in 0..output.len() {
        assert!(
            (output[i] - expected[i]).abs() < 1e-5,
            "sample {i}: {} vs {}",
            output[i],
            expected[i]
        );
        if envelopes[i] <= params.threshold {
            assert_eq!(output[i], at_compressor[i], "sample {i} below threshold changed");
        } else {
            assert!(output[i].abs() <= at_compressor[i].abs());
            if output[i].abs() < at_compressor[i].abs() {
                attenuated += 1;
            }
        }
    }
    assert!(attenuated > 0);
    assert!(engine.drain_faults().is_empty());
}

#[test]
fn test_stereo_compressor_shares_one_envelope() {
    let format = StreamFormat::new(SAMPLE_RATE, 2);
    let (mut engine, sink) = engine(format);
    let id = engine.create_channel("Stereo").unwrap();

    let params = CompressorParams::default();
    let input: Vec<f32> = (0..4096).flat_map(|_| [0.9, 0.0]).collect();
    engine.channel_mut(id).unwrap().add_effect(params).unwrap();
    engine.set_source(id, source(input.clone(), format)).unwrap();
    engine.start().unwrap();

    let output = sink.render(input.len()).unwrap();

    // One detector walks the interleaved stream, left and right alike
    let (expected, envelopes) = reference_compressor(&input, params);
    for i in 0..output.len() {
        assert!(
            (output[i] - expected[i]).abs() < 1e-6,
            "sample {i}: {} vs {}",
            output[i],
            expected[i]
        );
    }

    // The silent right channel keeps the envelope under the threshold
    assert!(envelopes.iter().all(|&e| e < params.threshold));
    let last_left = output[output.len() - 2];
    assert!((last_left - 0.9).abs() < 1e-6, "last left {last_left}");
    assert!(engine.drain_faults().is_empty());
}

#[test]
fn test_disabled_effect_is_skipped() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("A").unwrap();
    engine.set_source(id, constant(0.5, 4096, mono())).unwrap();
    let fx = engine
        .channel_mut(id)
        .unwrap()
        .add_effect(DistortionParams {
            drive: 1.0,
            tone: 1.0,
            level: 0.2,
            mode: DistortionMode::Fuzz,
        })
        .unwrap();
    engine.start().unwrap();

    assert!(sink.render(32).unwrap().iter().all(|&s| s != 0.5));

    engine.channel_mut(id).unwrap().set_effect_enabled(fx, false).unwrap();
    assert!(sink.render(32).unwrap().iter().all(|&s| s == 0.5));

    engine.channel_mut(id).unwrap().remove_effect(fx).unwrap();
    assert_eq!(engine.channel(id).unwrap().effect_count(), 0);
    assert!(sink.render(32).unwrap().iter().all(|&s| s == 0.5));
}

#[test]
fn test_failing_effect_is_isolated() {
    let (mut engine, sink) = engine(mono());
    let broken = engine.create_channel("Broken").unwrap();
    let healthy = engine.create_channel("Healthy").unwrap();
    engine.set_source(broken, constant(f32::MAX, 4096, mono())).unwrap();
    engine.set_source(healthy, constant(0.25, 4096, mono())).unwrap();
    engine
        .channel_mut(broken)
        .unwrap()
        .add_effect(CompressorParams {
            threshold: 1.0,
            ratio: 1.0,
            makeup_gain: 2.0,
            ..Default::default()
        })
        .unwrap();
    engine.start().unwrap();

    sink.render(64).unwrap();
    let faults = engine.drain_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].channel, broken);

    // The broken unit stays bypassed; nothing else is affected
    engine.channel_mut(broken).unwrap().set_muted(true);
    assert!(sink.render(64).unwrap().iter().all(|&s| s == 0.25));
    assert!(engine.drain_faults().is_empty());
}

#[test]
fn test_reverb_tail_after_source_ends() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("Verb").unwrap();
    engine
        .channel_mut(id)
        .unwrap()
        .add_effect(ReverbParams {
            room_size: 0.8,
            damping: 0.2,
            wet_level: 0.5,
            dry_level: 0.5,
        })
        .unwrap();
    engine.set_source(id, constant(0.8, 64, mono())).unwrap();
    engine.start().unwrap();

    let output = sink.render(8192).unwrap();
    assert!(output[4096..].iter().any(|&s| s != 0.0));
    assert!(output.iter().all(|s| s.is_finite()));
}

#[test]
fn test_stereo_reverb_runs_one_tank() {
    let format = StreamFormat::new(SAMPLE_RATE, 2);
    let (mut engine, sink) = engine(format);
    let id = engine.create_channel("Verb").unwrap();

    let params = ReverbParams {
        room_size: 0.5,
        damping: 0.0,
        wet_level: 1.0,
        dry_level: 0.0,
    };
    engine.channel_mut(id).unwrap().add_effect(params).unwrap();

    // Impulse on the left channel only
    let mut input = vec![0.0; 2 * 4096];
    input[0] = 1.0;
    engine.set_source(id, source(input.clone(), format)).unwrap();
    engine.start().unwrap();

    let output = sink.render(input.len()).unwrap();

    let mut expected = input;
    Reverb::new(params).process(&mut expected).unwrap();
    assert_eq!(output, expected);

    // The 1277-sample line echoes the left impulse into a right slot
    assert_eq!(1277 % 2, 1);
    assert!((output[1277] - 1.0 / 8.0).abs() < 1e-6);
}

#[test]
fn test_stereo_reverb_without_wet_is_dry() {
    let format = StreamFormat::new(SAMPLE_RATE, 2);
    let (mut engine, sink) = engine(format);
    let id = engine.create_channel("Verb").unwrap();
    engine
        .channel_mut(id)
        .unwrap()
        .add_effect(ReverbParams {
            room_size: 0.9,
            damping: 0.3,
            wet_level: 0.0,
            dry_level: 0.6,
        })
        .unwrap();

    let input: Vec<f32> = generate_sine_wave(220.0, SAMPLE_RATE, 4096, 0.5)
        .into_iter()
        .flat_map(|s| [s, -0.5 * s])
        .collect();
    engine.set_source(id, source(input.clone(), format)).unwrap();
    engine.start().unwrap();

    let output = sink.render(input.len()).unwrap();
    for (i, (out, x)) in output.iter().zip(&input).enumerate() {
        assert_eq!(*out, x * 0.6, "sample {i}");
    }
}

#[test]
fn test_equalizer_change_is_heard() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("EQ").unwrap();
    let sine = generate_sine_wave(60.0, SAMPLE_RATE, 16384, 0.25);
    engine.set_source(id, source(sine, mono())).unwrap();
    engine.start().unwrap();

    let flat = sink.render(8192).unwrap();
    let flat_peak = flat[4096..].iter().fold(0.0_f32, |a, s| a.max(s.abs()));

    let boost = EqualizerSettings::from_gains([12.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    engine.channel_mut(id).unwrap().set_equalizer(boost).unwrap();
    let boosted = sink.render(8192).unwrap();
    let boosted_peak = boosted[4096..].iter().fold(0.0_f32, |a, s| a.max(s.abs()));

    // +12 dB is about 4x
    assert!(boosted_peak > flat_peak * 3.0, "{flat_peak} -> {boosted_peak}");
}

// ============================================================================
// METRONOME
// ============================================================================

#[test]
fn test_metronome_clicks_on_the_sample_grid() {
    let (mut engine, sink) = engine(mono());
    let metronome = Metronome::new(mono());
    let control = metronome.control();
    control.set_bpm(120);
    control.set_volume(1.0);
    control.set_enabled(true);

    let id = engine.create_channel("Click").unwrap();
    engine.set_source(id, Box::new(metronome)).unwrap();
    engine.start().unwrap();

    let beat = Metronome::frames_per_beat(SAMPLE_RATE, 120) as usize;
    assert_eq!(beat, 22050);
    let output = sink.render(beat * 3).unwrap();

    let click = (SAMPLE_RATE as f32 * 0.05) as usize;
    for start in [0, beat, beat * 2] {
        assert!(output[start + 1..start + click].iter().any(|&s| s != 0.0));
        assert!(output[start + click..start + beat].iter().all(|&s| s == 0.0));
    }
}

// ============================================================================
// TRANSPORT & SNAPSHOTS
// ============================================================================

#[test]
fn test_transport_gates_output() {
    let (mut engine, sink) = engine(mono());
    let id = engine.create_channel("A").unwrap();
    engine.set_source(id, constant(0.5, 8192, mono())).unwrap();

    assert_eq!(engine.state(), PlaybackState::Stopped);
    assert!(sink.render(32).unwrap().iter().all(|&s| s == 0.0));

    engine.start().unwrap();
    assert!(sink.render(32).unwrap().iter().all(|&s| s == 0.5));

    engine.pause().unwrap();
    assert!(sink.render(32).unwrap().iter().all(|&s| s == 0.0));

    engine.resume().unwrap();
    assert!(sink.render(32).unwrap().iter().all(|&s| s == 0.5));

    engine.stop().unwrap();
    assert_eq!(engine.state(), PlaybackState::Stopped);
}

#[test]
fn test_snapshot_restore_reproduces_mix() {
    let (mut engine, sink) = engine(mono());
    let a = engine.create_channel("Music").unwrap();
    let t = engine.create_channel("Voice").unwrap();
    {
        let music = engine.channel_mut(a).unwrap();
        music.set_volume(0.6);
        music.set_eq_band(EqBand::Hz1k, 3.0).unwrap();
        music.add_effect(CompressorParams::default()).unwrap();
        let fx = music.add_effect(DistortionParams::default()).unwrap();
        music.set_effect_enabled(fx, false).unwrap();
    }
    engine.set_master_volume(0.7);
    engine.set_ducking_trigger(t, [a]).unwrap();
    let snapshot = engine.snapshot();

    let (mut restored, restored_sink) = minstrel_tests::engine(mono());
    let ids = restored.restore(&snapshot).unwrap();
    assert_eq!(restored.snapshot(), snapshot);

    // Same configuration, same sources: same output
    let sine = generate_sine_wave(440.0, SAMPLE_RATE, 4096, 0.9);
    engine.set_source(a, source(sine.clone(), mono())).unwrap();
    restored.set_source(ids[0], source(sine, mono())).unwrap();
    engine.start().unwrap();
    restored.start().unwrap();

    assert_eq!(sink.render(2048).unwrap(), restored_sink.render(2048).unwrap());
}

#[test]
fn test_removed_channel_is_gone() {
    let (mut engine, sink) = engine(mono());
    let a = engine.create_channel("A").unwrap();
    engine.set_source(a, constant(0.5, 4096, mono())).unwrap();
    engine.start().unwrap();
    sink.render(16).unwrap();

    engine.remove_channel(a).unwrap();
    assert!(sink.render(16).unwrap().iter().all(|&s| s == 0.0));
    assert!(matches!(
        engine.set_source(a, constant(0.5, 16, mono())),
        Err(AudioError::ChannelNotFound(_))
    ));
    assert!(engine.channel(ChannelId(a.0 + 100)).is_none());
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_flat_engine_is_transparent(
        samples in proptest::collection::vec(-1.0f32..1.0, 1..2048),
    ) {
        let (mut engine, sink) = engine(mono());
        let id = engine.create_channel("A").unwrap();
        engine.set_source(id, source(samples.clone(), mono())).unwrap();
        engine.start().unwrap();

        let output = sink.render(samples.len()).unwrap();
        prop_assert_eq!(output, samples);
    }

    #[test]
    fn prop_distortion_bounded_in_engine(
        samples in proptest::collection::vec(-100.0f32..100.0, 1..1024),
        drive in 0.0f32..=1.0,
    ) {
        let (mut engine, sink) = engine(mono());
        let id = engine.create_channel("A").unwrap();
        engine
            .channel_mut(id)
            .unwrap()
            .add_effect(DistortionParams { drive, ..Default::default() })
            .unwrap();
        engine.set_source(id, source(samples.clone(), mono())).unwrap();
        engine.start().unwrap();

        for sample in sink.render(samples.len()).unwrap() {
            prop_assert!(sample.abs() <= 1.0);
        }
    }
}
