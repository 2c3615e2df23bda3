//! Sample-clocked metronome source
//!
//! Beats are counted in frames of the stream the metronome feeds, so every
//! click starts on an exact sample index no matter how the host slices its
//! reads. Settings live in atomics and take effect on the next read.

use crate::domain::audio::StreamFormat;
use crate::domain::dsp;
use crate::domain::mixer::AtomicF32;
use crate::domain::stream::SampleStream;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const MIN_BPM: u32 = 20;
pub const MAX_BPM: u32 = 300;
pub const MAX_BEATS_PER_MEASURE: u32 = 16;

/// Click length in seconds
const CLICK_SECONDS: f32 = 0.05;
const ACCENT_HZ: f32 = 800.0;
const BEAT_HZ: f32 = 400.0;

#[derive(Debug)]
struct Shared {
    bpm: AtomicU32,
    beats_per_measure: AtomicU32,
    volume: AtomicF32,
    enabled: AtomicBool,
}

/// Control handle for a [`Metronome`]
#[derive(Debug, Clone)]
pub struct MetronomeControl {
    shared: Arc<Shared>,
}

impl MetronomeControl {
    pub fn bpm(&self) -> u32 {
        self.shared.bpm.load(Ordering::Relaxed)
    }

    /// Set tempo, clamped to 20..=300 BPM
    pub fn set_bpm(&self, bpm: u32) -> u32 {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.shared.bpm.store(bpm, Ordering::Relaxed);
        debug!("Metronome tempo set to {} BPM", bpm);
        bpm
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.shared.beats_per_measure.load(Ordering::Relaxed)
    }

    pub fn set_beats_per_measure(&self, beats: u32) -> u32 {
        let beats = beats.clamp(1, MAX_BEATS_PER_MEASURE);
        self.shared
            .beats_per_measure
            .store(beats, Ordering::Relaxed);
        debug!("Metronome measure set to {} beats", beats);
        beats
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume.load()
    }

    pub fn set_volume(&self, volume: f32) -> f32 {
        let volume = dsp::clamp_or(volume, 0.0, 1.0, 0.0);
        self.shared.volume.store(volume);
        volume
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Relaxed)
    }

    /// Start or stop clicking; restarting begins on an accented beat
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Relaxed);
        debug!("Metronome enabled: {}", enabled);
    }
}

/// Click generator implementing [`SampleStream`]
///
/// Bind it to a channel like any other source. It never ends.
#[derive(Debug)]
pub struct Metronome {
    shared: Arc<Shared>,
    format: StreamFormat,
    /// Frames elapsed since the current beat started
    frame_in_beat: u64,
    /// Beat index within the measure (0 is accented)
    beat: u32,
    running: bool,
}

impl Metronome {
    /// New metronome at 120 BPM, 4/4, volume 0.5, disabled
    pub fn new(format: StreamFormat) -> Self {
        let shared = Arc::new(Shared {
            bpm: AtomicU32::new(120),
            beats_per_measure: AtomicU32::new(4),
            volume: AtomicF32::new(0.5),
            enabled: AtomicBool::new(false),
        });

        Self {
            shared,
            format,
            frame_in_beat: 0,
            beat: 0,
            running: false,
        }
    }

    pub fn control(&self) -> MetronomeControl {
        MetronomeControl {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current beat within the measure
    pub fn beat(&self) -> u32 {
        self.beat
    }

    /// Frames per beat at `bpm`
    pub fn frames_per_beat(sample_rate: u32, bpm: u32) -> u64 {
        (u64::from(sample_rate) * 60 / u64::from(bpm.clamp(MIN_BPM, MAX_BPM))).max(1)
    }
}

impl SampleStream for Metronome {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let enabled = self.shared.enabled.load(Ordering::Relaxed);
        if !enabled {
            self.running = false;
            buffer.fill(0.0);
            return buffer.len();
        }
        if !self.running {
            self.running = true;
            self.frame_in_beat = 0;
            self.beat = 0;
        }

        let sample_rate = self.format.hz();
        let stride = self.format.stride();
        let frames_per_beat = Self::frames_per_beat(sample_rate, self.shared.bpm.load(Ordering::Relaxed));
        let beats = self
            .shared
            .beats_per_measure
            .load(Ordering::Relaxed)
            .clamp(1, MAX_BEATS_PER_MEASURE);
        let volume = self.shared.volume.load();
        let click_frames = (sample_rate as f32 * CLICK_SECONDS) as u64;

        // A tempo change can leave us past the new beat length
        if self.frame_in_beat >= frames_per_beat {
            self.frame_in_beat = 0;
            self.beat = (self.beat + 1) % beats;
        }
        if self.beat >= beats {
            self.beat = 0;
        }

        for frame in buffer.chunks_mut(stride) {
            let value = if self.frame_in_beat < click_frames {
                let freq = if self.beat == 0 { ACCENT_HZ } else { BEAT_HZ };
                let t = self.frame_in_beat as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * freq * t).sin() * volume
            } else {
                0.0
            };
            frame.fill(value);

            self.frame_in_beat += 1;
            if self.frame_in_beat >= frames_per_beat {
                self.frame_in_beat = 0;
                self.beat = (self.beat + 1) % beats;
            }
        }

        buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 1000;

    fn metronome() -> (Metronome, MetronomeControl) {
        let metronome = Metronome::new(StreamFormat::new(SR, 1));
        let control = metronome.control();
        (metronome, control)
    }

    fn onsets(buffer: &[f32], frames_per_beat: usize) -> Vec<bool> {
        buffer
            .chunks(frames_per_beat)
            .map(|beat| beat[1] != 0.0)
            .collect()
    }

    #[test]
    fn test_defaults_and_clamping() {
        let (_m, control) = metronome();
        assert_eq!(control.bpm(), 120);
        assert_eq!(control.beats_per_measure(), 4);
        assert_eq!(control.volume(), 0.5);
        assert!(!control.is_enabled());

        assert_eq!(control.set_bpm(5), MIN_BPM);
        assert_eq!(control.set_bpm(1000), MAX_BPM);
        assert_eq!(control.set_beats_per_measure(0), 1);
        assert_eq!(control.set_beats_per_measure(40), 16);
        assert_eq!(control.set_volume(2.0), 1.0);
    }

    #[test]
    fn test_disabled_is_silent() {
        let (mut m, _control) = metronome();
        let mut buffer = [1.0; 64];
        assert_eq!(m.read(&mut buffer), 64);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_beats_fall_on_exact_samples() {
        let (mut m, control) = metronome();
        control.set_enabled(true);
        control.set_volume(1.0);

        // 120 BPM at 1 kHz: a beat every 500 frames, clicks 50 frames long
        assert_eq!(Metronome::frames_per_beat(SR, 120), 500);

        // Odd read sizes must not move the grid
        let mut out = Vec::new();
        for size in [7, 333, 1, 659, 1000] {
            let mut buffer = vec![0.0; size];
            m.read(&mut buffer);
            out.extend_from_slice(&buffer);
        }
        assert_eq!(out.len(), 2000);

        for beat in out.chunks(500) {
            assert!(beat[1..50].iter().any(|&s| s != 0.0));
            assert!(beat[50..].iter().all(|&s| s == 0.0));
        }
        assert_eq!(onsets(&out, 500), vec![true; 4]);
    }

    #[test]
    fn test_accent_on_first_beat() {
        let (mut m, control) = metronome();
        control.set_enabled(true);
        control.set_volume(1.0);
        control.set_beats_per_measure(2);

        let mut buffer = vec![0.0; 1000];
        m.read(&mut buffer);

        // Frame 1 of each beat: sin(2*pi*f/1000)
        let accent = (2.0 * std::f32::consts::PI * ACCENT_HZ / SR as f32).sin();
        let plain = (2.0 * std::f32::consts::PI * BEAT_HZ / SR as f32).sin();
        assert!((buffer[1] - accent).abs() < 1e-5);
        assert!((buffer[501] - plain).abs() < 1e-5);
        assert_eq!(m.beat(), 0);
    }

    #[test]
    fn test_stereo_frames_duplicated() {
        let mut m = Metronome::new(StreamFormat::new(SR, 2));
        m.control().set_enabled(true);

        let mut buffer = vec![0.0; 20];
        m.read(&mut buffer);
        for frame in buffer.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }
}
