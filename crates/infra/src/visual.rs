//! Periodic visualization frames
//!
//! Runs on the tokio runtime, never on the audio thread. Each tick copies
//! the latest master samples out of the engine's tap, analyzes them and
//! publishes a [`VisualFrame`] through a `watch` channel, so a slow
//! consumer only ever sees the newest frame.

use minstrel_core::domain::engine::{EngineMonitor, PlaybackState};
use minstrel_core::domain::mixer::{AudioLevel, ChannelId};
use minstrel_core::domain::spectrum::{SpectrumAnalyzer, SpectrumSnapshot};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Level of one channel at the time of a frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelLevel {
    pub id: ChannelId,
    pub name: String,
    pub level: AudioLevel,
}

/// Everything a display needs for one refresh
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualFrame {
    pub sequence: u64,
    pub state: PlaybackState,
    pub spectrum: SpectrumSnapshot,
    /// Most recent master samples, downmixed to mono
    pub waveform: Vec<f32>,
    pub master: AudioLevel,
    pub channels: Vec<ChannelLevel>,
}

impl VisualFrame {
    fn empty(fft_size: usize, sample_rate: u32) -> Self {
        Self {
            sequence: 0,
            state: PlaybackState::Stopped,
            spectrum: SpectrumSnapshot::silent(fft_size, sample_rate),
            waveform: vec![0.0; fft_size],
            master: AudioLevel::default(),
            channels: Vec::new(),
        }
    }
}

/// Builds and publishes visualization frames at a fixed rate
pub struct VisualizationService {
    monitor: EngineMonitor,
    analyzer: SpectrumAnalyzer,
    interleaved: Vec<f32>,
    mono: Vec<f32>,
    period: Duration,
    sequence: u64,
    sender: watch::Sender<Arc<VisualFrame>>,
}

impl VisualizationService {
    /// Service analyzing `fft_size` frames every `1 / rate_hz` seconds
    pub fn new(
        monitor: EngineMonitor,
        fft_size: usize,
        rate_hz: u32,
    ) -> (Self, watch::Receiver<Arc<VisualFrame>>) {
        let analyzer = SpectrumAnalyzer::new(fft_size);
        let fft_size = analyzer.fft_size();
        let stride = monitor.format().stride();
        let sample_rate = monitor.format().hz();

        let (sender, receiver) =
            watch::channel(Arc::new(VisualFrame::empty(fft_size, sample_rate)));

        let service = Self {
            monitor,
            analyzer,
            interleaved: vec![0.0; fft_size * stride],
            mono: vec![0.0; fft_size],
            period: Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1))),
            sequence: 0,
            sender,
        };
        (service, receiver)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Build one frame and publish it
    pub fn tick(&mut self) -> Arc<VisualFrame> {
        let format = self.monitor.format();
        let stride = format.stride();

        self.monitor.waveform(&mut self.interleaved);
        for (mono, frame) in self.mono.iter_mut().zip(self.interleaved.chunks(stride)) {
            *mono = frame.iter().sum::<f32>() / stride as f32;
        }
        self.analyzer.analyze(&self.mono);

        self.sequence += 1;
        let frame = Arc::new(VisualFrame {
            sequence: self.sequence,
            state: self.monitor.state(),
            spectrum: self.analyzer.snapshot(format.hz()),
            waveform: self.mono.clone(),
            master: self.monitor.master_level(),
            channels: self
                .monitor
                .channel_levels()
                .into_iter()
                .map(|(id, name, level)| ChannelLevel {
                    id,
                    name: name.to_string(),
                    level,
                })
                .collect(),
        });

        self.sender.send_replace(Arc::clone(&frame));
        frame
    }

    /// Publish frames until every receiver is gone
    pub async fn run(mut self) {
        info!(
            "Visualization running every {:?} ({}-point FFT)",
            self.period,
            self.analyzer.fft_size()
        );

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if self.sender.is_closed() {
                break;
            }
            self.tick();
        }

        debug!("Visualization stopped after {} frames", self.sequence);
    }

    /// Run on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
