//! Live input capture as a sample stream
//!
//! The device callback pushes into a lock-free SPSC ring; the mixer pops
//! from it through [`CaptureSource`]. The CPAL stream itself is not `Send`,
//! so it stays on the control side inside [`LiveCapture`].

use super::cpal_backend::{device_name, CpalEnumerator};
use cpal::traits::{DeviceTrait, StreamTrait};
use minstrel_core::domain::audio::{AudioError, Result, StreamFormat};
use minstrel_core::domain::mixer::AudioLevel;
use minstrel_core::domain::stream::SampleStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Ring capacity in seconds of audio
const RING_SECONDS: f32 = 0.5;

/// Peak of the most recent capture callback, as raw `f32` bits
#[derive(Debug, Default)]
struct CapturePeak(AtomicU32);

impl CapturePeak {
    fn store(&self, peak: f32) {
        self.0.store(peak.to_bits(), Ordering::Relaxed);
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Control-side handle of an open input device
pub struct LiveCapture {
    _stream: cpal::Stream,
    device: String,
    format: StreamFormat,
    peak: Arc<CapturePeak>,
}

impl LiveCapture {
    /// Open input device `index` (or the default) and start capturing
    ///
    /// The device runs at its default sample rate. Its frames are remixed to
    /// `channels` in the callback; adapt the rate with
    /// [`ResampleStream`](super::ResampleStream) before binding the source.
    pub fn open(
        enumerator: &CpalEnumerator,
        index: Option<usize>,
        channels: u16,
    ) -> Result<(Self, CaptureSource)> {
        let device = enumerator.input_device(index)?;
        let name = device_name(&device);

        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
        let input_channels = usize::from(default_config.channels().max(1));
        let format = StreamFormat::new(default_config.sample_rate(), channels);
        let stride = format.stride();

        let capacity = ((format.hz() as f32 * RING_SECONDS) as usize).max(1) * stride;
        let (mut producer, consumer) = rtrb::RingBuffer::<f32>::new(capacity);
        let peak = Arc::new(CapturePeak::default());

        let cpal_config = cpal::StreamConfig {
            channels: input_channels as u16,
            sample_rate: format.hz(),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "Opening input stream: device={}, {} ch in, {}",
            name, input_channels, format
        );

        let callback_peak = Arc::clone(&peak);
        let stream = device
            .build_input_stream(
                &cpal_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut block_peak = 0.0_f32;
                    for frame in data.chunks(input_channels) {
                        let mono = frame.iter().sum::<f32>() / frame.len() as f32;
                        for out in 0..stride {
                            let sample = if frame.len() == stride { frame[out] } else { mono };
                            block_peak = block_peak.max(sample.abs());
                            // Overrun drops the newest samples
                            let _ = producer.push(sample);
                        }
                    }
                    callback_peak.store(block_peak);
                },
                |err| error!("Input stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;

        let source = CaptureSource::new(consumer, format);
        let capture = Self {
            _stream: stream,
            device: name,
            format,
            peak,
        };
        Ok((capture, source))
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Peak level of the most recent captured block
    pub fn level(&self) -> AudioLevel {
        AudioLevel::from_amplitude(self.peak.load())
    }
}

/// Captured audio as a never-ending sample stream
///
/// When the device has not delivered enough samples yet, the rest of the
/// buffer is silence; reads are never short.
pub struct CaptureSource {
    consumer: rtrb::Consumer<f32>,
    format: StreamFormat,
    underruns: u64,
}

impl CaptureSource {
    pub(crate) fn new(consumer: rtrb::Consumer<f32>, format: StreamFormat) -> Self {
        Self {
            consumer,
            format,
            underruns: 0,
        }
    }

    /// Reads that had to be padded with silence
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Whether the capture side has been closed
    pub fn is_closed(&self) -> bool {
        self.consumer.is_abandoned()
    }
}

impl SampleStream for CaptureSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let mut filled = 0;
        for slot in buffer.iter_mut() {
            match self.consumer.pop() {
                Ok(sample) => {
                    *slot = sample;
                    filled += 1;
                }
                Err(_) => break,
            }
        }

        if filled < buffer.len() {
            buffer[filled..].fill(0.0);
            self.underruns += 1;
        }
        buffer.len()
    }
}
