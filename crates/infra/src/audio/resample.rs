//! Sample-rate adaptation for sources bound to a channel
//!
//! Channels only accept sources in the engine format. Wrap a source running
//! at another rate in [`ResampleStream`] to bind it. Conversion uses rubato's
//! windowed-sinc resampler on fixed input chunks.

use minstrel_core::domain::audio::{AudioError, Result, StreamFormat};
use minstrel_core::domain::stream::SampleStream;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, info};

/// Frames pulled from the upstream source per resampler chunk
const CHUNK_FRAMES: usize = 1024;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    }
}

struct Converter {
    resampler: SincFixedIn<f32>,
    /// Interleaved samples read from upstream
    interleaved: Vec<f32>,
    /// One chunk per channel
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    /// Output frames still to discard for the filter delay
    delay: usize,
    frames_in: u64,
    frames_out: u64,
    source_done: bool,
}

/// Resampling adapter over an interleaved source
///
/// Reads of any length are served; a partial frame at the end of one read
/// continues in the next. The output ends once it holds as many frames as
/// the source produced, scaled by the rate ratio.
pub struct ResampleStream<S> {
    inner: S,
    format: StreamFormat,
    channels: usize,
    ratio: f64,
    /// `None` when the rates match
    converter: Option<Converter>,
    /// Converted, interleaved samples not yet handed out
    pending: Vec<f32>,
    pending_pos: usize,
    finished: bool,
}

impl<S: SampleStream> ResampleStream<S> {
    /// Present `inner` at `target_rate`, keeping its channel count
    pub fn new(inner: S, target_rate: u32) -> Result<Self> {
        let source = inner.format();
        let channels = source.stride();
        let format = StreamFormat::new(target_rate, source.channels.count());
        let ratio = f64::from(format.hz()) / f64::from(source.hz().max(1));

        let converter = if source.hz() == format.hz() {
            debug!(
                "Source and target rates match ({}Hz), bypassing resampling",
                source.hz()
            );
            None
        } else {
            info!(
                "Creating resampler: {}Hz -> {}Hz, {} channels",
                source.hz(),
                format.hz(),
                channels
            );

            let resampler =
                SincFixedIn::<f32>::new(ratio, 2.0, sinc_parameters(), CHUNK_FRAMES, channels)
                    .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;
            let delay = resampler.output_delay();
            let output = resampler.output_buffer_allocate(true);

            Some(Converter {
                interleaved: vec![0.0; CHUNK_FRAMES * channels],
                input: vec![vec![0.0; CHUNK_FRAMES]; channels],
                output,
                delay,
                frames_in: 0,
                frames_out: 0,
                source_done: false,
                resampler,
            })
        };

        let pending_capacity = converter
            .as_ref()
            .map_or(0, |c| c.resampler.output_frames_max() * channels);

        Ok(Self {
            inner,
            format,
            channels,
            ratio,
            converter,
            pending: Vec::with_capacity(pending_capacity),
            pending_pos: 0,
            finished: false,
        })
    }

    /// Output frames per input frame
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn is_bypassed(&self) -> bool {
        self.converter.is_none()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Convert one more chunk into `pending`; false once the output is complete
    fn refill(&mut self) -> bool {
        let Some(conv) = self.converter.as_mut() else {
            return false;
        };
        let channels = self.channels;

        loop {
            if conv.source_done {
                let expected = (conv.frames_in as f64 * self.ratio).round() as u64;
                if conv.frames_out >= expected {
                    return false;
                }
            }

            let needed = conv.resampler.input_frames_next();
            let frames = if conv.source_done {
                0
            } else {
                let want = needed * channels;
                let got = self.inner.read(&mut conv.interleaved[..want]);
                if got < want {
                    conv.source_done = true;
                }
                got / channels
            };
            conv.frames_in += frames as u64;

            // The tail of a short chunk is zero-padded; after the source ends
            // whole silent chunks flush the filter
            for (ch, input) in conv.input.iter_mut().enumerate() {
                for (i, slot) in input[..needed].iter_mut().enumerate() {
                    *slot = if i < frames {
                        conv.interleaved[i * channels + ch]
                    } else {
                        0.0
                    };
                }
            }

            let produced = match conv
                .resampler
                .process_into_buffer(&conv.input, &mut conv.output, None)
            {
                Ok((_, produced)) => produced,
                // Buffers are sized by the resampler itself
                Err(_) => return false,
            };

            let skip = conv.delay.min(produced);
            conv.delay -= skip;

            let mut available = (produced - skip) as u64;
            if conv.source_done {
                let expected = (conv.frames_in as f64 * self.ratio).round() as u64;
                available = available.min(expected.saturating_sub(conv.frames_out));
            }
            if available == 0 {
                continue;
            }

            self.pending.clear();
            self.pending_pos = 0;
            for frame in skip..skip + available as usize {
                self.pending
                    .extend(conv.output.iter().map(|channel| channel[frame]));
            }
            conv.frames_out += available;
            return true;
        }
    }
}

impl<S: SampleStream> SampleStream for ResampleStream<S> {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        if self.is_bypassed() {
            return self.inner.read(buffer);
        }

        let mut written = 0;
        while written < buffer.len() && !self.finished {
            if self.pending_pos == self.pending.len() && !self.refill() {
                self.finished = true;
                break;
            }

            let n = (self.pending.len() - self.pending_pos).min(buffer.len() - written);
            buffer[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }

        written
    }
}
