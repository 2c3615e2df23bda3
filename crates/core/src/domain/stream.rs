//! Pull-based sample streams
//!
//! A [`SampleStream`] fills a caller-provided buffer with interleaved `f32`
//! samples and reports how many it produced. Producing fewer samples than
//! requested signals the natural end of the source; it is never an error.
//!
//! Streams compose by wrapping an upstream stream: [`Processed`] pulls from
//! its upstream and runs a DSP unit over the produced block in place.

use crate::domain::audio::StreamFormat;
use crate::domain::dsp::{self, Effect, MAX_BLOCK};
use std::sync::Arc;

/// Pull-based audio source or transform
///
/// # Requirements
/// - `read` must not allocate or block
/// - the only side effect of `read` is advancing the read position
pub trait SampleStream: Send {
    /// Format of the samples this stream produces
    fn format(&self) -> StreamFormat;

    /// Fill `buffer` and return the number of samples written
    ///
    /// A return value below `buffer.len()` marks the end of the source.
    fn read(&mut self, buffer: &mut [f32]) -> usize;

    /// Offset/count flavour of [`read`](Self::read)
    ///
    /// Out-of-range requests are clipped to the buffer.
    fn read_into(&mut self, buffer: &mut [f32], offset: usize, count: usize) -> usize {
        let end = offset.saturating_add(count).min(buffer.len());
        let start = offset.min(end);
        self.read(&mut buffer[start..end])
    }

    /// Wrap this stream so every block passes through `unit`
    fn through<P: Effect>(self, unit: P) -> Processed<Self, P>
    where
        Self: Sized,
    {
        Processed::new(self, unit)
    }
}

impl<S: SampleStream + ?Sized> SampleStream for Box<S> {
    fn format(&self) -> StreamFormat {
        (**self).format()
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        (**self).read(buffer)
    }
}

// ============================================================================
// COMPOSITION
// ============================================================================

/// Upstream stream followed by one in-place DSP unit
///
/// A unit that fails is restored to its input for that block and bypassed
/// for the rest of the stream's life.
pub struct Processed<S, P> {
    upstream: S,
    unit: P,
    dry: Vec<f32>,
    failed: bool,
}

impl<S: SampleStream, P: Effect> Processed<S, P> {
    pub fn new(upstream: S, unit: P) -> Self {
        Self {
            upstream,
            unit,
            dry: vec![0.0; MAX_BLOCK],
            failed: false,
        }
    }

    pub fn unit(&self) -> &P {
        &self.unit
    }

    pub fn unit_mut(&mut self) -> &mut P {
        &mut self.unit
    }

    /// Whether the unit hit an error and is now bypassed
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn into_inner(self) -> (S, P) {
        (self.upstream, self.unit)
    }
}

impl<S: SampleStream, P: Effect> SampleStream for Processed<S, P> {
    fn format(&self) -> StreamFormat {
        self.upstream.format()
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let produced = self.upstream.read(buffer);
        if self.failed || self.unit.is_bypassed() {
            return produced;
        }

        for block in buffer[..produced].chunks_mut(MAX_BLOCK) {
            if dsp::process_guarded(&mut self.unit, block, &mut self.dry).is_err() {
                self.failed = true;
                break;
            }
        }
        produced
    }
}

// ============================================================================
// STOCK SOURCES
// ============================================================================

/// Endless silence in a given format
#[derive(Debug, Clone, Copy)]
pub struct Silence {
    format: StreamFormat,
}

impl Silence {
    pub fn new(format: StreamFormat) -> Self {
        Self { format }
    }
}

impl SampleStream for Silence {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        buffer.fill(0.0);
        buffer.len()
    }
}

/// Loop region in frames, `start` inclusive and `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopRegion {
    start: u64,
    end: u64,
}

impl LoopRegion {
    /// Returns `None` unless `start < end`
    pub fn new(start: u64, end: u64) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Map a playback position onto the region
    ///
    /// Positions before `end` are returned unchanged; anything at or past
    /// `end` folds back by the overshoot modulo the region length.
    pub fn wrap(&self, position: u64) -> u64 {
        if position < self.end {
            position
        } else {
            self.start + (position - self.end) % self.len()
        }
    }
}

/// In-memory PCM source, optionally looping over a region
///
/// Decoders hand their output to this type; the samples are shared so the
/// same decoded clip can be bound to several channels.
#[derive(Debug, Clone)]
pub struct BufferSource {
    samples: Arc<[f32]>,
    format: StreamFormat,
    position: usize,
    looping: Option<LoopRegion>,
}

impl BufferSource {
    pub fn new(samples: impl Into<Arc<[f32]>>, format: StreamFormat) -> Self {
        Self {
            samples: samples.into(),
            format,
            position: 0,
            looping: None,
        }
    }

    /// Loop over `region`, clipped to the clip length
    ///
    /// A region that is empty after clipping is ignored.
    pub fn with_loop(mut self, region: LoopRegion) -> Self {
        self.looping = LoopRegion::new(region.start, region.end.min(self.frames()));
        self
    }

    pub fn loop_region(&self) -> Option<LoopRegion> {
        self.looping
    }

    /// Total length in frames
    pub fn frames(&self) -> u64 {
        (self.samples.len() / self.format.stride()) as u64
    }

    /// Current read position in frames
    pub fn position(&self) -> u64 {
        (self.position / self.format.stride()) as u64
    }

    pub fn seek(&mut self, frame: u64) {
        let stride = self.format.stride();
        let frame = frame.min(self.frames()) as usize;
        self.position = frame * stride;
    }
}

impl SampleStream for BufferSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let stride = self.format.stride();
        let mut written = 0;

        while written < buffer.len() {
            let end = match self.looping {
                Some(region) => region.end as usize * stride,
                None => self.samples.len(),
            };

            if self.position >= end {
                match self.looping {
                    Some(region) => {
                        let frame = region.wrap((self.position / stride) as u64);
                        self.position = frame as usize * stride;
                        continue;
                    }
                    None => break,
                }
            }

            let n = (end - self.position).min(buffer.len() - written);
            buffer[written..written + n]
                .copy_from_slice(&self.samples[self.position..self.position + n]);
            self.position += n;
            written += n;
        }

        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dsp::{Compressor, CompressorParams};

    fn mono() -> StreamFormat {
        StreamFormat::new(44100, 1)
    }

    #[test]
    fn test_buffer_source_end_of_stream() {
        let mut source = BufferSource::new(vec![0.1, 0.2, 0.3], mono());
        let mut buffer = [9.0; 2];

        assert_eq!(source.read(&mut buffer), 2);
        assert_eq!(buffer, [0.1, 0.2]);

        // Short read signals the end
        assert_eq!(source.read(&mut buffer), 1);
        assert_eq!(buffer[0], 0.3);
        assert_eq!(source.read(&mut buffer), 0);
    }

    #[test]
    fn test_read_into_offset() {
        let mut source = BufferSource::new(vec![1.0, 2.0], mono());
        let mut buffer = [0.0; 4];

        assert_eq!(source.read_into(&mut buffer, 1, 2), 2);
        assert_eq!(buffer, [0.0, 1.0, 2.0, 0.0]);

        // Requests past the buffer are clipped
        source.seek(0);
        assert_eq!(source.read_into(&mut buffer, 3, 10), 1);
    }

    #[test]
    fn test_loop_region_wrap() {
        assert!(LoopRegion::new(10, 10).is_none());
        assert!(LoopRegion::new(10, 5).is_none());

        let region = LoopRegion::new(10, 20).unwrap();
        assert_eq!(region.wrap(5), 5);
        assert_eq!(region.wrap(19), 19);
        assert_eq!(region.wrap(20), 10);
        assert_eq!(region.wrap(23), 13);
        assert_eq!(region.wrap(35), 15);
    }

    #[test]
    fn test_buffer_source_loops() {
        let region = LoopRegion::new(1, 3).unwrap();
        let mut source = BufferSource::new(vec![0.0, 1.0, 2.0, 3.0], mono()).with_loop(region);
        let mut buffer = [0.0; 7];

        // Looping sources never end
        assert_eq!(source.read(&mut buffer), 7);
        assert_eq!(buffer, [0.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_loop_region_clipped_to_clip() {
        let region = LoopRegion::new(2, 100).unwrap();
        let source = BufferSource::new(vec![0.0; 8], StreamFormat::new(44100, 2)).with_loop(region);
        assert_eq!(source.loop_region(), LoopRegion::new(2, 4));

        let region = LoopRegion::new(50, 100).unwrap();
        let source = BufferSource::new(vec![0.0; 8], StreamFormat::new(44100, 2)).with_loop(region);
        assert!(source.loop_region().is_none());
    }

    #[test]
    fn test_silence() {
        let mut silence = Silence::new(mono());
        let mut buffer = [1.0; 16];
        assert_eq!(silence.read(&mut buffer), 16);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_processed_wraps_upstream() {
        let params = CompressorParams {
            threshold: 0.5,
            ratio: 1.0,
            makeup_gain: 2.0,
            ..Default::default()
        };
        let source = BufferSource::new(vec![0.1, 0.2], mono());
        let mut stream = source.through(Compressor::new(params));

        let mut buffer = [0.0; 4];
        assert_eq!(stream.read(&mut buffer), 2);
        assert!((buffer[0] - 0.2).abs() < 1e-6);
        assert!((buffer[1] - 0.4).abs() < 1e-6);
        assert!(!stream.has_failed());
    }
}
