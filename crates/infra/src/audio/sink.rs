//! CPAL output sink
//!
//! The master stream is shared with the device callback behind a mutex that
//! only the callback locks while the sink is open. The callback uses
//! `try_lock` and writes silence instead of waiting.

use super::cpal_backend::{device_name, CpalEnumerator};
use cpal::traits::{DeviceTrait, StreamTrait};
use minstrel_core::domain::audio::{AudioError, Result, StreamConfig};
use minstrel_core::domain::engine::OutputSink;
use minstrel_core::domain::mixer::MasterStream;
use minstrel_core::domain::stream::SampleStream;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Output sink playing the master stream on a CPAL device
pub struct CpalSink {
    enumerator: CpalEnumerator,
    config: StreamConfig,
    device_index: Option<usize>,
    master: Option<Arc<Mutex<MasterStream>>>,
    output: Option<cpal::Stream>,
    playing: bool,
}

impl CpalSink {
    /// Sink for the default output device
    pub fn new(config: StreamConfig) -> Self {
        Self {
            enumerator: CpalEnumerator::new(),
            config,
            device_index: None,
            master: None,
            output: None,
            playing: false,
        }
    }

    pub fn device_index(&self) -> Option<usize> {
        self.device_index
    }

    pub fn is_open(&self) -> bool {
        self.output.is_some()
    }

    /// Build the device stream for the selected device
    fn open(&mut self) -> Result<()> {
        let master = self
            .master
            .clone()
            .ok_or_else(|| AudioError::StreamError("Output sink is not initialized".to_string()))?;

        let device = self.enumerator.output_device(self.device_index)?;
        let format = self.config.format;

        let cpal_config = cpal::StreamConfig {
            channels: format.channels.count(),
            sample_rate: format.hz(),
            buffer_size: cpal::BufferSize::Fixed(self.config.buffer_size),
        };

        info!(
            "Opening output stream: device={}, format={}, buffer={}",
            device_name(&device),
            format,
            self.config.buffer_size
        );

        let stream = device
            .build_output_stream(
                &cpal_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match master.try_lock() {
                    Ok(mut master) => {
                        master.read(data);
                    }
                    Err(_) => data.fill(0.0),
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

        if self.playing {
            stream
                .play()
                .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;
        } else if let Err(e) = stream.pause() {
            // Some hosts cannot pause; the master stream outputs silence anyway
            debug!("Output stream cannot be paused: {}", e);
        }

        self.output = Some(stream);
        Ok(())
    }
}

impl OutputSink for CpalSink {
    fn initialize(&mut self, stream: MasterStream) -> Result<()> {
        if stream.format() != self.config.format {
            return Err(AudioError::UnsupportedConfiguration(format!(
                "master stream is {}, sink expects {}",
                stream.format(),
                self.config.format
            )));
        }

        self.master = Some(Arc::new(Mutex::new(stream)));
        self.output = None;
        self.open()
    }

    fn play(&mut self) -> Result<()> {
        self.playing = true;
        if self.output.is_none() {
            return self.open();
        }
        if let Some(output) = &self.output {
            output
                .play()
                .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.playing = false;
        if let Some(output) = &self.output {
            output
                .pause()
                .map_err(|e| AudioError::StreamError(format!("Failed to pause stream: {}", e)))?;
        }
        Ok(())
    }

    /// Release the device; the next `play` reopens it
    fn stop(&mut self) -> Result<()> {
        self.playing = false;
        if self.output.take().is_some() {
            debug!("Output stream closed");
        }
        Ok(())
    }

    fn select_device(&mut self, index: usize) -> Result<()> {
        // Fail before touching the current stream
        self.enumerator.output_device(Some(index))?;

        let previous = self.device_index.replace(index);
        self.output = None;
        if let Err(e) = self.open() {
            self.device_index = previous;
            return Err(e);
        }
        Ok(())
    }
}
