//! Platform-specific audio backend implementations using CPAL
//!
//! This module provides cross-platform audio support through CPAL, which abstracts
//! platform-specific APIs:
//! - Windows: WASAPI
//! - Linux: ALSA/PulseAudio
//! - macOS: CoreAudio

pub mod capture;
pub mod cpal_backend;
pub mod resample;
pub mod sink;

pub use capture::{CaptureSource, LiveCapture};
pub use cpal_backend::CpalEnumerator;
pub use resample::ResampleStream;
pub use sink::CpalSink;
