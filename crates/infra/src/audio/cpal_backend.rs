//! CPAL-based device enumeration
//!
//! Device indices used across Minstrel are positions in the host's output
//! (or input) device listing, in the order CPAL reports them.

use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;
use tracing::{debug, info, warn};
use minstrel_core::domain::audio::{
    AudioEnumerator, AudioError, DeviceId, DeviceInfo, DeviceType, Result, SampleRate,
};

/// Display name of a CPAL device
pub(crate) fn device_name(device: &cpal::Device) -> String {
    #[allow(deprecated)]
    device
        .name()
        .unwrap_or_else(|_| "Unknown Device".to_string())
}

fn device_info(device: &cpal::Device, device_type: DeviceType) -> DeviceInfo {
    let name = device_name(device);

    let default_config = match device_type {
        DeviceType::Input => device.default_input_config(),
        DeviceType::Output | DeviceType::Duplex => device
            .default_output_config()
            .or_else(|_| device.default_input_config()),
    };
    let default_sample_rate = default_config
        .ok()
        .map(|config| SampleRate::from_hz(config.sample_rate()));

    DeviceInfo {
        id: DeviceId::new(name.clone()),
        name,
        device_type,
        default_sample_rate,
    }
}

/// CPAL-based audio enumerator
pub struct CpalEnumerator {
    host: cpal::Host,
}

impl Default for CpalEnumerator {
    fn default() -> Self {
        info!("Initializing CPAL enumerator");
        Self::new()
    }
}

impl CpalEnumerator {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());
        Self { host }
    }

    /// Output device at `index`, or the host default when `None`
    pub fn output_device(&self, index: Option<usize>) -> Result<cpal::Device> {
        match index {
            None => self
                .host
                .default_output_device()
                .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
            Some(index) => self
                .host
                .output_devices()
                .map_err(|e| AudioError::OsError(e.to_string()))?
                .nth(index)
                .ok_or_else(|| AudioError::DeviceNotFound(format!("No output device {index}"))),
        }
    }

    /// Input device at `index`, or the host default when `None`
    pub fn input_device(&self, index: Option<usize>) -> Result<cpal::Device> {
        match index {
            None => self
                .host
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string())),
            Some(index) => self
                .host
                .input_devices()
                .map_err(|e| AudioError::OsError(e.to_string()))?
                .nth(index)
                .ok_or_else(|| AudioError::DeviceNotFound(format!("No input device {index}"))),
        }
    }

    /// Convert CPAL device capabilities to our domain type
    fn determine_device_type(&self, device: &cpal::Device) -> Option<DeviceType> {
        let has_input = device
            .supported_input_configs()
            .map(|mut c| c.next().is_some())
            .unwrap_or(false);
        let has_output = device
            .supported_output_configs()
            .map(|mut c| c.next().is_some())
            .unwrap_or(false);

        match (has_input, has_output) {
            (true, true) => Some(DeviceType::Duplex),
            (true, false) => Some(DeviceType::Input),
            (false, true) => Some(DeviceType::Output),
            (false, false) => None,
        }
    }
}

impl fmt::Debug for CpalEnumerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpalEnumerator")
            .field("host", &self.host.id())
            .finish()
    }
}

impl AudioEnumerator for CpalEnumerator {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        info!("Enumerating all audio devices");

        let cpal_devices = self
            .host
            .devices()
            .map_err(|e| AudioError::OsError(e.to_string()))?;

        let mut devices = Vec::new();
        for device in cpal_devices {
            match self.determine_device_type(&device) {
                Some(device_type) => {
                    let info = device_info(&device, device_type);
                    debug!("Found device: {}", info.name);
                    devices.push(info);
                }
                None => warn!("Skipping device without inputs or outputs: {}", device_name(&device)),
            }
        }

        info!("Found {} audio devices", devices.len());
        Ok(devices)
    }

    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .host
            .input_devices()
            .map_err(|e| AudioError::OsError(e.to_string()))?
            .map(|d| device_info(&d, DeviceType::Input))
            .collect())
    }

    /// Output devices in index order
    fn output_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .host
            .output_devices()
            .map_err(|e| AudioError::OsError(e.to_string()))?
            .map(|d| device_info(&d, DeviceType::Output))
            .collect())
    }

    fn default_output_device(&self) -> Result<DeviceInfo> {
        self.output_device(None)
            .map(|d| device_info(&d, DeviceType::Output))
    }
}
