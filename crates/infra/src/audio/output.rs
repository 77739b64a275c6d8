//! cpal output stream
//!
//! Moves a [`MasteringEngine`] into the device callback. The callback only
//! calls [`MasteringEngine::render`]; all control goes through the engine's
//! command channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use forge_core::domain::audio::{AudioError, Result};
use forge_core::domain::engine::MasteringEngine;
use tracing::{debug, error, info};

/// A running output stream; dropping it stops playback
pub struct OutputStream {
    _stream: Stream,
    device_name: String,
    config: StreamConfig,
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("device", &self.device_name)
            .field("channels", &self.config.channels)
            .field("sample_rate", &self.config.sample_rate)
            .finish()
    }
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device) -> String {
    device.name().unwrap_or_else(|_| "Unknown Device".to_string())
}

/// Names of the host's output devices
pub fn output_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    Ok(devices.map(|d| device_name(&d)).collect())
}

fn find_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    debug!("Using audio host: {:?}", host.id());

    match name.filter(|n| !n.is_empty()) {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::StreamError(e.to_string()))?
            .find(|d| device_name(d) == name)
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string())),
    }
}

/// Pick a float configuration at `sample_rate`, preferring stereo
fn pick_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| AudioError::UnsupportedConfiguration(e.to_string()))?;

    ranges
        .filter(|r| r.sample_format() == SampleFormat::F32)
        .filter(|r| r.min_sample_rate() <= sample_rate && sample_rate <= r.max_sample_rate())
        .min_by_key(|r| r.channels().abs_diff(2))
        .map(|r| StreamConfig {
            channels: r.channels(),
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        })
        .ok_or_else(|| {
            AudioError::UnsupportedConfiguration(format!(
                "device has no 32-bit float output at {sample_rate} Hz"
            ))
        })
}

impl OutputStream {
    /// Open `device` (default when `None` or empty) and start rendering
    pub fn open(device: Option<&str>, mut engine: MasteringEngine) -> Result<Self> {
        let cpal_device = find_device(device)?;
        let device_name = device_name(&cpal_device);
        let config = pick_config(&cpal_device, engine.sample_rate())?;
        info!(
            device = %device_name,
            channels = config.channels,
            sample_rate = engine.sample_rate(),
            "Opening output stream"
        );

        let channels = config.channels as usize;
        let stream = cpal_device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    engine.render(data, channels);
                },
                |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioError::StreamError(format!("Failed to build stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(format!("Failed to start stream: {}", e)))?;

        Ok(Self {
            _stream: stream,
            device_name,
            config,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::domain::config::EngineConfig;
    use forge_core::domain::params::EqBands;

    #[test]
    fn test_unknown_device_not_found() {
        let (engine, _handle) = MasteringEngine::new(&EngineConfig::default(), &EqBands::default()).unwrap();
        match OutputStream::open(Some("no such device 1a2b3c"), engine) {
            Err(AudioError::DeviceNotFound(name)) => assert_eq!(name, "no such device 1a2b3c"),
            // Headless CI may not even enumerate devices
            Err(AudioError::StreamError(e)) => eprintln!("Skipping test: {}", e),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_default_output_stream() {
        let (engine, _handle) = MasteringEngine::new(&EngineConfig::default(), &EqBands::default()).unwrap();
        match OutputStream::open(None, engine) {
            Ok(stream) => {
                assert!(stream.channels() >= 1);
                assert!(!stream.device_name().is_empty());
            }
            Err(e) => eprintln!("Skipping test: {}", e),
        }
    }
}
