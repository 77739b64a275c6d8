//! Audio buffer abstractions and domain models
//!
//! This module defines the decoded-source representation consumed by the
//! engine. Decoding itself (containers, codecs, resampling) lives in the
//! `infra` crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for audio device or buffer
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The source uses a layout or rate the engine cannot play
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// The uploaded file could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Playback was requested before a source was loaded
    #[error("No source loaded")]
    NoSource,

    /// The audio thread is gone; the session cannot continue
    #[error("Audio engine unavailable")]
    EngineUnavailable,
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz16000,
    Hz24000,
    Hz44100,
    Hz48000,
    Hz96000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            16000 => SampleRate::Hz16000,
            24000 => SampleRate::Hz24000,
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            hz => SampleRate::Custom(hz),
        }
    }
}

/// Number of audio channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
    Surround(u16),
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
            ChannelCount::Surround(n) => *n,
        }
    }

    pub fn from_count(n: u16) -> Self {
        match n {
            1 => ChannelCount::Mono,
            2 => ChannelCount::Stereo,
            n => ChannelCount::Surround(n),
        }
    }
}

/// Decoded, planar multi-channel sample buffer
///
/// Samples are normalized to [-1.0, 1.0]. Every channel has the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer from planar channel data
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() {
            return Err(AudioError::InvalidConfiguration(
                "Audio buffer needs at least one channel".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(AudioError::InvalidConfiguration(
                "Sample rate must be non-zero".to_string(),
            ));
        }
        let frames = channels[0].len();
        if channels.iter().any(|c| c.len() != frames) {
            return Err(AudioError::InvalidConfiguration(
                "All channels must have the same length".to_string(),
            ));
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Create a mono buffer
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(vec![samples], sample_rate)
    }

    /// De-interleave `data` into a planar buffer
    pub fn from_interleaved(data: &[f32], channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(AudioError::InvalidConfiguration(
                "Channel count must be non-zero".to_string(),
            ));
        }
        let channels = channels as usize;
        let frames = data.len() / channels;
        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in data.chunks_exact(channels) {
            for (ch, sample) in frame.iter().enumerate() {
                planar[ch].push(*sample);
            }
        }
        Self::new(planar, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> ChannelCount {
        ChannelCount::from_count(self.channels.len() as u16)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel)
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Stereo view of a frame: mono sources feed both sides, extra channels are ignored
    #[inline]
    pub fn stereo_frame(&self, index: usize) -> (f32, f32) {
        let left = self.channels[0][index];
        let right = match self.channels.get(1) {
            Some(ch) => ch[index],
            None => left,
        };
        (left, right)
    }
}
