//! Canonical 16-bit PCM WAV container
//!
//! The encoder writes the 44-byte canonical header followed by interleaved
//! little-endian samples. Stereo (or wider) buffers are written as two
//! interleaved channels; mono buffers write channel 0.

use crate::domain::audio::AudioBuffer;

pub const HEADER_LEN: usize = 44;
const BITS_PER_SAMPLE: u16 = 16;
const FORMAT_PCM: u16 = 1;

/// Quantize a float sample to i16: clamp, then scale negatives by 32768 and
/// positives by 32767
#[inline]
pub fn quantize_sample(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Inverse of the 16-bit quantization
#[inline]
pub fn dequantize_sample(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode a buffer as a canonical 16-bit PCM WAV file
pub fn encode_wav(buffer: &AudioBuffer) -> Vec<u8> {
    let channels: u16 = if buffer.num_channels() >= 2 { 2 } else { 1 };
    let sample_rate = buffer.sample_rate();
    let frames = buffer.len();
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let data_len = (frames * block_align as usize) as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    let planar = buffer.channels();
    for frame in 0..frames {
        for channel in planar.iter().take(channels as usize) {
            out.extend_from_slice(&quantize_sample(channel[frame]).to_le_bytes());
        }
    }
    out
}
