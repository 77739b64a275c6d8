//! Source file decoding
//!
//! WAV files are read with hound (8/16/24/32-bit integer or 32-bit float) and
//! converted to the engine rate with a rubato sinc resampler, so the render
//! engine only ever sees buffers at its own rate.

use forge_core::domain::audio::{AudioBuffer, AudioError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

const RESAMPLE_CHUNK: usize = 1024;

fn decode_error(e: impl std::fmt::Display) -> AudioError {
    AudioError::Decode(e.to_string())
}

/// Decode a WAV file and convert it to `target_rate`
pub fn decode_file<P: AsRef<Path>>(path: P, target_rate: u32) -> Result<AudioBuffer> {
    let path = path.as_ref();
    info!(path = %path.display(), target_rate, "Decoding source file");
    let file = std::fs::File::open(path).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Cannot open source file");
        decode_error(e)
    })?;
    decode_reader(std::io::BufReader::new(file), target_rate)
}

/// Decode WAV data from any reader and convert it to `target_rate`
pub fn decode_reader<R: Read>(reader: R, target_rate: u32) -> Result<AudioBuffer> {
    let mut reader = hound::WavReader::new(reader).map_err(decode_error)?;
    let spec = reader.spec();
    debug!(
        channels = spec.channels,
        sample_rate = spec.sample_rate,
        bits = spec.bits_per_sample,
        "WAV header read"
    );

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(decode_error)?,
        (hound::SampleFormat::Int, 8) => read_int::<_, i8>(&mut reader, 128.0)?,
        (hound::SampleFormat::Int, 16) => read_int::<_, i16>(&mut reader, 32_768.0)?,
        (hound::SampleFormat::Int, 24) => read_int::<_, i32>(&mut reader, 8_388_608.0)?,
        (hound::SampleFormat::Int, 32) => read_int::<_, i32>(&mut reader, 2_147_483_648.0)?,
        (format, bits) => {
            return Err(AudioError::Decode(format!(
                "unsupported WAV format: {format:?} {bits}-bit"
            )))
        }
    };

    let buffer = AudioBuffer::from_interleaved(&interleaved, spec.channels, spec.sample_rate)?;
    if buffer.is_empty() {
        return Err(AudioError::Decode("file contains no audio".to_string()));
    }
    resample(&buffer, target_rate)
}

fn read_int<R, S>(reader: &mut hound::WavReader<R>, full_scale: f32) -> Result<Vec<f32>>
where
    R: Read,
    S: hound::Sample + Into<i32>,
{
    reader
        .samples::<S>()
        .map(|s| s.map(|v| v.into() as f32 / full_scale))
        .collect::<std::result::Result<_, _>>()
        .map_err(decode_error)
}

/// Convert a buffer to `target_rate`; returns a copy when the rates match
///
/// The result has `round(len * target / source)` frames with the resampler
/// delay removed.
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    let source_rate = buffer.sample_rate();
    if source_rate == target_rate {
        return Ok(buffer.clone());
    }
    if target_rate == 0 {
        return Err(AudioError::InvalidConfiguration("target rate must be non-zero".to_string()));
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let expected = (buffer.len() as f64 * ratio).round() as usize;
    info!(source_rate, target_rate, frames = buffer.len(), "Resampling source");

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let channels = buffer.num_channels();
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, channels)
        .map_err(|e| AudioError::InvalidConfiguration(e.to_string()))?;

    let delay = resampler.output_delay();
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
    let planar = buffer.channels();
    let mut position = 0;

    while buffer.len() - position >= resampler.input_frames_next() {
        let end = position + resampler.input_frames_next();
        let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[position..end]).collect();
        let produced = resampler.process(&chunk, None).map_err(decode_error)?;
        append(&mut out, produced);
        position = end;
    }
    if position < buffer.len() {
        let tail: Vec<&[f32]> = planar.iter().map(|c| &c[position..]).collect();
        let produced = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(decode_error)?;
        append(&mut out, produced);
    }
    // Flush until the delayed tail is out
    while out.first().map_or(0, Vec::len) < expected + delay {
        let produced = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(decode_error)?;
        if produced.first().map_or(true, Vec::is_empty) {
            break;
        }
        append(&mut out, produced);
    }

    let channels = out
        .into_iter()
        .map(|mut c| {
            c.resize(delay + expected, 0.0);
            c.split_off(delay)
        })
        .collect();
    AudioBuffer::new(channels, target_rate)
}

fn append(out: &mut [Vec<f32>], chunk: Vec<Vec<f32>>) {
    for (dst, src) in out.iter_mut().zip(chunk) {
        dst.extend_from_slice(&src);
    }
}
