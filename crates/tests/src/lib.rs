//! Shared helpers for the Forge integration tests

use forge_core::domain::audio::AudioBuffer;
use forge_core::domain::config::EngineConfig;
use forge_core::domain::engine::MasteringEngine;
use forge_core::domain::params::EqBands;
use forge_core::domain::session::MasteringSession;

pub const RATE: u32 = 48000;

/// Engine settings for tests: fixed noise seed, given glide time
pub fn test_config(smoothing_ms: f32) -> EngineConfig {
    EngineConfig {
        sample_rate: RATE,
        block_size: 512,
        smoothing_time_constant_ms: smoothing_ms,
        noise_seed: Some(42),
        ..Default::default()
    }
}

/// Engine plus a session attached to it
pub fn rig(smoothing_ms: f32) -> (MasteringEngine, MasteringSession) {
    let config = test_config(smoothing_ms);
    let (engine, handle) =
        MasteringEngine::new(&config, &EqBands::default()).expect("engine config is valid");
    let session = MasteringSession::new(handle, &config).expect("engine is alive");
    (engine, session)
}

/// Generate a sine wave
pub fn sine(freq: f32, amplitude: f32, secs: f32) -> Vec<f32> {
    let frames = (secs * RATE as f32) as usize;
    (0..frames)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin())
        .collect()
}

pub fn mono_source(samples: Vec<f32>) -> AudioBuffer {
    AudioBuffer::mono(samples, RATE).expect("mono buffer")
}

/// Render `frames` stereo frames; returns (left, right)
pub fn render(engine: &mut MasteringEngine, frames: usize) -> (Vec<f32>, Vec<f32>) {
    let mut out = vec![0.0; frames * 2];
    engine.render(&mut out, 2);
    out.chunks_exact(2).map(|f| (f[0], f[1])).unzip()
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |p, s| p.max(s.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_helpers() {
        let tone = sine(1000.0, 0.5, 0.1);
        assert_eq!(tone.len(), 4800);
        assert!((rms(&tone) - 0.5 / 2f32.sqrt()).abs() < 1e-3);
        assert!((peak(&tone) - 0.5).abs() < 1e-3);
        assert_eq!(rms(&[]), 0.0);
    }
}
