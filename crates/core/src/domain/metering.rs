//! Metering and analysis tap
//!
//! Two consumers read levels:
//! - The AI analysis summary, computed on demand from the loaded source with
//!   a decimated pass ([`analyze_levels`])
//! - The live display, computed from the engine's post-limiter window
//!   ([`MeterReading`], [`SpectrumAnalyzer`])

use crate::domain::audio::AudioBuffer;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Upper bound on samples visited by the decimated level pass
pub const LEVEL_SCAN_BUDGET: usize = 50_000;
/// Added before the logarithm so silence never produces -inf
pub const LEVEL_EPSILON: f32 = 0.00001;

/// Display range for spectrum bytes
pub const SPECTRUM_MIN_DB: f32 = -100.0;
pub const SPECTRUM_MAX_DB: f32 = -30.0;
/// Frame-to-frame averaging of spectrum magnitudes
pub const SPECTRUM_SMOOTHING: f32 = 0.8;

/// RMS and peak of a source, in dB
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSummary {
    pub rms_db: f32,
    pub peak_db: f32,
}

impl LevelSummary {
    /// Two-decimal strings as sent to the suggestion service
    pub fn formatted(&self) -> (String, String) {
        (format!("{:.2}", self.rms_db), format!("{:.2}", self.peak_db))
    }
}

/// Approximate RMS/peak of channel 0, visiting at most ~50k samples
///
/// Long sources are decimated with a fixed stride, so the RMS is an estimate
/// rather than an exact whole-signal value.
pub fn analyze_levels(buffer: &AudioBuffer) -> LevelSummary {
    let data = buffer.channel(0).unwrap_or(&[]);
    let stride = (data.len() / LEVEL_SCAN_BUDGET).max(1);

    let (sum, peak, count) = data
        .iter()
        .step_by(stride)
        .fold((0.0_f64, 0.0_f32, 0usize), |(sum, peak, count), &s| {
            (sum + (s as f64) * (s as f64), peak.max(s.abs()), count + 1)
        });

    let rms = if count > 0 { (sum / count as f64).sqrt() as f32 } else { 0.0 };

    LevelSummary {
        rms_db: 20.0 * (rms + LEVEL_EPSILON).log10(),
        peak_db: 20.0 * (peak + LEVEL_EPSILON).log10(),
    }
}

/// Level reading from the post-chain time window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    /// RMS in dB, never below the configured floor
    pub rms_db: f32,
    /// Linear peak of the window
    pub peak: f32,
}

impl MeterReading {
    pub fn from_window(window: &[f32], floor_db: f32) -> Self {
        if window.is_empty() {
            return Self { rms_db: floor_db, peak: 0.0 };
        }
        let sum: f32 = window.iter().map(|s| s * s).sum();
        let rms = (sum / window.len() as f32).sqrt();
        let peak = window.iter().fold(0.0_f32, |p, s| p.max(s.abs()));
        let rms_db = if rms > 0.0 { (20.0 * rms.log10()).max(floor_db) } else { floor_db };
        Self { rms_db, peak }
    }

    /// True when the output carries no signal worth redrawing
    pub fn is_silent(&self) -> bool {
        self.peak == 0.0
    }
}

/// Windowed FFT magnitudes of the post-chain signal
pub struct SpectrumAnalyzer {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    decibels: Vec<f32>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft_size", &self.fft_size)
            .finish()
    }
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Blackman window
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Self {
            fft_size,
            fft,
            window,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
            decibels: vec![SPECTRUM_MIN_DB; fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Center frequency of a bin
    pub fn bin_frequency(&self, bin: usize, sample_rate: f32) -> f32 {
        bin as f32 * sample_rate / self.fft_size as f32
    }

    /// Analyze the most recent `fft_size` samples; returns dB per bin
    ///
    /// Shorter input is zero-padded at the front.
    pub fn analyze(&mut self, samples: &[f32]) -> &[f32] {
        let take = samples.len().min(self.fft_size);
        let pad = self.fft_size - take;
        let recent = &samples[samples.len() - take..];

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { recent[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let norm = 1.0 / self.fft_size as f32;
        for ((bin, smoothed), db) in self
            .scratch
            .iter()
            .zip(self.smoothed.iter_mut())
            .zip(self.decibels.iter_mut())
        {
            let magnitude = bin.norm() * norm;
            *smoothed = SPECTRUM_SMOOTHING * *smoothed + (1.0 - SPECTRUM_SMOOTHING) * magnitude;
            *db = 20.0 * (*smoothed + 1e-10).log10();
        }

        &self.decibels
    }

    /// Last spectrum mapped onto 0-255 over the display range
    pub fn bytes(&self) -> Vec<u8> {
        self.decibels.iter().map(|&db| db_to_byte(db)).collect()
    }
}

/// Map a dB value onto the byte display range
pub fn db_to_byte(db: f32) -> u8 {
    let scaled = 255.0 * (db - SPECTRUM_MIN_DB) / (SPECTRUM_MAX_DB - SPECTRUM_MIN_DB);
    scaled.clamp(0.0, 255.0) as u8
}
