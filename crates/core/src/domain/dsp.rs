//! Digital Signal Processing stages for the mastering chain
//!
//! This module provides the building blocks the signal chain is made of:
//! - Biquad filters (high/low-pass, shelves, peaking) with smoothed cutoff and gain
//! - Smoothed gain stages
//! - Table-driven waveshaper
//! - Feed-forward compressor (also used as the output limiter)
//!
//! All stages are designed for:
//! - Zero allocations in the hot path
//! - Glide-only parameter changes (no clicks while playing)
//! - Planar stereo processing on f32 buffers normalized to [-1.0, 1.0]

use crate::domain::smoothing::SmoothedParam;
use std::f32::consts::{FRAC_1_SQRT_2, PI};
use std::sync::Arc;
use tracing::trace;

/// Core trait for all stages of the chain
///
/// Stages process planar stereo blocks in place.
pub trait Processor: Send {
    /// Process a block of stereo samples in-place
    ///
    /// # Requirements
    /// - No allocations in the hot path
    /// - `left` and `right` have the same length
    fn process(&mut self, left: &mut [f32], right: &mut [f32]);

    /// Clear internal state (filter memories, envelopes)
    fn reset(&mut self);

    /// Stage name for debugging/display
    fn name(&self) -> &str;
}

/// Parameter constraints for DSP stages
pub mod params {
    /// Decibel floor used when converting silence to dB
    pub const DB_MIN: f32 = -100.0;

    /// Widest gain a biquad will be asked for (denoise shelf reaches -36 dB)
    pub const FILTER_GAIN_LIMIT_DB: f32 = 40.0;

    /// Compressor ratio range (1:1 to 20:1)
    pub const RATIO_MIN: f32 = 1.0;
    pub const RATIO_MAX: f32 = 20.0;

    /// Compressor threshold range (dB)
    pub const THRESHOLD_MIN: f32 = -100.0;
    pub const THRESHOLD_MAX: f32 = 0.0;

    /// Attack/Release time ranges in seconds
    pub const ATTACK_MIN: f32 = 0.0001;
    pub const ATTACK_MAX: f32 = 1.0;
    pub const RELEASE_MIN: f32 = 0.01;
    pub const RELEASE_MAX: f32 = 1.0;

    /// Samples between coefficient recomputations while a filter glides
    pub const CONTROL_INTERVAL: usize = 32;
}

/// Convert decibels to a linear factor
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear level to decibels with an epsilon floor
#[inline]
pub fn gain_to_db(level: f32, epsilon: f32) -> f32 {
    20.0 * (level.abs() + epsilon).log10()
}

// ============================================================================
// BIQUAD FILTER
// ============================================================================

/// Biquad filter coefficients
///
/// Direct Form I implementation for numerical stability.
/// Coefficients are pre-computed to avoid per-sample calculations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    /// Numerator coefficients
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    /// Denominator coefficients (a0 is normalized to 1.0)
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        // Unity gain (no filtering)
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

/// Shared intermediate terms of the RBJ cookbook formulas
struct Prewarp {
    cos_w0: f32,
    alpha: f32,
}

impl Prewarp {
    fn new(sample_rate: f32, freq: f32, q: f32) -> Self {
        // Keep the corner strictly inside (0, Nyquist) so the filter stays stable
        let freq = freq.clamp(1.0, sample_rate * 0.49);
        let w0 = 2.0 * PI * freq / sample_rate;
        Self {
            cos_w0: w0.cos(),
            alpha: w0.sin() / (2.0 * q.max(0.01)),
        }
    }
}

impl BiquadCoeffs {
    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Second-order low-pass
    #[must_use]
    pub fn lowpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let Prewarp { cos_w0, alpha } = Prewarp::new(sample_rate, freq, q);
        let b1 = 1.0 - cos_w0;
        Self::normalized(b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    /// Second-order high-pass
    #[must_use]
    pub fn highpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let Prewarp { cos_w0, alpha } = Prewarp::new(sample_rate, freq, q);
        let b0 = (1.0 + cos_w0) / 2.0;
        Self::normalized(b0, -(1.0 + cos_w0), b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    /// Calculate coefficients for a low shelf filter
    ///
    /// Boosts or cuts frequencies below the corner frequency.
    #[must_use]
    pub fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let gain_db = gain_db.clamp(-params::FILTER_GAIN_LIMIT_DB, params::FILTER_GAIN_LIMIT_DB);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let Prewarp { cos_w0, alpha } = Prewarp::new(sample_rate, freq, q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
            a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
            (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// Calculate coefficients for a high shelf filter
    ///
    /// Boosts or cuts frequencies above the corner frequency.
    #[must_use]
    pub fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let gain_db = gain_db.clamp(-params::FILTER_GAIN_LIMIT_DB, params::FILTER_GAIN_LIMIT_DB);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let Prewarp { cos_w0, alpha } = Prewarp::new(sample_rate, freq, q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
            a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
            (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// Calculate coefficients for a peaking EQ filter
    ///
    /// Boosts or cuts frequencies around a center frequency.
    #[must_use]
    pub fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let gain_db = gain_db.clamp(-params::FILTER_GAIN_LIMIT_DB, params::FILTER_GAIN_LIMIT_DB);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let Prewarp { cos_w0, alpha } = Prewarp::new(sample_rate, freq, q);

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        )
    }

    /// Magnitude response at `freq`, used by tests and diagnostics
    pub fn magnitude_at(&self, sample_rate: f32, freq: f32) -> f32 {
        use num_complex::Complex32;
        let w = 2.0 * PI * freq / sample_rate;
        let z1 = Complex32::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = Complex32::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex32::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;
        (num / den).norm()
    }
}

/// Stateful biquad filter using Direct Form I
///
/// Direct Form I is chosen over Transposed Direct Form II for:
/// - Better numerical stability with low-frequency filters
/// - Easier coefficient updates without artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct BiquadFilter {
    coeffs: BiquadCoeffs,
    // Previous input samples (x[n-1], x[n-2])
    x1: f32,
    x2: f32,
    // Previous output samples (y[n-1], y[n-2])
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Create a bypass filter (unity gain)
    pub fn bypass() -> Self {
        Self::new(BiquadCoeffs::default())
    }

    /// Update filter coefficients
    ///
    /// Can be called in real-time for parameter changes.
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    pub fn coeffs(&self) -> BiquadCoeffs {
        self.coeffs
    }

    /// Process a single sample
    #[inline]
    pub fn process_sample(&mut self, x: f32) -> f32 {
        // Direct Form I: y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2]
        //                        - a1*y[n-1] - a2*y[n-2]
        let y = self.coeffs.b0 * x + self.coeffs.b1 * self.x1 + self.coeffs.b2 * self.x2
            - self.coeffs.a1 * self.y1
            - self.coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        // Flush denormals in long silent tails
        self.y1 = if y.abs() < 1e-20 { 0.0 } else { y };

        self.y1
    }

    pub fn process(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

// ============================================================================
// SMOOTHED FILTER STAGE
// ============================================================================

/// Response type of a filter stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowPass,
    HighPass,
    LowShelf,
    HighShelf,
    Peaking,
}

impl FilterKind {
    fn coeffs(self, sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> BiquadCoeffs {
        match self {
            FilterKind::LowPass => BiquadCoeffs::lowpass(sample_rate, freq, q),
            FilterKind::HighPass => BiquadCoeffs::highpass(sample_rate, freq, q),
            FilterKind::LowShelf => BiquadCoeffs::low_shelf(sample_rate, freq, gain_db, q),
            FilterKind::HighShelf => BiquadCoeffs::high_shelf(sample_rate, freq, gain_db, q),
            FilterKind::Peaking => BiquadCoeffs::peaking(sample_rate, freq, gain_db, q),
        }
    }
}

/// Stereo biquad whose cutoff and gain glide toward their targets
///
/// Coefficients are recomputed at control rate (every
/// [`params::CONTROL_INTERVAL`] samples) while either parameter is moving.
#[derive(Debug, Clone)]
pub struct FilterStage {
    name: &'static str,
    kind: FilterKind,
    sample_rate: f32,
    q: f32,
    frequency: SmoothedParam,
    gain_db: SmoothedParam,
    left: BiquadFilter,
    right: BiquadFilter,
}

impl FilterStage {
    pub fn new(
        name: &'static str,
        kind: FilterKind,
        sample_rate: f32,
        frequency: f32,
        q: Option<f32>,
        time_constant_secs: f32,
    ) -> Self {
        let nyquist = sample_rate * 0.5;
        let frequency = SmoothedParam::new(frequency, 1.0, nyquist, sample_rate, time_constant_secs);
        let gain_db = SmoothedParam::new(
            0.0,
            -params::FILTER_GAIN_LIMIT_DB,
            params::FILTER_GAIN_LIMIT_DB,
            sample_rate,
            time_constant_secs,
        );
        let mut stage = Self {
            name,
            kind,
            sample_rate,
            // Shelves use the S=1 slope, i.e. Q = 1/sqrt(2)
            q: q.unwrap_or(FRAC_1_SQRT_2),
            frequency,
            gain_db,
            left: BiquadFilter::bypass(),
            right: BiquadFilter::bypass(),
        };
        stage.update_coefficients();
        stage
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn set_frequency_target(&mut self, hz: f32) {
        self.frequency.set_target(hz);
    }

    pub fn set_gain_target(&mut self, gain_db: f32) {
        self.gain_db.set_target(gain_db);
    }

    /// Target values (what the stage is gliding toward)
    pub fn frequency_target(&self) -> f32 {
        self.frequency.target()
    }

    pub fn gain_target(&self) -> f32 {
        self.gain_db.target()
    }

    /// Instantaneous (smoothed) values
    pub fn frequency(&self) -> f32 {
        self.frequency.get()
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db.get()
    }

    pub fn is_settled(&self) -> bool {
        self.frequency.is_settled() && self.gain_db.is_settled()
    }

    /// Coefficients currently in use
    pub fn coeffs(&self) -> BiquadCoeffs {
        self.left.coeffs()
    }

    /// Advance the glide by up to one control period; returns the span to render
    fn next_span(&mut self, remaining: usize) -> usize {
        if self.is_settled() {
            return remaining;
        }
        let span = params::CONTROL_INTERVAL.min(remaining);
        self.frequency.advance(span);
        self.gain_db.advance(span);
        self.update_coefficients();
        span
    }

    /// Filter a mono buffer through the left channel's state
    pub fn process_mono(&mut self, buffer: &mut [f32]) {
        let mut offset = 0;
        while offset < buffer.len() {
            let span = self.next_span(buffer.len() - offset);
            self.left.process(&mut buffer[offset..offset + span]);
            offset += span;
        }
    }

    fn update_coefficients(&mut self) {
        let coeffs = self.kind.coeffs(
            self.sample_rate,
            self.frequency.get(),
            self.gain_db.get(),
            self.q,
        );
        self.left.set_coeffs(coeffs);
        self.right.set_coeffs(coeffs);
    }
}

impl Processor for FilterStage {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let mut offset = 0;
        let len = left.len().min(right.len());

        while offset < len {
            // Gliding parameters advance one control period at a time
            let span = self.next_span(len - offset);
            for i in offset..offset + span {
                left[i] = self.left.process_sample(left[i]);
                right[i] = self.right.process_sample(right[i]);
            }
            offset += span;
        }
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    fn name(&self) -> &str {
        self.name
    }
}

// ============================================================================
// GAIN STAGE
// ============================================================================

/// Smoothed scalar multiplier
#[derive(Debug, Clone)]
pub struct GainStage {
    name: &'static str,
    gain: SmoothedParam,
}

impl GainStage {
    pub fn new(name: &'static str, initial: f32, max: f32, sample_rate: f32, time_constant_secs: f32) -> Self {
        Self {
            name,
            gain: SmoothedParam::new(initial, 0.0, max, sample_rate, time_constant_secs),
        }
    }

    pub fn set_target(&mut self, gain: f32) {
        self.gain.set_target(gain);
    }

    pub fn target(&self) -> f32 {
        self.gain.target()
    }

    pub fn get(&self) -> f32 {
        self.gain.get()
    }

    /// Advance one frame and return the gain to apply
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        self.gain.tick()
    }

    /// Write the per-frame gain curve for the next `out.len()` frames
    pub fn fill(&mut self, out: &mut [f32]) {
        if self.gain.is_settled() {
            out.fill(self.gain.get());
        } else {
            for g in out.iter_mut() {
                *g = self.gain.tick();
            }
        }
    }

    pub fn process_mono(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample *= self.gain.tick();
        }
    }
}

impl Processor for GainStage {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.gain.is_settled() {
            let g = self.gain.get();
            if g != 1.0 {
                left.iter_mut().for_each(|s| *s *= g);
                right.iter_mut().for_each(|s| *s *= g);
            }
            return;
        }
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let g = self.gain.tick();
            *l *= g;
            *r *= g;
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &str {
        self.name
    }
}

// ============================================================================
// WAVESHAPER
// ============================================================================

/// Table-driven nonlinear transfer function
///
/// The curve maps x in [-1, 1] linearly onto the table index range and
/// interpolates between neighbouring entries. Inputs outside [-1, 1] read the
/// end points.
#[derive(Debug, Clone)]
pub struct Waveshaper {
    curve: Arc<[f32]>,
}

impl Waveshaper {
    /// Three-point linear pass-through
    pub fn identity_curve() -> Arc<[f32]> {
        Arc::from(vec![-1.0, 0.0, 1.0])
    }

    pub fn new() -> Self {
        Self {
            curve: Self::identity_curve(),
        }
    }

    /// Swap in a new transfer curve (must hold at least two points)
    pub fn set_curve(&mut self, curve: Arc<[f32]>) {
        if curve.len() >= 2 {
            trace!(points = curve.len(), "Waveshaper curve replaced");
            self.curve = curve;
        }
    }

    pub fn curve(&self) -> &Arc<[f32]> {
        &self.curve
    }

    #[inline]
    pub fn shape(&self, x: f32) -> f32 {
        let last = self.curve.len() - 1;
        let pos = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * last as f32;
        let index = (pos as usize).min(last - 1);
        let frac = pos - index as f32;
        let a = self.curve[index];
        let b = self.curve[index + 1];
        a + (b - a) * frac
    }
}

impl Default for Waveshaper {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Waveshaper {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            *l = self.shape(*l);
            *r = self.shape(*r);
        }
    }

    fn reset(&mut self) {}

    fn name(&self) -> &str {
        "Saturator"
    }
}

// ============================================================================
// DYNAMIC RANGE COMPRESSOR
// ============================================================================

/// Feed-forward, stereo-linked compressor
///
/// Reduces the dynamic range of audio signals by attenuating signals above a
/// threshold, with a soft knee around it. Threshold and ratio glide like every
/// other parameter; attack and release are fixed at construction.
#[derive(Debug, Clone)]
pub struct Compressor {
    name: &'static str,
    threshold_db: SmoothedParam,
    ratio: SmoothedParam,
    knee_db: f32,
    attack_sec: f32,
    release_sec: f32,
    // Coefficients (pre-computed for performance)
    attack_coeff: f32,
    release_coeff: f32,
    // Linked envelope follower state
    envelope: f32,
    /// Hard output ceiling (linear), applied after gain reduction
    ceiling: Option<f32>,
}

impl Compressor {
    pub fn new(
        name: &'static str,
        sample_rate: f32,
        threshold_db: f32,
        ratio: f32,
        attack_sec: f32,
        release_sec: f32,
        time_constant_secs: f32,
    ) -> Self {
        let attack_sec = attack_sec.clamp(params::ATTACK_MIN, params::ATTACK_MAX);
        let release_sec = release_sec.clamp(params::RELEASE_MIN, params::RELEASE_MAX);
        Self {
            name,
            threshold_db: SmoothedParam::new(
                threshold_db,
                params::THRESHOLD_MIN,
                params::THRESHOLD_MAX,
                sample_rate,
                time_constant_secs,
            ),
            ratio: SmoothedParam::new(
                ratio,
                params::RATIO_MIN,
                params::RATIO_MAX,
                sample_rate,
                time_constant_secs,
            ),
            knee_db: 0.0,
            attack_sec,
            release_sec,
            // Using exp(-1/(time * sample_rate)) for smooth envelope following
            attack_coeff: (-1.0 / (attack_sec * sample_rate)).exp(),
            release_coeff: (-1.0 / (release_sec * sample_rate)).exp(),
            envelope: 0.0,
            ceiling: None,
        }
    }

    /// Soft-knee width in dB (0 = hard knee)
    #[must_use]
    pub fn with_knee(mut self, knee_db: f32) -> Self {
        self.knee_db = knee_db.max(0.0);
        self
    }

    /// Clamp the output to +/-`ceiling` after gain reduction
    #[must_use]
    pub fn with_ceiling(mut self, ceiling: f32) -> Self {
        self.ceiling = Some(ceiling.abs());
        self
    }

    pub fn set_threshold_target(&mut self, threshold_db: f32) {
        self.threshold_db.set_target(threshold_db);
    }

    pub fn set_ratio_target(&mut self, ratio: f32) {
        self.ratio.set_target(ratio);
    }

    pub fn threshold_target(&self) -> f32 {
        self.threshold_db.target()
    }

    pub fn ratio_target(&self) -> f32 {
        self.ratio.target()
    }

    pub fn attack(&self) -> f32 {
        self.attack_sec
    }

    pub fn release(&self) -> f32 {
        self.release_sec
    }

    /// Static gain curve: gain change in dB for a detector level in dB
    #[inline]
    fn gain_change_db(&self, level_db: f32, threshold_db: f32, ratio: f32) -> f32 {
        let over = level_db - threshold_db;
        let slope = 1.0 / ratio - 1.0;
        let knee = self.knee_db;

        if 2.0 * over < -knee {
            0.0
        } else if knee > 0.0 && 2.0 * over.abs() <= knee {
            slope * (over + knee / 2.0).powi(2) / (2.0 * knee)
        } else {
            slope * over
        }
    }

    #[inline]
    fn update_envelope(&mut self, level: f32) {
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = coeff * self.envelope + (1.0 - coeff) * level;
    }
}

impl Processor for Compressor {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let threshold = self.threshold_db.tick();
            let ratio = self.ratio.tick();

            self.update_envelope(l.abs().max(r.abs()));

            let gain = if ratio > params::RATIO_MIN {
                let level_db = gain_to_db(self.envelope, 1e-9);
                db_to_gain(self.gain_change_db(level_db, threshold, ratio))
            } else {
                1.0
            };

            *l *= gain;
            *r *= gain;

            if let Some(ceiling) = self.ceiling {
                *l = l.clamp(-ceiling, ceiling);
                *r = r.clamp(-ceiling, ceiling);
            }
        }
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }

    fn name(&self) -> &str {
        self.name
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48000.0;

    fn generate_test_signal(samples: usize, frequency: f32) -> Vec<f32> {
        (0..samples)
            .map(|i| (2.0 * PI * frequency * i as f32 / SAMPLE_RATE).sin())
            .collect()
    }

    fn peak(buffer: &[f32]) -> f32 {
        buffer.iter().map(|s| s.abs()).fold(0.0_f32, f32::max)
    }

    // -------------------------------------------------------------------------
    // Biquad Filter Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_biquad_unity() {
        let mut filter = BiquadFilter::new(BiquadCoeffs::default());

        let input = vec![0.5, 0.3, 0.7];
        let mut output = input.clone();
        filter.process(&mut output);

        assert_eq!(input, output);
    }

    #[test]
    fn test_biquad_reset() {
        let mut filter = BiquadFilter::new(BiquadCoeffs::low_shelf(SAMPLE_RATE, 200.0, 6.0, 0.707));

        let mut buffer = vec![0.5; 100];
        filter.process(&mut buffer);

        filter.reset();
        let mut silence = vec![0.0; 10];
        filter.process(&mut silence);

        assert!(silence.iter().all(|&s| s.abs() < 0.01));
    }

    #[test]
    fn test_lowpass_response() {
        let c = BiquadCoeffs::lowpass(SAMPLE_RATE, 1000.0, FRAC_1_SQRT_2);
        assert!((c.magnitude_at(SAMPLE_RATE, 50.0) - 1.0).abs() < 0.01);
        // -3 dB at the corner
        assert!((c.magnitude_at(SAMPLE_RATE, 1000.0) - FRAC_1_SQRT_2).abs() < 0.01);
        assert!(c.magnitude_at(SAMPLE_RATE, 10000.0) < 0.02);
    }

    #[test]
    fn test_highpass_response() {
        let c = BiquadCoeffs::highpass(SAMPLE_RATE, 200.0, FRAC_1_SQRT_2);
        assert!(c.magnitude_at(SAMPLE_RATE, 20.0) < 0.02);
        assert!((c.magnitude_at(SAMPLE_RATE, 5000.0) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_high_shelf_cut() {
        let c = BiquadCoeffs::high_shelf(SAMPLE_RATE, 5000.0, -36.0, FRAC_1_SQRT_2);
        let hf = c.magnitude_at(SAMPLE_RATE, 20000.0);
        assert!((gain_to_db(hf, 0.0) + 36.0).abs() < 2.0);
        assert!((c.magnitude_at(SAMPLE_RATE, 100.0) - 1.0).abs() < 0.02);
    }

    #[test]
    fn test_zero_gain_shapes_are_flat() {
        for c in [
            BiquadCoeffs::peaking(SAMPLE_RATE, 1000.0, 0.0, 1.0),
            BiquadCoeffs::low_shelf(SAMPLE_RATE, 32.0, 0.0, FRAC_1_SQRT_2),
            BiquadCoeffs::high_shelf(SAMPLE_RATE, 20000.0, 0.0, FRAC_1_SQRT_2),
        ] {
            for f in [30.0, 1000.0, 15000.0] {
                assert!((c.magnitude_at(SAMPLE_RATE, f) - 1.0).abs() < 1e-3);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Filter Stage Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_filter_stage_glides() {
        let mut stage = FilterStage::new("Bass", FilterKind::Peaking, SAMPLE_RATE, 60.0, Some(0.7), 0.05);
        stage.set_gain_target(12.0);
        assert_eq!(stage.gain_target(), 12.0);
        assert_eq!(stage.gain_db(), 0.0);

        let mut l = vec![0.0; 480];
        let mut r = vec![0.0; 480];
        stage.process(&mut l, &mut r);

        // 10 ms into a 50 ms glide
        assert!(stage.gain_db() > 0.0 && stage.gain_db() < 12.0);

        let mut l = vec![0.0; 48000];
        let mut r = vec![0.0; 48000];
        stage.process(&mut l, &mut r);
        assert!(stage.is_settled());
        assert_eq!(stage.gain_db(), 12.0);
    }

    #[test]
    fn test_filter_stage_boosts_band() {
        let mut stage = FilterStage::new("Bass", FilterKind::Peaking, SAMPLE_RATE, 60.0, Some(0.7), 0.0);
        stage.set_gain_target(12.0);

        let mut l = generate_test_signal(48000, 60.0);
        let mut r = l.clone();
        stage.process(&mut l, &mut r);

        let tail = &l[24000..];
        assert!(peak(tail) > 3.5);
    }

    // -------------------------------------------------------------------------
    // Gain / Waveshaper Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_gain_stage_settled_passthrough() {
        let mut gain = GainStage::new("Input", 1.0, 1.0, SAMPLE_RATE, 0.05);
        let mut l = vec![0.5, -0.25];
        let mut r = vec![0.1, 0.2];
        gain.process(&mut l, &mut r);
        assert_eq!(l, vec![0.5, -0.25]);
        assert_eq!(r, vec![0.1, 0.2]);
    }

    #[test]
    fn test_waveshaper_identity() {
        let shaper = Waveshaper::new();
        for x in [-1.0, -0.5, 0.0, 0.3, 1.0] {
            assert!((shaper.shape(x) - x).abs() < 1e-6);
        }
        assert_eq!(shaper.shape(2.0), 1.0);
        assert_eq!(shaper.shape(-2.0), -1.0);
    }

    #[test]
    fn test_waveshaper_interpolates_table() {
        let mut shaper = Waveshaper::new();
        shaper.set_curve(Arc::from(vec![0.0, 1.0, 0.0]));
        assert!((shaper.shape(-0.5) - 0.5).abs() < 1e-6);
        assert!((shaper.shape(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_waveshaper_rejects_degenerate_curve() {
        let mut shaper = Waveshaper::new();
        shaper.set_curve(Arc::from(vec![0.0]));
        assert_eq!(shaper.curve().len(), 3);
    }

    // -------------------------------------------------------------------------
    // Compressor Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_compressor_neutral_at_unity_ratio() {
        let mut comp = Compressor::new("Compressor", SAMPLE_RATE, 0.0, 1.0, 0.003, 0.25, 0.05);
        let mut l = vec![0.9; 1024];
        let mut r = vec![-0.9; 1024];
        comp.process(&mut l, &mut r);
        assert!(l.iter().all(|&s| s == 0.9));
        assert!(r.iter().all(|&s| s == -0.9));
    }

    #[test]
    fn test_compressor_reduction() {
        let mut comp = Compressor::new("Compressor", SAMPLE_RATE, -20.0, 4.0, 0.001, 0.1, 0.0);

        let mut l = vec![0.8; 4800];
        let mut r = vec![0.8; 4800];
        comp.process(&mut l, &mut r);

        // -1.9 dBFS over a -20 dB threshold at 4:1 settles near -15.5 dBFS
        let settled = l[4799];
        assert!(settled < 0.25, "got {settled}");
        assert!(settled > 0.1);
    }

    #[test]
    fn test_compressor_param_limits() {
        let mut comp = Compressor::new("Compressor", SAMPLE_RATE, -18.0, 4.0, 0.003, 0.25, 0.05);
        comp.set_threshold_target(-500.0);
        assert_eq!(comp.threshold_target(), params::THRESHOLD_MIN);
        comp.set_ratio_target(50.0);
        assert_eq!(comp.ratio_target(), params::RATIO_MAX);
        comp.set_ratio_target(0.5);
        assert_eq!(comp.ratio_target(), params::RATIO_MIN);
    }

    #[test]
    fn test_limiter_ceiling() {
        let mut limiter = Compressor::new("Limiter", SAMPLE_RATE, -0.1, 20.0, 0.003, 0.25, 0.05)
            .with_ceiling(1.0);
        let mut l = vec![4.0; 256];
        let mut r = vec![-4.0; 256];
        limiter.process(&mut l, &mut r);
        assert!(l.iter().chain(r.iter()).all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_compressor_reset() {
        let mut comp = Compressor::new("Compressor", SAMPLE_RATE, -10.0, 4.0, 0.003, 0.25, 0.0);
        let mut l = vec![0.8; 1000];
        let mut r = vec![0.8; 1000];
        comp.process(&mut l, &mut r);

        comp.reset();

        let mut l = vec![0.01; 10];
        let mut r = vec![0.01; 10];
        comp.process(&mut l, &mut r);
        assert!((l[0] - 0.01).abs() < 1e-6);
    }
}
