//! Parameter synchronizer
//!
//! Maps the declarative [`ParameterSet`] onto [`StageTargets`]. Every knob is
//! clamped before any value is derived from it, and bypass forces each
//! coloring stage (noise textures included) to its neutral value while leaving
//! the cutoff filters, the master gain and the limiter alone.

use crate::domain::chain::StageTargets;
use crate::domain::dsp::Waveshaper;
use crate::domain::params::{FxParameters, ParameterSet};
use std::sync::Arc;
use tracing::debug;

/// Resolution of the saturation transfer table
pub const SATURATION_CURVE_POINTS: usize = 44100;
/// Denoise at 100 % pulls the 5 kHz shelf down this far
pub const DENOISE_MAX_CUT_DB: f32 = -36.0;
/// Texture levels at 100 %
pub const HISS_MAX_GAIN: f32 = 0.08;
pub const CRACKLE_MAX_GAIN: f32 = 0.15;
/// Compression at 100 % reaches this threshold
pub const COMPRESSION_MAX_THRESHOLD_DB: f32 = -50.0;

/// Drive factor for a 0-100 % saturation knob
pub fn saturation_drive(saturation: f32) -> f32 {
    saturation / 20.0
}

/// Transfer curve `tanh(d*x) / tanh(d)` over x in [-1, 1]
///
/// A drive of zero yields the three-point identity curve.
pub fn saturation_curve(drive: f32) -> Arc<[f32]> {
    if drive <= 0.0 || drive.is_nan() {
        return Waveshaper::identity_curve();
    }
    let norm = drive.tanh();
    let last = (SATURATION_CURVE_POINTS - 1) as f32;
    (0..SATURATION_CURVE_POINTS)
        .map(|i| {
            let x = i as f32 * 2.0 / last - 1.0;
            (drive * x).tanh() / norm
        })
        .collect()
}

/// (mid, side) gains for a width percentage
pub fn width_gains(width: f32) -> (f32, f32) {
    let side = width / 100.0;
    let mid = (1.5 - width / 200.0).max(0.1);
    (mid, side)
}

/// (threshold dB, ratio) for a 0-100 % compression knob
pub fn compressor_settings(compression: f32) -> (f32, f32) {
    (compression * COMPRESSION_MAX_THRESHOLD_DB / 100.0, 1.0 + compression / 10.0)
}

/// Derive the full stage target set from a parameter set
///
/// `curve` supplies the saturation table for a given drive so callers can
/// cache it; [`saturation_curve`] is the uncached implementation.
pub fn derive_targets_with(
    params: &ParameterSet,
    mut curve: impl FnMut(f32) -> Arc<[f32]>,
) -> StageTargets {
    let fx = params.fx.clamped();
    let mut targets = StageTargets::neutral(params.eq.len());

    // Not bypassable
    targets.hpf_hz = fx.hpf;
    targets.lpf_hz = fx.lpf;
    targets.master_gain = params.master_gain.to_amplitude();

    if params.bypass {
        targets.saturation_curve = curve(0.0);
        return targets;
    }

    apply_coloring(&mut targets, &fx, params.eq.gains());
    targets.saturation_curve = curve(saturation_drive(fx.saturation));
    targets
}

/// Derive targets without caching the saturation table
pub fn derive_targets(params: &ParameterSet) -> StageTargets {
    derive_targets_with(params, saturation_curve)
}

fn apply_coloring(targets: &mut StageTargets, fx: &FxParameters, eq_gains: Vec<f32>) {
    targets.denoise_gain_db = fx.denoise / 100.0 * DENOISE_MAX_CUT_DB;
    targets.eq_gains_db = eq_gains;
    targets.bass_db = fx.bass;
    targets.mid_db = fx.mid;
    targets.treble_db = fx.treble;
    (targets.width_mid, targets.width_side) = width_gains(fx.width);
    (targets.compressor_threshold_db, targets.compressor_ratio) = compressor_settings(fx.compression);
    targets.hiss_gain = fx.hiss / 100.0 * HISS_MAX_GAIN;
    targets.crackle_gain = fx.crackle / 100.0 * CRACKLE_MAX_GAIN;
}

/// Control-side synchronizer with a cached saturation table
///
/// Recomputing the 44100-point curve is the only expensive derivation, so it
/// is rebuilt only when the effective drive changes.
#[derive(Debug, Clone)]
pub struct ParameterSynchronizer {
    cached_drive: f32,
    cached_curve: Arc<[f32]>,
    last: Option<StageTargets>,
}

impl Default for ParameterSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSynchronizer {
    pub fn new() -> Self {
        Self {
            cached_drive: 0.0,
            cached_curve: Waveshaper::identity_curve(),
            last: None,
        }
    }

    /// Derive targets for `params`, reusing the cached curve when possible
    pub fn synchronize(&mut self, params: &ParameterSet) -> StageTargets {
        let Self {
            cached_drive,
            cached_curve,
            ..
        } = self;
        let targets = derive_targets_with(params, |drive| {
            if drive != *cached_drive {
                *cached_drive = drive;
                *cached_curve = saturation_curve(drive);
            }
            Arc::clone(&*cached_curve)
        });

        debug!(
            bypass = params.bypass,
            hpf = targets.hpf_hz,
            lpf = targets.lpf_hz,
            ratio = targets.compressor_ratio,
            master_gain = targets.master_gain,
            "Parameters synchronized"
        );
        self.last = Some(targets.clone());
        targets
    }

    /// Targets produced by the most recent synchronization
    pub fn last_targets(&self) -> Option<&StageTargets> {
        self.last.as_ref()
    }
}
