//! Signal chain graph
//!
//! The chain is a fixed arena of stages addressed by [`StageId`]. Topology is
//! decided once in [`SignalChain::new`] and never changes; parameter updates
//! index into the arena and only move smoothing targets.
//!
//! ```text
//! input -> hpf -> lpf -> denoise -> eq[0..n] -> bass -> mid -> treble -> saturator
//!       -> M/S width (hiss -> lpf 6k and crackle -> hpf 1.5k summed into M)
//!       -> compressor -> master gain -> limiter -> out
//! ```

use crate::domain::dsp::{Compressor, FilterKind, FilterStage, GainStage, Processor, Waveshaper};
use crate::domain::noise::LoopCursor;
use crate::domain::params::{BandShape, EqBands};
use std::sync::Arc;
use tracing::{debug, trace};

/// Fixed frequency of the denoise high shelf
pub const DENOISE_SHELF_HZ: f32 = 5000.0;
/// Tone stack centers and resonance
pub const BASS_HZ: f32 = 60.0;
pub const MID_HZ: f32 = 1200.0;
pub const TREBLE_HZ: f32 = 10000.0;
pub const TONE_Q: f32 = 0.7;
/// Noise texture shaping corners
pub const HISS_LOWPASS_HZ: f32 = 6000.0;
pub const CRACKLE_HIGHPASS_HZ: f32 = 1500.0;
/// Compressor timing
pub const COMPRESSOR_ATTACK_SECS: f32 = 0.003;
pub const COMPRESSOR_RELEASE_SECS: f32 = 0.25;
pub const COMPRESSOR_KNEE_DB: f32 = 6.0;
/// Output limiter
pub const LIMITER_THRESHOLD_DB: f32 = -0.1;
pub const LIMITER_RATIO: f32 = 20.0;
pub const OUTPUT_CEILING: f32 = 1.0;

/// Role of a stage in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    InputGain,
    HighPass,
    LowPass,
    Denoise,
    Eq(usize),
    Bass,
    Mid,
    Treble,
    Saturator,
    WidthMid,
    WidthSide,
    HissGain,
    HissFilter,
    CrackleGain,
    CrackleFilter,
    Compressor,
    MasterGain,
    Limiter,
}

/// One arena slot
#[derive(Debug, Clone)]
pub enum Stage {
    Filter(FilterStage),
    Gain(GainStage),
    Shaper(Waveshaper),
    Dynamics(Compressor),
}

impl Stage {
    pub fn as_filter(&self) -> Option<&FilterStage> {
        match self {
            Stage::Filter(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_gain(&self) -> Option<&GainStage> {
        match self {
            Stage::Gain(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_shaper(&self) -> Option<&Waveshaper> {
        match self {
            Stage::Shaper(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dynamics(&self) -> Option<&Compressor> {
        match self {
            Stage::Dynamics(c) => Some(c),
            _ => None,
        }
    }
}

impl Processor for Stage {
    fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        match self {
            Stage::Filter(f) => f.process(left, right),
            Stage::Gain(g) => g.process(left, right),
            Stage::Shaper(s) => s.process(left, right),
            Stage::Dynamics(c) => c.process(left, right),
        }
    }

    fn reset(&mut self) {
        match self {
            Stage::Filter(f) => f.reset(),
            Stage::Gain(g) => g.reset(),
            Stage::Shaper(s) => s.reset(),
            Stage::Dynamics(c) => c.reset(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Stage::Filter(f) => f.name(),
            Stage::Gain(g) => g.name(),
            Stage::Shaper(s) => s.name(),
            Stage::Dynamics(c) => c.name(),
        }
    }
}

/// Every value the chain glides toward, in stage units
///
/// This is the whole control surface of the chain. It crosses to the audio
/// thread as one value, so a preset never lands half-applied.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTargets {
    pub input_gain: f32,
    pub hpf_hz: f32,
    pub lpf_hz: f32,
    pub denoise_gain_db: f32,
    pub eq_gains_db: Vec<f32>,
    pub bass_db: f32,
    pub mid_db: f32,
    pub treble_db: f32,
    pub saturation_curve: Arc<[f32]>,
    pub width_mid: f32,
    pub width_side: f32,
    pub hiss_gain: f32,
    pub crackle_gain: f32,
    pub compressor_threshold_db: f32,
    pub compressor_ratio: f32,
    /// Linear multiplier
    pub master_gain: f32,
}

impl StageTargets {
    /// Identity settings for an `eq_bands`-band chain
    pub fn neutral(eq_bands: usize) -> Self {
        Self {
            input_gain: 1.0,
            hpf_hz: 20.0,
            lpf_hz: 20000.0,
            denoise_gain_db: 0.0,
            eq_gains_db: vec![0.0; eq_bands],
            bass_db: 0.0,
            mid_db: 0.0,
            treble_db: 0.0,
            saturation_curve: Waveshaper::identity_curve(),
            width_mid: 1.0,
            width_side: 1.0,
            hiss_gain: 0.0,
            crackle_gain: 0.0,
            compressor_threshold_db: 0.0,
            compressor_ratio: 1.0,
            master_gain: 1.0,
        }
    }
}

/// Scratch buffers reused by every block
#[derive(Debug, Clone)]
struct Scratch {
    hiss: Vec<f32>,
    crackle: Vec<f32>,
    mid_gain: Vec<f32>,
    side_gain: Vec<f32>,
}

impl Scratch {
    fn new(max_block: usize) -> Self {
        Self {
            hiss: vec![0.0; max_block],
            crackle: vec![0.0; max_block],
            mid_gain: vec![0.0; max_block],
            side_gain: vec![0.0; max_block],
        }
    }
}

/// The mastering chain, built once per playback context
#[derive(Debug, Clone)]
pub struct SignalChain {
    stages: Vec<Stage>,
    eq_bands: usize,
    sample_rate: f32,
    max_block: usize,
    scratch: Scratch,
}

impl SignalChain {
    /// Build the full topology at `sample_rate`
    ///
    /// `max_block` bounds the internal scratch size; longer blocks are
    /// processed in pieces.
    pub fn new(sample_rate: f32, eq: &EqBands, time_constant_secs: f32, max_block: usize) -> Self {
        let tau = time_constant_secs;
        let filter = |name, kind, hz, q| Stage::Filter(FilterStage::new(name, kind, sample_rate, hz, q, tau));
        let gain = |name, initial, max| Stage::Gain(GainStage::new(name, initial, max, sample_rate, tau));

        let mut stages = vec![
            gain("Input", 1.0, 4.0),
            filter("HighPass", FilterKind::HighPass, 20.0, None),
            filter("LowPass", FilterKind::LowPass, 20000.0, None),
            filter("Denoise", FilterKind::HighShelf, DENOISE_SHELF_HZ, None),
        ];

        for band in eq.iter() {
            let kind = match band.shape() {
                BandShape::LowShelf => FilterKind::LowShelf,
                BandShape::Peaking => FilterKind::Peaking,
                BandShape::HighShelf => FilterKind::HighShelf,
            };
            let mut stage = FilterStage::new("EqBand", kind, sample_rate, band.frequency(), band.q(), tau);
            stage.set_gain_target(band.gain_db());
            stages.push(Stage::Filter(stage));
        }

        stages.extend([
            filter("Bass", FilterKind::Peaking, BASS_HZ, Some(TONE_Q)),
            filter("Mid", FilterKind::Peaking, MID_HZ, Some(TONE_Q)),
            filter("Treble", FilterKind::Peaking, TREBLE_HZ, Some(TONE_Q)),
            Stage::Shaper(Waveshaper::new()),
            gain("WidthMid", 1.0, 2.0),
            gain("WidthSide", 1.0, 2.0),
            gain("HissGain", 0.0, 1.0),
            filter("HissFilter", FilterKind::LowPass, HISS_LOWPASS_HZ, None),
            gain("CrackleGain", 0.0, 1.0),
            filter("CrackleFilter", FilterKind::HighPass, CRACKLE_HIGHPASS_HZ, None),
            Stage::Dynamics(
                Compressor::new(
                    "Compressor",
                    sample_rate,
                    0.0,
                    1.0,
                    COMPRESSOR_ATTACK_SECS,
                    COMPRESSOR_RELEASE_SECS,
                    tau,
                )
                .with_knee(COMPRESSOR_KNEE_DB),
            ),
            gain("MasterGain", 1.0, 8.0),
            Stage::Dynamics(
                Compressor::new(
                    "Limiter",
                    sample_rate,
                    LIMITER_THRESHOLD_DB,
                    LIMITER_RATIO,
                    COMPRESSOR_ATTACK_SECS,
                    COMPRESSOR_RELEASE_SECS,
                    tau,
                )
                .with_ceiling(OUTPUT_CEILING),
            ),
        ]);

        let max_block = max_block.max(1);
        debug!(stages = stages.len(), sample_rate, max_block, "Signal chain built");

        Self {
            stages,
            eq_bands: eq.len(),
            sample_rate,
            max_block,
            scratch: Scratch::new(max_block),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn eq_band_count(&self) -> usize {
        self.eq_bands
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Arena index of a stage role
    fn slot(&self, id: StageId) -> Option<usize> {
        let n = self.eq_bands;
        let index = match id {
            StageId::InputGain => 0,
            StageId::HighPass => 1,
            StageId::LowPass => 2,
            StageId::Denoise => 3,
            StageId::Eq(band) if band < n => 4 + band,
            StageId::Eq(_) => return None,
            StageId::Bass => 4 + n,
            StageId::Mid => 5 + n,
            StageId::Treble => 6 + n,
            StageId::Saturator => 7 + n,
            StageId::WidthMid => 8 + n,
            StageId::WidthSide => 9 + n,
            StageId::HissGain => 10 + n,
            StageId::HissFilter => 11 + n,
            StageId::CrackleGain => 12 + n,
            StageId::CrackleFilter => 13 + n,
            StageId::Compressor => 14 + n,
            StageId::MasterGain => 15 + n,
            StageId::Limiter => 16 + n,
        };
        Some(index)
    }

    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.slot(id).and_then(|i| self.stages.get(i))
    }

    fn stage_mut(&mut self, id: StageId) -> Option<&mut Stage> {
        self.slot(id).and_then(|i| self.stages.get_mut(i))
    }

    fn set_filter_frequency(&mut self, id: StageId, hz: f32) {
        if let Some(Stage::Filter(f)) = self.stage_mut(id) {
            f.set_frequency_target(hz);
        }
    }

    fn set_filter_gain(&mut self, id: StageId, db: f32) {
        if let Some(Stage::Filter(f)) = self.stage_mut(id) {
            f.set_gain_target(db);
        }
    }

    fn set_gain(&mut self, id: StageId, gain: f32) {
        if let Some(Stage::Gain(g)) = self.stage_mut(id) {
            g.set_target(gain);
        }
    }

    /// Move every stage toward `targets`; nothing jumps
    pub fn apply_targets(&mut self, targets: &StageTargets) {
        self.set_gain(StageId::InputGain, targets.input_gain);
        self.set_filter_frequency(StageId::HighPass, targets.hpf_hz);
        self.set_filter_frequency(StageId::LowPass, targets.lpf_hz);
        self.set_filter_gain(StageId::Denoise, targets.denoise_gain_db);
        for (band, &db) in targets.eq_gains_db.iter().enumerate().take(self.eq_bands) {
            self.set_filter_gain(StageId::Eq(band), db);
        }
        self.set_filter_gain(StageId::Bass, targets.bass_db);
        self.set_filter_gain(StageId::Mid, targets.mid_db);
        self.set_filter_gain(StageId::Treble, targets.treble_db);
        if let Some(Stage::Shaper(s)) = self.stage_mut(StageId::Saturator) {
            if !Arc::ptr_eq(s.curve(), &targets.saturation_curve) {
                s.set_curve(Arc::clone(&targets.saturation_curve));
            }
        }
        self.set_gain(StageId::WidthMid, targets.width_mid);
        self.set_gain(StageId::WidthSide, targets.width_side);
        self.set_gain(StageId::HissGain, targets.hiss_gain);
        self.set_gain(StageId::CrackleGain, targets.crackle_gain);
        if let Some(Stage::Dynamics(c)) = self.stage_mut(StageId::Compressor) {
            c.set_threshold_target(targets.compressor_threshold_db);
            c.set_ratio_target(targets.compressor_ratio);
        }
        self.set_gain(StageId::MasterGain, targets.master_gain);
        trace!(master_gain = targets.master_gain, "Stage targets applied");
    }

    /// Read back the targets the stages are currently gliding toward
    pub fn targets(&self) -> StageTargets {
        let gain = |id| self.stage(id).and_then(Stage::as_gain).map_or(0.0, GainStage::target);
        let freq = |id| {
            self.stage(id)
                .and_then(Stage::as_filter)
                .map_or(0.0, FilterStage::frequency_target)
        };
        let filter_gain = |id| {
            self.stage(id)
                .and_then(Stage::as_filter)
                .map_or(0.0, FilterStage::gain_target)
        };
        let compressor = self.stage(StageId::Compressor).and_then(Stage::as_dynamics);

        StageTargets {
            input_gain: gain(StageId::InputGain),
            hpf_hz: freq(StageId::HighPass),
            lpf_hz: freq(StageId::LowPass),
            denoise_gain_db: filter_gain(StageId::Denoise),
            eq_gains_db: (0..self.eq_bands).map(|b| filter_gain(StageId::Eq(b))).collect(),
            bass_db: filter_gain(StageId::Bass),
            mid_db: filter_gain(StageId::Mid),
            treble_db: filter_gain(StageId::Treble),
            saturation_curve: self
                .stage(StageId::Saturator)
                .and_then(Stage::as_shaper)
                .map_or_else(Waveshaper::identity_curve, |s| Arc::clone(s.curve())),
            width_mid: gain(StageId::WidthMid),
            width_side: gain(StageId::WidthSide),
            hiss_gain: gain(StageId::HissGain),
            crackle_gain: gain(StageId::CrackleGain),
            compressor_threshold_db: compressor.map_or(0.0, Compressor::threshold_target),
            compressor_ratio: compressor.map_or(1.0, Compressor::ratio_target),
            master_gain: gain(StageId::MasterGain),
        }
    }

    /// Clear all filter and envelope memories
    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    /// Render one planar stereo block in place
    ///
    /// `noise` carries the hiss and crackle loop cursors while the transport
    /// is playing; without it the texture paths receive silence.
    ///
    /// Width recombines through a true mid/side matrix
    /// (`L = M*mid + S*side`, `R = M*mid - S*side`) rather than blending two
    /// gain paths, so 100 % width is an exact identity. Above 100 % the mid
    /// gain drops as the side gain rises: at 200 % a centered signal leaves
    /// at 0.5x instead of growing louder.
    pub fn process(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        mut noise: Option<(&mut LoopCursor, &mut LoopCursor)>,
    ) {
        let len = left.len().min(right.len());
        let mut offset = 0;
        while offset < len {
            let end = (offset + self.max_block).min(len);
            let textures = noise.as_mut().map(|(h, c)| (&mut **h, &mut **c));
            self.process_block(&mut left[offset..end], &mut right[offset..end], textures);
            offset = end;
        }
    }

    fn process_block(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        noise: Option<(&mut LoopCursor, &mut LoopCursor)>,
    ) {
        let n = self.eq_bands;
        let frames = left.len();
        let Self { stages, scratch, .. } = self;

        // Serial section: input gain through the saturator
        for stage in &mut stages[..=7 + n] {
            stage.process(left, right);
        }

        let hiss = &mut scratch.hiss[..frames];
        let crackle = &mut scratch.crackle[..frames];
        match noise {
            Some((hiss_cursor, crackle_cursor)) => {
                hiss_cursor.fill(hiss);
                crackle_cursor.fill(crackle);
            }
            None => {
                hiss.fill(0.0);
                crackle.fill(0.0);
            }
        }

        if let Stage::Gain(g) = &mut stages[10 + n] {
            g.process_mono(hiss);
        }
        if let Stage::Filter(f) = &mut stages[11 + n] {
            f.process_mono(hiss);
        }
        if let Stage::Gain(g) = &mut stages[12 + n] {
            g.process_mono(crackle);
        }
        if let Stage::Filter(f) = &mut stages[13 + n] {
            f.process_mono(crackle);
        }

        let mid_gain = &mut scratch.mid_gain[..frames];
        let side_gain = &mut scratch.side_gain[..frames];
        if let Stage::Gain(g) = &mut stages[8 + n] {
            g.fill(mid_gain);
        }
        if let Stage::Gain(g) = &mut stages[9 + n] {
            g.fill(side_gain);
        }

        for i in 0..frames {
            let mid = 0.5 * (left[i] + right[i]) + hiss[i] + crackle[i];
            let side = 0.5 * (left[i] - right[i]);
            left[i] = mid * mid_gain[i] + side * side_gain[i];
            right[i] = mid * mid_gain[i] - side * side_gain[i];
        }

        // Dynamics section: compressor, master gain, limiter
        for stage in &mut stages[14 + n..] {
            stage.process(left, right);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::noise::NoiseTextures;
    use std::f32::consts::PI;

    const SR: f32 = 48000.0;

    fn chain() -> SignalChain {
        SignalChain::new(SR, &EqBands::default(), 0.05, 512)
    }

    fn sine(frames: usize, hz: f32, amp: f32) -> Vec<f32> {
        (0..frames).map(|i| amp * (2.0 * PI * hz * i as f32 / SR).sin()).collect()
    }

    #[test]
    fn test_topology_is_fixed() {
        let chain = chain();
        assert_eq!(chain.stage_count(), 17 + 12);
        assert_eq!(chain.stage(StageId::InputGain).map(|s| s.name()), Some("Input"));
        assert_eq!(chain.stage(StageId::Saturator).map(|s| s.name()), Some("Saturator"));
        assert_eq!(chain.stage(StageId::Limiter).map(|s| s.name()), Some("Limiter"));
        assert!(chain.stage(StageId::Eq(11)).is_some());
        assert!(chain.stage(StageId::Eq(12)).is_none());
    }

    #[test]
    fn test_eq_stage_shapes_follow_band_table() {
        let chain = chain();
        let first = chain.stage(StageId::Eq(0)).and_then(Stage::as_filter).unwrap();
        let last = chain.stage(StageId::Eq(11)).and_then(Stage::as_filter).unwrap();
        assert_eq!(first.kind(), FilterKind::LowShelf);
        assert_eq!(last.kind(), FilterKind::HighShelf);
    }

    #[test]
    fn test_fresh_chain_reports_neutral_targets() {
        assert_eq!(chain().targets(), StageTargets::neutral(12));
    }

    #[test]
    fn test_neutral_chain_is_transparent() {
        let mut chain = chain();
        let mut left = sine(4800, 1000.0, 0.25);
        let mut right = sine(4800, 440.0, 0.25);
        let (l0, r0) = (left.clone(), right.clone());

        chain.process(&mut left, &mut right, None);

        // Level is preserved once the filter start-up transient has passed
        let rms = |s: &[f32]| (s.iter().map(|x| x * x).sum::<f32>() / s.len() as f32).sqrt();
        assert!((rms(&left[1000..]) / rms(&l0[1000..]) - 1.0).abs() < 0.01);
        assert!((rms(&right[1000..]) / rms(&r0[1000..]) - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_apply_targets_round_trip() {
        let mut chain = chain();
        let mut targets = StageTargets::neutral(12);
        targets.hpf_hz = 110.0;
        targets.eq_gains_db[3] = -6.0;
        targets.width_mid = 0.6;
        targets.width_side = 1.8;
        targets.compressor_threshold_db = -20.0;
        targets.compressor_ratio = 5.0;
        targets.master_gain = 0.5;

        chain.apply_targets(&targets);
        assert_eq!(chain.targets(), targets);

        // Applying twice leaves the same state
        chain.apply_targets(&targets);
        assert_eq!(chain.targets(), targets);
    }

    #[test]
    fn test_width_zero_collapses_to_mono() {
        let mut chain = SignalChain::new(SR, &EqBands::default(), 0.0, 512);
        let mut targets = StageTargets::neutral(12);
        targets.width_side = 0.0;
        chain.apply_targets(&targets);

        let mut left = sine(2048, 500.0, 0.3);
        let mut right = vec![0.0; 2048];
        chain.process(&mut left, &mut right, None);

        for i in 100..2048 {
            assert!((left[i] - right[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_noise_only_with_cursors() {
        let textures = NoiseTextures::generate(SR as u32, Some(3));
        let mut chain = SignalChain::new(SR, &EqBands::default(), 0.0, 256);
        let mut targets = StageTargets::neutral(12);
        targets.hiss_gain = 0.08;
        chain.apply_targets(&targets);

        let mut left = vec![0.0; 4096];
        let mut right = vec![0.0; 4096];
        chain.process(&mut left, &mut right, None);
        assert!(left.iter().all(|s| *s == 0.0));

        let mut hiss = textures.hiss_cursor();
        let mut crackle = textures.crackle_cursor();
        chain.process(&mut left, &mut right, Some((&mut hiss, &mut crackle)));
        assert!(left.iter().any(|s| s.abs() > 1e-3));
        // Hiss is injected into the mid path only
        assert!(left.iter().zip(&right).all(|(l, r)| (l - r).abs() < 1e-6));
        assert_eq!(hiss.position(), 4096);
    }

    #[test]
    fn test_output_never_exceeds_ceiling() {
        let mut chain = SignalChain::new(SR, &EqBands::default(), 0.0, 512);
        let mut targets = StageTargets::neutral(12);
        targets.master_gain = 3.98;
        targets.bass_db = 12.0;
        chain.apply_targets(&targets);

        let mut left = sine(9600, 60.0, 1.0);
        let mut right = left.clone();
        chain.process(&mut left, &mut right, None);

        assert!(left.iter().chain(right.iter()).all(|s| s.abs() <= OUTPUT_CEILING));
    }
}
