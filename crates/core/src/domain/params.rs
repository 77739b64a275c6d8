//! Declarative parameter set driving the mastering chain
//!
//! Every knob carries a declared range. Values are clamped to that range
//! before anything derived from them reaches an audio stage.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Declared ranges for every user-facing control
pub mod limits {
    /// Percentage knobs (denoise, clarity, saturation, compression, textures)
    pub const PERCENT_MIN: f32 = 0.0;
    pub const PERCENT_MAX: f32 = 100.0;

    /// Stereo width in percent
    pub const WIDTH_MIN: f32 = 0.0;
    pub const WIDTH_MAX: f32 = 200.0;

    /// High-pass cutoff (Hz)
    pub const HPF_MIN: f32 = 20.0;
    pub const HPF_MAX: f32 = 500.0;

    /// Low-pass cutoff (Hz)
    pub const LPF_MIN: f32 = 5000.0;
    pub const LPF_MAX: f32 = 20000.0;

    /// Tone stack boosts (dB, boost only)
    pub const TONE_MIN: f32 = 0.0;
    pub const TONE_MAX: f32 = 12.0;

    /// Equalizer band gain (dB)
    pub const EQ_GAIN_MIN: f32 = -18.0;
    pub const EQ_GAIN_MAX: f32 = 18.0;

    /// Master gain (dB)
    pub const MASTER_MIN: f32 = -60.0;
    pub const MASTER_MAX: f32 = 12.0;
}

/// Clamp that also maps NaN to the lower bound, so garbage never reaches a stage
#[inline]
pub(crate) fn clamp_finite(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Independent effect knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FxParameters {
    /// Noise-floor attenuation, 0-100 %
    pub denoise: f32,
    /// Clarity amount, 0-100 % (carried with the set, no dedicated stage)
    pub clarity: f32,
    /// Stereo width, 0-200 %
    pub width: f32,
    /// Saturation drive, 0-100 %
    pub saturation: f32,
    /// Compression amount, 0-100 %
    pub compression: f32,
    /// High-pass cutoff, 20-500 Hz
    pub hpf: f32,
    /// Low-pass cutoff, 5-20 kHz
    pub lpf: f32,
    /// Tone stack boosts, 0-12 dB
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    /// Vinyl crackle texture level, 0-100 %
    pub crackle: f32,
    /// Tape hiss texture level, 0-100 %
    pub hiss: f32,
}

impl Default for FxParameters {
    fn default() -> Self {
        Self {
            denoise: 0.0,
            clarity: 0.0,
            width: 100.0,
            saturation: 0.0,
            compression: 0.0,
            hpf: limits::HPF_MIN,
            lpf: limits::LPF_MAX,
            bass: 0.0,
            mid: 0.0,
            treble: 0.0,
            crackle: 0.0,
            hiss: 0.0,
        }
    }
}

impl FxParameters {
    /// Copy of these parameters with every knob inside its declared range
    #[must_use]
    pub fn clamped(&self) -> Self {
        use limits::*;
        let pct = |v: f32| clamp_finite(v, PERCENT_MIN, PERCENT_MAX);
        let tone = |v: f32| clamp_finite(v, TONE_MIN, TONE_MAX);
        Self {
            denoise: pct(self.denoise),
            clarity: pct(self.clarity),
            width: clamp_finite(self.width, WIDTH_MIN, WIDTH_MAX),
            saturation: pct(self.saturation),
            compression: pct(self.compression),
            hpf: clamp_finite(self.hpf, HPF_MIN, HPF_MAX),
            lpf: clamp_finite(self.lpf, LPF_MIN, LPF_MAX),
            bass: tone(self.bass),
            mid: tone(self.mid),
            treble: tone(self.treble),
            crackle: pct(self.crackle),
            hiss: pct(self.hiss),
        }
    }
}

/// Filter shape of an equalizer band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandShape {
    LowShelf,
    Peaking,
    HighShelf,
}

/// One fixed equalizer band; only the gain is mutable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    id: usize,
    frequency: f32,
    shape: BandShape,
    q: Option<f32>,
    gain_db: f32,
}

impl EqBand {
    const fn fixed(id: usize, frequency: f32, shape: BandShape, q: Option<f32>) -> Self {
        Self {
            id,
            frequency,
            shape,
            q,
            gain_db: 0.0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn shape(&self) -> BandShape {
        self.shape
    }

    pub fn q(&self) -> Option<f32> {
        self.q
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }
}

/// Default 12-band layout, 32 Hz to 20 kHz
pub const DEFAULT_EQ_BANDS: [EqBand; 12] = [
    EqBand::fixed(0, 32.0, BandShape::LowShelf, None),
    EqBand::fixed(1, 64.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(2, 125.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(3, 250.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(4, 500.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(5, 1000.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(6, 2000.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(7, 4000.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(8, 8000.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(9, 12000.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(10, 16000.0, BandShape::Peaking, Some(1.0)),
    EqBand::fixed(11, 20000.0, BandShape::HighShelf, None),
];

/// Ordered, fixed-size set of equalizer bands (ascending frequency)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqBands {
    bands: Vec<EqBand>,
}

impl Default for EqBands {
    fn default() -> Self {
        Self {
            bands: DEFAULT_EQ_BANDS.to_vec(),
        }
    }
}

impl EqBands {
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EqBand> {
        self.bands.iter()
    }

    pub fn get(&self, id: usize) -> Option<&EqBand> {
        self.bands.get(id)
    }

    /// Set a band's gain, clamped to +/-18 dB
    ///
    /// Returns false when no band has this id.
    pub fn set_gain(&mut self, id: usize, gain_db: f32) -> bool {
        match self.bands.get_mut(id) {
            Some(band) => {
                band.gain_db = clamp_finite(gain_db, limits::EQ_GAIN_MIN, limits::EQ_GAIN_MAX);
                trace!(band = id, gain_db = band.gain_db, "EQ band gain set");
                true
            }
            None => false,
        }
    }

    /// Set every band's gain from a per-band function of its frequency
    pub fn shape_by_frequency(&mut self, mut gain_for: impl FnMut(f32) -> f32) {
        for band in &mut self.bands {
            band.gain_db = clamp_finite(gain_for(band.frequency), limits::EQ_GAIN_MIN, limits::EQ_GAIN_MAX);
        }
    }

    pub fn reset(&mut self) {
        for band in &mut self.bands {
            band.gain_db = 0.0;
        }
    }

    pub fn gains(&self) -> Vec<f32> {
        self.bands.iter().map(|b| b.gain_db).collect()
    }
}

/// Master output gain in decibels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasterGain(f32);

impl MasterGain {
    pub const MIN_GAIN: f32 = limits::MASTER_MIN;
    pub const UNITY_GAIN: f32 = 0.0;
    pub const MAX_GAIN: f32 = limits::MASTER_MAX;

    pub fn new(db: f32) -> Self {
        Self(clamp_finite(db, Self::MIN_GAIN, Self::MAX_GAIN))
    }

    pub fn db(&self) -> f32 {
        self.0
    }

    /// Linear multiplier, 10^(dB/20)
    pub fn to_amplitude(&self) -> f32 {
        10.0_f32.powf(self.0 / 20.0)
    }
}

impl Default for MasterGain {
    fn default() -> Self {
        Self(Self::UNITY_GAIN)
    }
}

/// Everything the parameter synchronizer needs to derive stage values
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    pub fx: FxParameters,
    pub eq: EqBands,
    pub master_gain: MasterGain,
    pub bypass: bool,
}
