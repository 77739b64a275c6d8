//! Preset bank
//!
//! Each preset is a complete EQ + FX parameter set. Applying one replaces the
//! session parameters in a single step; only `Flat` also resets the master
//! gain.

use crate::domain::params::{EqBands, FxParameters, MasterGain};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetId {
    Vocal,
    Podcast,
    Master,
    Cinematic,
    Vinyl,
    Broadcast,
    #[serde(alias = "pure")]
    Flat,
}

/// Values a preset writes into the session
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub eq: EqBands,
    pub fx: FxParameters,
    /// Replacement master gain, if the preset sets one
    pub master_gain: Option<MasterGain>,
}

impl PresetId {
    pub const ALL: [PresetId; 7] = [
        PresetId::Vocal,
        PresetId::Podcast,
        PresetId::Master,
        PresetId::Cinematic,
        PresetId::Vinyl,
        PresetId::Broadcast,
        PresetId::Flat,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PresetId::Vocal => "vocal",
            PresetId::Podcast => "podcast",
            PresetId::Master => "master",
            PresetId::Cinematic => "cinematic",
            PresetId::Vinyl => "vinyl",
            PresetId::Broadcast => "broadcast",
            PresetId::Flat => "flat",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PresetId::Vocal => "Voice presence: low cut, 2-4.5 kHz lift, gentle compression",
            PresetId::Podcast => "Spoken word: boxiness cut, strong leveling",
            PresetId::Master => "Mix bus polish: subtle width and glue",
            PresetId::Cinematic => "Wide and deep: sub and air boost",
            PresetId::Vinyl => "Record emulation: dark top end, drive, crackle and hiss",
            PresetId::Broadcast => "Radio loudness: heavy compression, presence lift",
            PresetId::Flat => "Neutral: every control at its default",
        }
    }

    /// Build the full parameter set for this preset
    pub fn build(&self) -> Preset {
        let mut eq = EqBands::default();
        let mut master_gain = None;

        let fx = match self {
            PresetId::Vocal => {
                eq.shape_by_frequency(|f| {
                    if f < 120.0 {
                        -10.0
                    } else if (2000.0..=4500.0).contains(&f) {
                        9.0
                    } else {
                        0.0
                    }
                });
                fx(25.0, 60.0, 100.0, 20.0, 40.0, 110.0, 16000.0, [2.0, 4.0, 3.0], 0.0, 5.0)
            }
            PresetId::Podcast => {
                eq.shape_by_frequency(|f| {
                    if f == 250.0 {
                        -6.0
                    } else if f >= 3000.0 {
                        5.0
                    } else {
                        0.0
                    }
                });
                fx(45.0, 30.0, 90.0, 10.0, 65.0, 85.0, 18000.0, [3.0, 5.0, 2.0], 0.0, 8.0)
            }
            PresetId::Master => {
                eq.shape_by_frequency(|f| {
                    if f == 64.0 {
                        4.0
                    } else if f == 12000.0 {
                        3.5
                    } else {
                        0.0
                    }
                });
                fx(0.0, 20.0, 135.0, 12.0, 25.0, 28.0, 20000.0, [1.5, 0.5, 2.0], 0.0, 2.0)
            }
            PresetId::Cinematic => {
                eq.shape_by_frequency(|f| {
                    if f <= 64.0 {
                        10.0
                    } else if f >= 10000.0 {
                        8.0
                    } else {
                        0.0
                    }
                });
                fx(15.0, 40.0, 180.0, 25.0, 50.0, 22.0, 20000.0, [8.0, 2.0, 6.0], 12.0, 10.0)
            }
            PresetId::Vinyl => {
                eq.shape_by_frequency(|f| {
                    if f > 6000.0 {
                        -18.0
                    } else if f < 120.0 {
                        -8.0
                    } else {
                        0.0
                    }
                });
                fx(50.0, 10.0, 85.0, 65.0, 30.0, 65.0, 8500.0, [4.0, 6.0, 0.0], 75.0, 35.0)
            }
            PresetId::Broadcast => {
                eq.shape_by_frequency(|f| if f >= 4000.0 { 6.0 } else { 0.0 });
                fx(10.0, 80.0, 115.0, 35.0, 85.0, 50.0, 18000.0, [5.0, 3.0, 4.0], 0.0, 15.0)
            }
            PresetId::Flat => {
                master_gain = Some(MasterGain::default());
                FxParameters::default()
            }
        };

        Preset { eq, fx, master_gain }
    }
}

#[allow(clippy::too_many_arguments)]
fn fx(
    denoise: f32,
    clarity: f32,
    width: f32,
    saturation: f32,
    compression: f32,
    hpf: f32,
    lpf: f32,
    [bass, mid, treble]: [f32; 3],
    crackle: f32,
    hiss: f32,
) -> FxParameters {
    FxParameters {
        denoise,
        clarity,
        width,
        saturation,
        compression,
        hpf,
        lpf,
        bass,
        mid,
        treble,
        crackle,
        hiss,
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PresetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pure" => Ok(PresetId::Flat),
            name => PresetId::ALL
                .into_iter()
                .find(|p| p.name() == name)
                .ok_or_else(|| format!("Unknown preset: {s}")),
        }
    }
}
