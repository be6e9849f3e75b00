//! Named parameter bundles.
//!
//! A preset rewrites the sound-defining fields of an [`EngineParams`]
//! snapshot in one place, so applying it through the parameter handle is a
//! single atomic swap: the engine never renders a block with half a preset.

use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::params::EngineParams;

/// Error returned when a preset name does not match.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown preset name `{0}`")]
pub struct UnknownPresetError(pub String);

/// A named engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Preset {
    /// High damping, moderate sympathy, dry-ish room.
    Piano,
    /// Long sustain, strong sympathy, open room.
    Harp,
    /// Medium sustain, little sympathy.
    Guitar,
    /// Bright, drone-heavy sympathetic response.
    Sitar,
    /// Maximum sustain and sympathy, washy room.
    Pad,
}

impl Preset {
    /// Every available preset.
    pub const ALL: [Preset; 5] = [
        Preset::Piano,
        Preset::Harp,
        Preset::Guitar,
        Preset::Sitar,
        Preset::Pad,
    ];

    /// The preset's canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Piano => "piano",
            Preset::Harp => "harp",
            Preset::Guitar => "guitar",
            Preset::Sitar => "sitar",
            Preset::Pad => "pad",
        }
    }

    /// Rewrites the sound-defining fields of `params`.
    pub fn apply(&self, params: &mut EngineParams) {
        match self {
            Preset::Piano => {
                params.damping = 0.995;
                params.brightness = 0.6;
                params.sympathy_amount = 0.2;
                params.reverb_mix = 0.15;
                params.reverb_size = 0.4;
                params.warmth = 0.1;
                params.interval_weights = [
                    1.0, 0.02, 0.05, 0.15, 0.2, 0.3, 0.02, 0.5, 0.1, 0.08, 0.03, 0.03,
                ];
            }
            Preset::Harp => {
                params.damping = 0.999;
                params.brightness = 0.8;
                params.sympathy_amount = 0.5;
                params.reverb_mix = 0.3;
                params.reverb_size = 0.6;
                params.warmth = 0.0;
                params.interval_weights = [
                    1.0, 0.08, 0.2, 0.35, 0.4, 0.55, 0.15, 0.7, 0.35, 0.3, 0.15, 0.18,
                ];
            }
            Preset::Guitar => {
                params.damping = 0.997;
                params.brightness = 0.5;
                params.sympathy_amount = 0.1;
                params.reverb_mix = 0.2;
                params.reverb_size = 0.3;
                params.warmth = 0.2;
                params.interval_weights = [
                    1.0, 0.05, 0.1, 0.2, 0.25, 0.4, 0.05, 0.5, 0.2, 0.15, 0.08, 0.08,
                ];
            }
            Preset::Sitar => {
                params.damping = 0.998;
                params.brightness = 0.9;
                params.sympathy_amount = 0.7;
                params.reverb_mix = 0.25;
                params.reverb_size = 0.5;
                params.warmth = 0.15;
                params.interval_weights = [
                    1.0, 0.1, 0.25, 0.4, 0.5, 0.7, 0.15, 0.8, 0.3, 0.35, 0.2, 0.1,
                ];
            }
            Preset::Pad => {
                params.damping = 0.9999;
                params.brightness = 0.4;
                params.sympathy_amount = 0.9;
                params.reverb_mix = 0.6;
                params.reverb_size = 0.95;
                params.warmth = 0.3;
                params.interval_weights = [
                    1.0, 0.15, 0.3, 0.4, 0.45, 0.6, 0.3, 0.7, 0.4, 0.4, 0.3, 0.3,
                ];
            }
        }
    }
}

impl FromStr for Preset {
    type Err = UnknownPresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "piano" => Ok(Preset::Piano),
            "harp" => Ok(Preset::Harp),
            "guitar" => Ok(Preset::Guitar),
            "sitar" => Ok(Preset::Sitar),
            "pad" => Ok(Preset::Pad),
            other => Err(UnknownPresetError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamHandle;

    #[test]
    fn test_name_parse_roundtrip() {
        for preset in Preset::ALL {
            assert_eq!(preset.name().parse::<Preset>().unwrap(), preset);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(" Sitar ".parse::<Preset>().unwrap(), Preset::Sitar);
    }

    #[test]
    fn test_unknown_name_errors() {
        let err = "theremin".parse::<Preset>().unwrap_err();
        assert_eq!(err, UnknownPresetError("theremin".to_string()));
    }

    #[test]
    fn test_apply_is_atomic_swap() {
        let h = ParamHandle::new(EngineParams::for_bank(12, 3));
        let before = h.snapshot().generation;
        h.apply_preset(Preset::Pad);
        let p = h.snapshot();
        // Every field lands in one generation.
        assert_eq!(p.generation, before + 1);
        assert_eq!(p.damping, 0.9999);
        assert_eq!(p.sympathy_amount, 0.9);
        assert_eq!(p.reverb_size, 0.95);
    }

    #[test]
    fn test_presets_keep_params_in_range() {
        for preset in Preset::ALL {
            let mut p = EngineParams::for_bank(12, 3);
            preset.apply(&mut p);
            assert!((0.9..=0.9999).contains(&p.damping));
            assert!((0.0..=1.0).contains(&p.sympathy_amount));
            assert!((0.0..=1.0).contains(&p.reverb_mix));
            assert!(p.interval_weights.iter().all(|w| (0.0..=1.0).contains(w)));
        }
    }
}
