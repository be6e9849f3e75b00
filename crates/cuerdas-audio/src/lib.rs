//! Sympathetic string resonance engine.
//!
//! A bank of physically modeled strings exchanges energy through interval-
//! weighted coupling and, in the waveguide variant, a shared rigid bridge.
//! Discrete pluck events become continuous stereo audio: strings advance
//! sample by sample, the output stage pans, reverberates, and limits, and
//! the host pulls fixed-size interleaved blocks on its own deadline.
//!
//! # Example
//!
//! ```
//! use cuerdas_audio::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default());
//! engine.pluck(0, 0.8, 0.5); // C, mid-string, firm
//! let block = engine.process(256); // interleaved stereo
//! assert_eq!(block.len(), 512);
//! ```
//!
//! Parameters are changed through [`ParamHandle`] snapshots, safe to use
//! from a control thread while the audio thread keeps processing.

pub mod bridge;
pub mod coupling;
pub mod engine;
pub mod filter;
pub mod output;
pub mod params;
pub mod preset;
pub mod primitive;
pub mod string;
pub mod tuning;
pub mod voice;
pub mod waveguide;

pub use bridge::Bridge;
pub use coupling::{CouplingMatrix, DEFAULT_INTERVAL_WEIGHTS};
pub use engine::{Engine, EngineConfig};
pub use output::{OutputStage, SoftLimiter, StereoReverb};
pub use params::{EngineParams, ParamHandle};
pub use preset::{Preset, UnknownPresetError};
pub use string::{ExcitationShape, PluckedString, StringModel, StringUnit};
pub use tuning::{interval_class, pitch_class_freq, PITCH_CLASS_NAMES};
pub use voice::{Voice, VoiceManager};
pub use waveguide::WaveguideString;
