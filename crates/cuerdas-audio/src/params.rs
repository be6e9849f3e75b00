//! Engine parameters as atomically-swapped snapshots.
//!
//! The audio thread never shares mutable parameter state with the control
//! thread. Controls mutate by building a new [`EngineParams`] and swapping
//! it in; the engine loads the current snapshot once at the start of each
//! block and applies it at that boundary, so a block never sees a torn
//! half-update.
//!
//! Every setter clamps out-of-range input instead of rejecting it: the
//! engine must keep producing audio no matter what a UI sends.

use std::sync::Arc;

use arc_swap::ArcSwap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::coupling::DEFAULT_INTERVAL_WEIGHTS;
use crate::preset::Preset;
use crate::tuning::pitch_class_freq;

/// One immutable bundle of every engine control.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineParams {
    /// Master volume (0..1).
    pub master_volume: f32,
    /// Global sympathetic resonance amount (0..1).
    pub sympathy_amount: f32,
    /// Base coupling strength before the sympathy amount (0.001..0.2).
    pub coupling_scale: f32,
    /// Minimum source energy before it excites others (0..0.1).
    pub gate_threshold: f32,
    /// EMA decay of injected excitation (0.5..0.999).
    pub excitation_decay: f32,
    /// Sustain (0.9..0.9999); higher keeps strings ringing longer.
    pub damping: f32,
    /// Brightness of the string loss filter (0..1).
    pub brightness: f32,
    /// Output warmth / soft saturation (0..1).
    pub warmth: f32,
    /// Reverb send level (0..1).
    pub reverb_mix: f32,
    /// Reverb room size (0..1).
    pub reverb_size: f32,
    /// Reverb high-frequency damping (0..1).
    pub reverb_damping: f32,
    /// Bridge stiffness for the waveguide bank (0..1).
    pub bridge_stiffness: f32,
    /// Coupling weight per interval class (unison..major seventh).
    pub interval_weights: [f32; 12],
    /// Per-string tuning in Hz.
    pub tunings: Vec<f32>,
    /// Bumped on every change; the engine applies a snapshot once.
    pub generation: u64,
}

impl EngineParams {
    /// Default parameters for a bank tuned to the twelve pitch classes of
    /// `base_octave`.
    pub fn for_bank(num_strings: usize, base_octave: i32) -> Self {
        let tunings = (0..num_strings)
            .map(|i| pitch_class_freq(i % 12, base_octave + (i / 12) as i32))
            .collect();
        Self {
            master_volume: 0.7,
            sympathy_amount: 0.4,
            coupling_scale: 0.02,
            gate_threshold: 0.01,
            excitation_decay: 0.9,
            damping: 0.998,
            brightness: 0.5,
            warmth: 0.0,
            reverb_mix: 0.25,
            reverb_size: 0.5,
            reverb_damping: 0.5,
            bridge_stiffness: 1.0,
            interval_weights: DEFAULT_INTERVAL_WEIGHTS,
            tunings,
            generation: 0,
        }
    }
}

/// Control-side handle to the shared parameter snapshot.
///
/// Cloneable and cheap; every setter is a read-copy-update on the shared
/// snapshot. Safe to call from any thread.
#[derive(Clone)]
pub struct ParamHandle {
    pub(crate) shared: Arc<ArcSwap<EngineParams>>,
}

impl ParamHandle {
    /// Wraps an initial snapshot.
    pub fn new(initial: EngineParams) -> Self {
        Self {
            shared: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<EngineParams> {
        self.shared.load_full()
    }

    fn update(&self, mutate: impl Fn(&mut EngineParams)) {
        self.shared.rcu(|current| {
            let mut next = (**current).clone();
            mutate(&mut next);
            next.generation = next.generation.wrapping_add(1);
            next
        });
    }

    /// Sets the master volume (clamped to 0..1).
    pub fn set_master_volume(&self, volume: f32) {
        self.update(|p| p.master_volume = volume.clamp(0.0, 1.0));
    }

    /// Sets the global sympathetic resonance amount (clamped to 0..1).
    pub fn set_sympathy_amount(&self, amount: f32) {
        self.update(|p| p.sympathy_amount = amount.clamp(0.0, 1.0));
    }

    /// Sets the base coupling strength (clamped to 0.001..0.2).
    pub fn set_coupling_scale(&self, scale: f32) {
        self.update(|p| p.coupling_scale = scale.clamp(0.001, 0.2));
    }

    /// Sets the coupling energy gate (clamped to 0..0.1).
    pub fn set_gate_threshold(&self, threshold: f32) {
        self.update(|p| p.gate_threshold = threshold.clamp(0.0, 0.1));
    }

    /// Sets the excitation smoothing decay (clamped to 0.5..0.999).
    pub fn set_excitation_decay(&self, decay: f32) {
        self.update(|p| p.excitation_decay = decay.clamp(0.5, 0.999));
    }

    /// Sets global sustain (clamped to 0.9..0.9999).
    pub fn set_damping(&self, damping: f32) {
        self.update(|p| p.damping = damping.clamp(0.9, 0.9999));
    }

    /// Sets global brightness (clamped to 0..1).
    pub fn set_brightness(&self, brightness: f32) {
        self.update(|p| p.brightness = brightness.clamp(0.0, 1.0));
    }

    /// Sets output warmth (clamped to 0..1).
    pub fn set_warmth(&self, warmth: f32) {
        self.update(|p| p.warmth = warmth.clamp(0.0, 1.0));
    }

    /// Sets the reverb send level (clamped to 0..1).
    pub fn set_reverb_mix(&self, mix: f32) {
        self.update(|p| p.reverb_mix = mix.clamp(0.0, 1.0));
    }

    /// Sets the reverb room size (clamped to 0..1).
    pub fn set_reverb_size(&self, size: f32) {
        self.update(|p| p.reverb_size = size.clamp(0.0, 1.0));
    }

    /// Sets reverb damping (clamped to 0..1).
    pub fn set_reverb_damping(&self, damping: f32) {
        self.update(|p| p.reverb_damping = damping.clamp(0.0, 1.0));
    }

    /// Sets bridge stiffness (clamped to 0..1).
    pub fn set_bridge_stiffness(&self, stiffness: f32) {
        self.update(|p| p.bridge_stiffness = stiffness.clamp(0.0, 1.0));
    }

    /// Sets the coupling weight for one interval class (clamped to 0..1).
    pub fn set_interval_weight(&self, interval: usize, weight: f32) {
        if interval >= 12 {
            return;
        }
        self.update(|p| p.interval_weights[interval] = weight.clamp(0.0, 1.0));
    }

    /// Retunes one string (clamped to 20 Hz..10 kHz).
    pub fn set_string_frequency(&self, index: usize, frequency: f32) {
        self.update(|p| {
            if let Some(t) = p.tunings.get_mut(index) {
                *t = frequency.clamp(20.0, 10_000.0);
            }
        });
    }

    /// Retunes the whole bank to pitch classes of `octave` (clamped 1..6).
    pub fn set_base_octave(&self, octave: i32) {
        let octave = octave.clamp(1, 6);
        self.update(|p| {
            for (i, t) in p.tunings.iter_mut().enumerate() {
                *t = pitch_class_freq(i % 12, octave + (i / 12) as i32);
            }
        });
    }

    /// Applies a named preset as one atomic swap.
    pub fn apply_preset(&self, preset: Preset) {
        log::debug!("applying preset {}", preset.name());
        self.update(|p| preset.apply(p));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_clamp() {
        let h = ParamHandle::new(EngineParams::for_bank(12, 3));
        h.set_master_volume(7.0);
        h.set_sympathy_amount(-3.0);
        h.set_damping(0.2);
        let p = h.snapshot();
        assert_eq!(p.master_volume, 1.0);
        assert_eq!(p.sympathy_amount, 0.0);
        assert_eq!(p.damping, 0.9);
    }

    #[test]
    fn test_generation_bumps_per_change() {
        let h = ParamHandle::new(EngineParams::for_bank(12, 3));
        let g0 = h.snapshot().generation;
        h.set_warmth(0.3);
        h.set_reverb_mix(0.5);
        assert_eq!(h.snapshot().generation, g0 + 2);
    }

    #[test]
    fn test_snapshots_are_isolated() {
        let h = ParamHandle::new(EngineParams::for_bank(12, 3));
        let before = h.snapshot();
        h.set_master_volume(0.1);
        // The previously loaded snapshot is untouched.
        assert_eq!(before.master_volume, 0.7);
        assert_eq!(h.snapshot().master_volume, 0.1);
    }

    #[test]
    fn test_string_frequency_out_of_bank_ignored() {
        let h = ParamHandle::new(EngineParams::for_bank(4, 3));
        h.set_string_frequency(17, 440.0);
        assert_eq!(h.snapshot().tunings.len(), 4);
    }

    #[test]
    fn test_base_octave_retunes_bank() {
        let h = ParamHandle::new(EngineParams::for_bank(12, 3));
        let c3 = h.snapshot().tunings[0];
        h.set_base_octave(4);
        let c4 = h.snapshot().tunings[0];
        assert!((c4 / c3 - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_for_bank_extends_past_octave() {
        let p = EngineParams::for_bank(13, 3);
        // The 13th string wraps to the next octave's C.
        assert!((p.tunings[12] / p.tunings[0] - 2.0).abs() < 1e-3);
    }
}
