//! Voice allocation over the string bank.
//!
//! A voice is a transient binding between a requested pitch and one string
//! unit. At most one binding exists per unit. When no unit is free the
//! quietest active voice is stolen: its unit is retuned and re-plucked in
//! the same call, between processing steps, so a steal can never happen
//! mid-step.
//!
//! Release does not silence a string; it ramps extra damping in so the note
//! decays quickly but without a discontinuity. A binding expires (and its
//! unit returns to the pool) once the unit's energy falls below a floor.

use crate::string::StringUnit;

/// Energy below which a releasing voice is considered finished.
const EXPIRE_THRESHOLD: f32 = 1e-3;

/// Frequencies within this many cents count as the same pitch on release.
const RELEASE_TOLERANCE_CENTS: f32 = 5.0;

/// An active pitch binding.
#[derive(Debug, Clone, Copy)]
pub struct Voice {
    /// Frequency the voice was triggered at.
    pub frequency: f32,
    /// Trigger velocity (0..1).
    pub velocity: f32,
    /// Samples since the trigger.
    pub age: u64,
    /// Whether release damping has been applied.
    pub releasing: bool,
}

/// Allocates string units to pitch requests.
#[derive(Debug, Clone)]
pub struct VoiceManager {
    bindings: Vec<Option<Voice>>,
}

impl VoiceManager {
    /// Creates a manager for a bank of `num_strings` units.
    pub fn new(num_strings: usize) -> Self {
        Self {
            bindings: vec![None; num_strings],
        }
    }

    /// Picks the unit for a new note: the first free unit, else the
    /// quietest active one (lowest current energy).
    pub fn select(&self, strings: &[StringUnit]) -> usize {
        for (i, binding) in self.bindings.iter().enumerate() {
            if binding.is_none() {
                return i;
            }
        }
        let mut quietest = 0;
        let mut min_energy = f32::INFINITY;
        for (i, s) in strings.iter().enumerate() {
            let e = s.energy();
            if e < min_energy {
                min_energy = e;
                quietest = i;
            }
        }
        quietest
    }

    /// Records a binding for a freshly triggered unit.
    pub fn bind(&mut self, index: usize, frequency: f32, velocity: f32) {
        if let Some(slot) = self.bindings.get_mut(index) {
            *slot = Some(Voice {
                frequency,
                velocity,
                age: 0,
                releasing: false,
            });
        }
    }

    /// Starts release on every voice bound near `frequency`, ramping
    /// damping in on the affected units.
    pub fn release(&mut self, frequency: f32, strings: &mut [StringUnit]) {
        for (i, binding) in self.bindings.iter_mut().enumerate() {
            if let Some(voice) = binding {
                let cents = 1_200.0 * (voice.frequency / frequency).log2().abs();
                if cents <= RELEASE_TOLERANCE_CENTS && !voice.releasing {
                    voice.releasing = true;
                    strings[i].set_damp_boost(1.0);
                }
            }
        }
    }

    /// Starts release on every active voice.
    pub fn release_all(&mut self, strings: &mut [StringUnit]) {
        for (i, binding) in self.bindings.iter_mut().enumerate() {
            if let Some(voice) = binding {
                voice.releasing = true;
                strings[i].set_damp_boost(1.0);
            }
        }
    }

    /// Advances voice ages and expires releasing voices whose unit has
    /// decayed to silence. Called once per processed block.
    pub fn update(&mut self, strings: &mut [StringUnit], block_samples: u64) {
        for (i, binding) in self.bindings.iter_mut().enumerate() {
            if let Some(voice) = binding {
                voice.age += block_samples;
                if voice.releasing && strings[i].energy() < EXPIRE_THRESHOLD {
                    strings[i].set_damp_boost(0.0);
                    *binding = None;
                }
            }
        }
    }

    /// Clears a binding without touching the string.
    pub fn unbind(&mut self, index: usize) {
        if let Some(slot) = self.bindings.get_mut(index) {
            *slot = None;
        }
    }

    /// Number of active voices.
    pub fn active_count(&self) -> usize {
        self.bindings.iter().filter(|b| b.is_some()).count()
    }

    /// The voice bound to a unit, if any.
    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.bindings.get(index).and_then(|b| b.as_ref())
    }

    /// Drops every binding.
    pub fn clear(&mut self) {
        self.bindings.fill(None);
    }
}
