//! The sympathetic string engine.
//!
//! One [`Engine`] owns the whole signal path: a bank of string units, the
//! coupling matrix, the rigid bridge (waveguide banks), the voice manager,
//! and the output stage. A single real-time thread drives
//! [`process`](Engine::process); parameter changes arrive through the
//! [`ParamHandle`] as atomic snapshots and are applied once per block, at
//! the block boundary.
//!
//! Per-sample data flow:
//!
//! 1. the coupling matrix turns the previous outputs and energies into a
//!    smoothed excitation per string;
//! 2. every string absorbs its excitation and advances one step (waveguide
//!    banks run their oversampled sub-steps with a bridge resolution in
//!    between);
//! 3. the output stage pans, reverberates, warms, and limits the frame.
//!
//! All buffers are allocated at construction; nothing on the processing
//! path allocates, locks, or panics.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bridge::Bridge;
use crate::coupling::CouplingMatrix;
use crate::output::OutputStage;
use crate::params::{EngineParams, ParamHandle};
use crate::string::{ExcitationShape, StringModel, StringUnit};
use crate::voice::VoiceManager;
use crate::waveguide;

/// Static configuration fixed at construction time.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f32,
    /// Number of string units in the bank.
    pub num_strings: usize,
    /// Octave the bank's pitch classes are tuned to.
    pub base_octave: i32,
    /// Physical model for every unit.
    pub model: StringModel,
    /// Excitation shape for plucks (delay-line model).
    pub excitation: ExcitationShape,
    /// Largest block `process` will render.
    pub max_block: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            num_strings: 12,
            base_octave: 3,
            model: StringModel::DelayLine,
            excitation: ExcitationShape::Noise,
            max_block: 4_096,
        }
    }
}

impl EngineConfig {
    /// Sets the sample rate.
    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate.clamp(8_000.0, 192_000.0);
        self
    }

    /// Sets the bank size.
    pub fn with_num_strings(mut self, num_strings: usize) -> Self {
        self.num_strings = num_strings.clamp(1, 64);
        self
    }

    /// Sets the base octave.
    pub fn with_base_octave(mut self, octave: i32) -> Self {
        self.base_octave = octave.clamp(1, 6);
        self
    }

    /// Sets the string model.
    pub fn with_model(mut self, model: StringModel) -> Self {
        self.model = model;
        self
    }

    /// Sets the excitation shape.
    pub fn with_excitation(mut self, excitation: ExcitationShape) -> Self {
        self.excitation = excitation;
        self
    }

    /// Sets the maximum block size.
    pub fn with_max_block(mut self, max_block: usize) -> Self {
        self.max_block = max_block.clamp(16, 65_536);
        self
    }
}

/// The complete engine. See the module docs for the signal path.
pub struct Engine {
    sample_rate: f32,
    model: StringModel,
    strings: Vec<StringUnit>,
    /// Actual current tunings, including voice retunes.
    freqs: Vec<f32>,
    /// Tunings from the last applied snapshot, to detect control retunes.
    applied_tunings: Vec<f32>,
    coupling: CouplingMatrix,
    bridge: Bridge,
    voices: VoiceManager,
    output: OutputStage,
    params: ParamHandle,
    applied_generation: u64,
    sympathy_amount: f32,
    /// Waveguide sub-steps per output sample.
    substeps: u32,
    outputs: Vec<f32>,
    energies: Vec<f32>,
    inject: Vec<f32>,
    wants: Vec<f32>,
    tensions: Vec<f32>,
    out_buf: Vec<f32>,
    max_block: usize,
}

impl Engine {
    /// Builds an engine from a configuration, tuned to the pitch classes of
    /// the configured base octave.
    pub fn new(config: EngineConfig) -> Self {
        let initial = EngineParams::for_bank(config.num_strings, config.base_octave);
        let n = initial.tunings.len();

        let strings: Vec<StringUnit> = initial
            .tunings
            .iter()
            .map(|&f| StringUnit::new(config.model, f, config.sample_rate, config.excitation))
            .collect();
        let freqs: Vec<f32> = strings.iter().map(|s| s.frequency()).collect();

        let mut engine = Self {
            sample_rate: config.sample_rate,
            model: config.model,
            coupling: CouplingMatrix::new(&freqs),
            bridge: Bridge::new(initial.bridge_stiffness),
            voices: VoiceManager::new(n),
            output: OutputStage::new(n, config.sample_rate),
            params: ParamHandle::new(initial.clone()),
            applied_generation: initial.generation,
            sympathy_amount: initial.sympathy_amount,
            substeps: 8,
            outputs: vec![0.0; n],
            energies: vec![0.0; n],
            inject: vec![0.0; n],
            wants: Vec::with_capacity(n),
            tensions: Vec::with_capacity(n),
            out_buf: vec![0.0; 2 * config.max_block],
            max_block: config.max_block,
            applied_tunings: initial.tunings.clone(),
            freqs,
            strings,
        };
        engine.apply_params(&initial);
        log::debug!(
            "engine configured: {} strings, {:?} model, {} Hz",
            n,
            config.model,
            config.sample_rate
        );
        engine
    }

    /// Control-side handle for parameter changes. Cloneable; safe to hand
    /// to another thread.
    pub fn params(&self) -> ParamHandle {
        self.params.clone()
    }

    /// Renders `num_samples` frames and returns them as interleaved stereo.
    ///
    /// Requests beyond the configured maximum block are truncated; the host
    /// owns buffer sizing. Total for any input: every returned sample is
    /// finite and within [-1, 1].
    pub fn process(&mut self, num_samples: usize) -> &[f32] {
        let frames = num_samples.min(self.max_block);
        self.begin_block(frames);
        for i in 0..frames {
            let (l, r) = self.render_sample();
            self.out_buf[2 * i] = l;
            self.out_buf[2 * i + 1] = r;
        }
        &self.out_buf[..2 * frames]
    }

    /// Renders directly into a host-owned interleaved stereo buffer.
    pub fn process_into(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        self.begin_block(frames);
        for frame in out.chunks_exact_mut(2) {
            let (l, r) = self.render_sample();
            frame[0] = l;
            frame[1] = r;
        }
    }

    /// Excites one string. `velocity` and `position` are clamped to 0..1.
    pub fn pluck(&mut self, string_index: usize, velocity: f32, position: f32) {
        if let Some(s) = self.strings.get_mut(string_index) {
            s.pluck(position, velocity);
        }
    }

    /// Excites several strings at once (chords, set classes).
    pub fn pluck_set(&mut self, indices: &[usize], velocity: f32, position: f32) {
        for &i in indices {
            self.pluck(i, velocity, position);
        }
    }

    /// Triggers a note at an arbitrary frequency through the voice manager.
    ///
    /// A free unit is preferred; with the bank full, the quietest active
    /// voice is stolen. The steal retunes and re-plucks in this call, which
    /// sits between processing steps, so a unit is never rebound mid-step.
    /// Returns the unit index used.
    pub fn trigger(&mut self, frequency: f32, velocity: f32, position: f32) -> usize {
        let index = self.voices.select(&self.strings);
        let frequency = frequency.clamp(20.0, 5_000.0);
        let s = &mut self.strings[index];
        s.set_damp_boost(0.0);
        s.set_frequency(frequency);
        s.pluck(position, velocity);
        self.freqs[index] = self.strings[index].frequency();
        self.coupling.retune(index, &self.freqs);
        self.refresh_oversample();
        self.voices
            .bind(index, self.freqs[index], velocity.clamp(0.0, 1.0));
        index
    }

    /// Releases every voice near `frequency`: damping ramps in and the
    /// voice expires once its string decays to silence.
    pub fn release(&mut self, frequency: f32) {
        self.voices.release(frequency, &mut self.strings);
    }

    /// Ramps damping in on the whole bank.
    pub fn damp_all(&mut self) {
        self.voices.release_all(&mut self.strings);
        for s in &mut self.strings {
            s.set_damp_boost(1.0);
        }
    }

    /// Returns the engine to rest: silent strings, cleared reverb tails and
    /// coupling state, no active voices.
    pub fn reset(&mut self) {
        for s in &mut self.strings {
            s.reset();
        }
        self.coupling.clear();
        self.bridge.reset();
        self.output.clear();
        self.voices.clear();
        self.outputs.fill(0.0);
        self.energies.fill(0.0);
        self.inject.fill(0.0);
    }

    // ------------------------------------------------------------------
    // Diagnostics (read-only, for external rendering)
    // ------------------------------------------------------------------

    /// Current per-string energy estimates.
    pub fn string_energies(&self) -> Vec<f32> {
        self.energies.clone()
    }

    /// Current per-string tunings in Hz.
    pub fn string_frequencies(&self) -> Vec<f32> {
        self.freqs.clone()
    }

    /// Flattened row-major copy of the coupling matrix.
    pub fn coupling_matrix(&self) -> Vec<f32> {
        self.coupling.matrix()
    }

    /// A short waveform window for one string.
    pub fn waveform(&self, string_index: usize, count: usize) -> Vec<f32> {
        let mut out = Vec::new();
        if let Some(s) = self.strings.get(string_index) {
            s.waveform(count, &mut out);
        }
        out
    }

    /// Number of active voices.
    pub fn active_voices(&self) -> usize {
        self.voices.active_count()
    }

    /// Current bridge displacement (waveguide banks).
    pub fn bridge_displacement(&self) -> f32 {
        self.bridge.displacement()
    }

    /// Configured sample rate.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Bank size.
    pub fn num_strings(&self) -> usize {
        self.strings.len()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn begin_block(&mut self, frames: usize) {
        let snapshot = self.params.snapshot();
        if snapshot.generation != self.applied_generation {
            self.apply_params(&snapshot);
            self.applied_generation = snapshot.generation;
        }
        self.voices.update(&mut self.strings, frames as u64);
        // Strings damped to silence (damp_all without a voice binding) get
        // their ramp target cleared so they can resonate again.
        for (i, s) in self.strings.iter_mut().enumerate() {
            if self.energies[i] < 1e-4 {
                s.set_damp_boost(0.0);
            }
        }
    }

    fn apply_params(&mut self, p: &EngineParams) {
        for i in 0..self.strings.len() {
            let target = match p.tunings.get(i) {
                Some(&t) => t,
                None => continue,
            };
            if (target - self.applied_tunings[i]).abs() > 1e-3 {
                self.strings[i].set_frequency(target);
                self.freqs[i] = self.strings[i].frequency();
                self.applied_tunings[i] = target;
            }
        }

        self.coupling.set_interval_weights(p.interval_weights, &self.freqs);
        self.coupling.set_gate_threshold(p.gate_threshold);
        self.coupling.set_decay(p.excitation_decay);
        self.coupling.set_scale(p.coupling_scale);
        self.sympathy_amount = p.sympathy_amount;

        for s in &mut self.strings {
            s.set_damping(p.damping);
            s.set_brightness(p.brightness);
        }

        self.bridge.set_stiffness(p.bridge_stiffness);
        self.output.set_master_volume(p.master_volume);
        self.output.set_reverb_mix(p.reverb_mix);
        self.output.set_warmth(p.warmth);
        self.output.reverb_mut().set_room_size(p.reverb_size);
        self.output.reverb_mut().set_damping(p.reverb_damping);

        self.refresh_oversample();
        log::debug!("applied parameter snapshot generation {}", p.generation);
    }

    fn refresh_oversample(&mut self) {
        if self.model != StringModel::Waveguide {
            return;
        }
        let max_freq = self.freqs.iter().copied().fold(0.0, f32::max);
        self.substeps = waveguide::required_oversample(max_freq, self.sample_rate);
        for s in &mut self.strings {
            if let Some(w) = s.as_waveguide_mut() {
                w.set_oversample(self.substeps);
            }
        }
    }

    #[inline]
    fn render_sample(&mut self) -> (f32, f32) {
        self.coupling.process(
            &self.outputs,
            &self.energies,
            self.sympathy_amount,
            &mut self.inject,
        );

        match self.model {
            StringModel::DelayLine => {
                for i in 0..self.strings.len() {
                    let s = &mut self.strings[i];
                    s.inject(self.inject[i]);
                    let y = s.advance();
                    self.outputs[i] = if y.is_finite() { y } else { 0.0 };
                    self.energies[i] = s.energy();
                }
            }
            StringModel::Waveguide => {
                for i in 0..self.strings.len() {
                    let s = &mut self.strings[i];
                    s.inject(self.inject[i]);
                    if let Some(w) = s.as_waveguide_mut() {
                        w.begin_output_step();
                    }
                }
                let dt = 1.0 / (self.sample_rate * self.substeps as f32);
                for _ in 0..self.substeps {
                    self.wants.clear();
                    self.tensions.clear();
                    for s in &mut self.strings {
                        if let Some(w) = s.as_waveguide_mut() {
                            w.sub_step();
                            self.wants.push(w.bridge_want());
                            self.tensions.push(w.tension());
                        }
                    }
                    let resolved = self.bridge.resolve(&self.wants, &self.tensions, dt);
                    for s in &mut self.strings {
                        if let Some(w) = s.as_waveguide_mut() {
                            w.commit_substep(resolved);
                        }
                    }
                }
                for i in 0..self.strings.len() {
                    if let Some(w) = self.strings[i].as_waveguide_mut() {
                        let y = w.finish_output_step();
                        self.outputs[i] = if y.is_finite() { y } else { 0.0 };
                        self.energies[i] = w.energy();
                    }
                }
            }
        }

        self.output.mix(&self.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    #[test]
    fn test_process_returns_interleaved_block() {
        let mut e = engine();
        let out = e.process(128);
        assert_eq!(out.len(), 256);
    }

    #[test]
    fn test_oversized_request_truncated() {
        let mut e = Engine::new(EngineConfig::default().with_max_block(256));
        let out = e.process(100_000);
        assert_eq!(out.len(), 512);
    }

    #[test]
    fn test_silence_in_silence_out() {
        let mut e = engine();
        let out = e.process(512);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_output_bounded_and_finite() {
        let mut e = engine();
        e.params().set_master_volume(1.0);
        let all: Vec<usize> = (0..12).collect();
        e.pluck_set(&all, 1.0, 0.5);
        for _ in 0..100 {
            for &x in e.process(441) {
                assert!(x.is_finite());
                assert!(x.abs() <= 1.0 + 1e-6);
            }
        }
    }

    #[test]
    fn test_sympathetic_fifth_scenario() {
        // Pluck C; the string a perfect fifth away must be ringing within
        // 50 ms, and the minor-second neighbor must receive strictly less.
        let mut e = engine();
        e.params().set_sympathy_amount(0.5);
        e.pluck(0, 0.8, 0.5);
        e.process(2_205);
        let energies = e.string_energies();
        assert!(energies[7] > 0.0, "fifth must be energized within 50 ms");
        assert!(
            energies[7] > energies[1],
            "fifth ({}) must outpace minor second ({})",
            energies[7],
            energies[1]
        );
    }

    #[test]
    fn test_no_sympathy_no_transfer() {
        let mut e = engine();
        e.params().set_sympathy_amount(0.0);
        e.pluck(0, 0.8, 0.5);
        e.process(4_410);
        let energies = e.string_energies();
        assert_eq!(energies[7], 0.0);
    }

    #[test]
    fn test_params_apply_at_block_boundary() {
        let mut e = engine();
        e.pluck(0, 1.0, 0.5);
        e.process(64);
        e.params().set_master_volume(0.0);
        let out: Vec<f32> = e.process(512).to_vec();
        assert!(out.iter().all(|&x| x == 0.0), "muted block must be silent");
    }

    #[test]
    fn test_preset_changes_sound_atomically() {
        let mut e = engine();
        e.params().apply_preset(crate::preset::Preset::Pad);
        e.pluck(0, 0.8, 0.5);
        let out = e.process(1_024);
        assert!(out.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_retune_through_params_is_applied() {
        let mut e = engine();
        e.params().set_string_frequency(0, 300.0);
        e.process(64);
        assert!((e.string_frequencies()[0] - 300.0).abs() < 1.0);
    }

    #[test]
    fn test_trigger_uses_free_then_steals_quietest() {
        let mut e = Engine::new(EngineConfig::default().with_num_strings(3));
        let a = e.trigger(220.0, 0.9, 0.5);
        let b = e.trigger(330.0, 0.9, 0.5);
        let c = e.trigger(440.0, 0.9, 0.5);
        assert_eq!(e.active_voices(), 3);
        assert_ne!(a, b);
        assert_ne!(b, c);

        // Let one voice decay, then run out of units: that one is stolen.
        e.release(330.0);
        e.process(4_096);
        let stolen = e.trigger(550.0, 0.9, 0.5);
        assert_eq!(e.active_voices(), 3);
        assert_eq!(stolen, b, "the quietest (released) voice is stolen");
    }

    #[test]
    fn test_release_decays_faster_than_sustain() {
        let mut e = engine();
        let idx = e.trigger(261.63, 0.9, 0.5);
        e.process(1_024);
        let held = e.string_energies()[idx];
        e.release(261.63);
        for _ in 0..20 {
            e.process(4_096);
        }
        let released = e.string_energies()[idx];
        assert!(released < held * 0.1, "release must accelerate decay");
    }

    #[test]
    fn test_damp_all_quiets_bank() {
        let mut e = engine();
        let all: Vec<usize> = (0..12).collect();
        e.pluck_set(&all, 0.9, 0.5);
        e.process(512);
        e.damp_all();
        for _ in 0..30 {
            e.process(4_096);
        }
        assert!(e.string_energies().iter().all(|&x| x < 0.01));
    }

    #[test]
    fn test_reset_returns_to_rest() {
        let mut e = engine();
        e.pluck_set(&[0, 4, 7], 1.0, 0.5);
        e.process(2_048);
        e.reset();
        assert!(e.string_energies().iter().all(|&x| x == 0.0));
        assert_eq!(e.active_voices(), 0);
        let out = e.process(512);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_diagnostics_shapes() {
        let mut e = engine();
        e.pluck(3, 0.8, 0.5);
        e.process(256);
        assert_eq!(e.string_energies().len(), 12);
        assert_eq!(e.coupling_matrix().len(), 144);
        assert_eq!(e.string_frequencies().len(), 12);
        let wave = e.waveform(3, 64);
        assert!(!wave.is_empty());
        assert!(wave.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_waveguide_bank_bridge_constraint() {
        let mut e = Engine::new(
            EngineConfig::default()
                .with_model(StringModel::Waveguide)
                .with_num_strings(4),
        );
        e.pluck(0, 0.8, 0.5);
        e.process(441);
        let bridge = e.bridge_displacement();
        for s in &e.strings {
            let w = s.as_waveguide().unwrap();
            assert_eq!(
                w.boundary(),
                bridge,
                "all strings must share the bridge displacement"
            );
        }
    }

    #[test]
    fn test_waveguide_bank_transfers_energy() {
        let mut e = Engine::new(
            EngineConfig::default()
                .with_model(StringModel::Waveguide)
                .with_num_strings(4),
        );
        e.params().set_sympathy_amount(0.0); // bridge-only transfer
        e.pluck(0, 0.8, 0.5);
        e.process(4_410);
        let energies = e.string_energies();
        assert!(
            energies[1..].iter().any(|&x| x > 0.0),
            "the bridge alone must move energy between strings"
        );
    }

    #[test]
    fn test_waveguide_bank_stable_and_bounded() {
        let mut e = Engine::new(
            EngineConfig::default()
                .with_model(StringModel::Waveguide)
                .with_num_strings(4),
        );
        let all: Vec<usize> = (0..4).collect();
        e.pluck_set(&all, 1.0, 0.3);
        for _ in 0..20 {
            for &x in e.process(2_205) {
                assert!(x.is_finite());
                assert!(x.abs() <= 1.0 + 1e-6);
            }
        }
    }

    #[test]
    fn test_extreme_params_degrade_gracefully() {
        let mut e = engine();
        let h = e.params();
        h.set_damping(99.0);
        h.set_sympathy_amount(1.0);
        h.set_coupling_scale(1.0);
        h.set_gate_threshold(0.0);
        h.set_reverb_size(1.0);
        e.pluck_set(&(0..12).collect::<Vec<_>>(), 1.0, 0.5);
        for _ in 0..50 {
            for &x in e.process(2_048) {
                assert!(x.is_finite());
                assert!(x.abs() <= 1.0 + 1e-6);
            }
        }
    }
}
