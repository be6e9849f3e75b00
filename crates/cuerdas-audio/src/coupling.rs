//! Sympathetic coupling between strings.
//!
//! An NxN gain table maps every string's output into small excitations for
//! every other string, weighted by the musical interval between their
//! tunings: consonant intervals (octave, fifth, fourth) couple strongly,
//! dissonant ones barely at all.
//!
//! Three guards keep the loop from running away:
//!
//! - a source only injects when its own energy clears a gate, so the
//!   floating-point noise floor is never amplified back into audibility;
//! - injected values are smoothed with an exponential moving average,
//!   modeling the finite mechanical bandwidth of a real bridge;
//! - the smoothed value is clamped to a small fixed range before a target
//!   string ever sees it.

use crate::tuning::interval_class;

/// Default interval-class weights, unison through major seventh.
pub const DEFAULT_INTERVAL_WEIGHTS: [f32; 12] = [
    1.0,  // unison
    0.08, // minor second
    0.20, // major second
    0.35, // minor third
    0.40, // major third
    0.55, // perfect fourth
    0.15, // tritone
    0.70, // perfect fifth
    0.35, // minor sixth
    0.30, // major sixth
    0.15, // minor seventh
    0.18, // major seventh
];

/// Largest per-step excitation a target string can receive.
const INJECTION_CLAMP: f32 = 0.1;

/// Interval-weighted coupling matrix with gating and smoothing state.
#[derive(Debug, Clone)]
pub struct CouplingMatrix {
    n: usize,
    /// Row-major gains, `weights[source * n + target]`.
    weights: Vec<f32>,
    interval_weights: [f32; 12],
    /// Smoothed excitation per target.
    accum: Vec<f32>,
    gate_threshold: f32,
    /// EMA decay factor; higher = slower buildup and release.
    decay: f32,
    scale: f32,
}

impl CouplingMatrix {
    /// Builds a matrix for the given string tunings with default weights.
    pub fn new(frequencies: &[f32]) -> Self {
        let n = frequencies.len();
        let mut m = Self {
            n,
            weights: vec![0.0; n * n],
            interval_weights: DEFAULT_INTERVAL_WEIGHTS,
            accum: vec![0.0; n],
            gate_threshold: 0.01,
            decay: 0.9,
            scale: 0.02,
        };
        m.rebuild(frequencies);
        m
    }

    /// Replaces the interval-class weight table and rebuilds all gains.
    pub fn set_interval_weights(&mut self, weights: [f32; 12], frequencies: &[f32]) {
        self.interval_weights = weights.map(|w| w.clamp(0.0, 1.0));
        self.rebuild(frequencies);
    }

    /// Recomputes every entry from the current tunings.
    pub fn rebuild(&mut self, frequencies: &[f32]) {
        for source in 0..self.n {
            for target in 0..self.n {
                self.weights[source * self.n + target] =
                    self.gain_for(frequencies, source, target);
            }
        }
    }

    /// Recomputes the row and column touched by retuning one string.
    pub fn retune(&mut self, index: usize, frequencies: &[f32]) {
        if index >= self.n {
            return;
        }
        for other in 0..self.n {
            self.weights[index * self.n + other] = self.gain_for(frequencies, index, other);
            self.weights[other * self.n + index] = self.gain_for(frequencies, other, index);
        }
    }

    fn gain_for(&self, frequencies: &[f32], source: usize, target: usize) -> f32 {
        let ic = interval_class(frequencies[source], frequencies[target]);
        self.interval_weights[ic]
    }

    /// Minimum source energy required before it may excite others.
    pub fn set_gate_threshold(&mut self, threshold: f32) {
        self.gate_threshold = threshold.clamp(0.0, 0.1);
    }

    /// EMA decay of the smoothed excitation (0.5..0.999).
    pub fn set_decay(&mut self, decay: f32) {
        self.decay = decay.clamp(0.5, 0.999);
    }

    /// Base coupling strength before the global sympathy amount.
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale.clamp(0.001, 0.2);
    }

    /// Computes the smoothed, clamped excitation for every string.
    ///
    /// `outputs` and `energies` are the current per-string output samples
    /// and energy estimates; the result is written into `into`. A string
    /// never couples to itself, and a gated source contributes nothing.
    pub fn process(&mut self, outputs: &[f32], energies: &[f32], amount: f32, into: &mut [f32]) {
        debug_assert_eq!(outputs.len(), self.n);
        debug_assert_eq!(into.len(), self.n);

        into.fill(0.0);
        let scale = amount.clamp(0.0, 1.0) * self.scale;

        for source in 0..self.n {
            if energies[source] < self.gate_threshold {
                continue;
            }
            let signal = outputs[source];
            let row = &self.weights[source * self.n..(source + 1) * self.n];
            for (target, &gain) in row.iter().enumerate() {
                if source != target {
                    into[target] += signal * gain * scale;
                }
            }
        }

        let blend = 1.0 - self.decay;
        for target in 0..self.n {
            self.accum[target] = self.accum[target] * self.decay + into[target] * blend;
            let mut v = self.accum[target];
            if !v.is_finite() {
                v = 0.0;
                self.accum[target] = 0.0;
            }
            into[target] = v.clamp(-INJECTION_CLAMP, INJECTION_CLAMP);
        }
    }

    /// Flattened row-major copy of the gain table, for visualization.
    pub fn matrix(&self) -> Vec<f32> {
        self.weights.clone()
    }

    /// Direct gain from `source` to `target`.
    pub fn gain(&self, source: usize, target: usize) -> f32 {
        self.weights[source * self.n + target]
    }

    /// Clears the smoothing state.
    pub fn clear(&mut self) {
        self.accum.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::pitch_class_freq;

    fn chromatic_bank() -> Vec<f32> {
        (0..12).map(|pc| pitch_class_freq(pc, 3)).collect()
    }

    #[test]
    fn test_gate_blocks_quiet_source() {
        let freqs = chromatic_bank();
        let mut m = CouplingMatrix::new(&freqs);
        // Source at full output but with energy below the gate.
        let mut outputs = vec![0.0; 12];
        outputs[0] = 1.0;
        let energies = vec![0.005; 12];
        let mut inject = vec![0.0; 12];
        for _ in 0..100 {
            m.process(&outputs, &energies, 1.0, &mut inject);
        }
        assert!(
            inject.iter().all(|&x| x == 0.0),
            "gated source must inject nothing"
        );
    }

    #[test]
    fn test_gate_blocks_even_with_max_weight() {
        let freqs = chromatic_bank();
        let mut m = CouplingMatrix::new(&freqs);
        m.set_interval_weights([1.0; 12], &freqs);
        let mut outputs = vec![0.0; 12];
        outputs[0] = 1.0;
        let energies = vec![0.0; 12];
        let mut inject = vec![0.0; 12];
        m.process(&outputs, &energies, 1.0, &mut inject);
        assert!(inject.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_fifth_couples_stronger_than_minor_second() {
        let freqs = chromatic_bank();
        let mut m = CouplingMatrix::new(&freqs);
        let mut outputs = vec![0.0; 12];
        outputs[0] = 0.8;
        let mut energies = vec![0.0; 12];
        energies[0] = 0.5;
        let mut inject = vec![0.0; 12];
        // Let the EMA settle.
        for _ in 0..200 {
            m.process(&outputs, &energies, 0.5, &mut inject);
        }
        assert!(inject[7].abs() > 0.0, "fifth must receive energy");
        assert!(
            inject[7].abs() > inject[1].abs(),
            "fifth ({}) must outweigh minor second ({})",
            inject[7],
            inject[1]
        );
    }

    #[test]
    fn test_no_self_coupling() {
        let freqs = chromatic_bank();
        let mut m = CouplingMatrix::new(&freqs);
        let mut outputs = vec![0.0; 12];
        outputs[3] = 1.0;
        let mut energies = vec![0.0; 12];
        energies[3] = 1.0;
        let mut inject = vec![0.0; 12];
        for _ in 0..100 {
            m.process(&outputs, &energies, 1.0, &mut inject);
        }
        assert_eq!(inject[3], 0.0, "a string never couples to itself");
    }

    #[test]
    fn test_injection_clamped() {
        let freqs = chromatic_bank();
        let mut m = CouplingMatrix::new(&freqs);
        m.set_scale(0.2);
        let outputs = vec![1.0; 12];
        let energies = vec![1.0; 12];
        let mut inject = vec![0.0; 12];
        for _ in 0..1_000 {
            m.process(&outputs, &energies, 1.0, &mut inject);
        }
        for &x in &inject {
            assert!(x.abs() <= INJECTION_CLAMP + f32::EPSILON);
        }
    }

    #[test]
    fn test_smoothing_ramps_injection() {
        let freqs = chromatic_bank();
        let mut m = CouplingMatrix::new(&freqs);
        let mut outputs = vec![0.0; 12];
        outputs[0] = 0.8;
        let mut energies = vec![0.0; 12];
        energies[0] = 0.5;
        let mut inject = vec![0.0; 12];
        m.process(&outputs, &energies, 1.0, &mut inject);
        let first = inject[7].abs();
        for _ in 0..100 {
            m.process(&outputs, &energies, 1.0, &mut inject);
        }
        let settled = inject[7].abs();
        assert!(
            first < settled,
            "smoothed injection should build up, not step: {first} vs {settled}"
        );
    }

    #[test]
    fn test_retune_updates_row_and_column() {
        let mut freqs = chromatic_bank();
        let mut m = CouplingMatrix::new(&freqs);
        let before = m.gain(0, 1);
        // Retune string 1 from C# up to G: now a fifth from string 0.
        freqs[1] = pitch_class_freq(7, 3);
        m.retune(1, &freqs);
        assert!(m.gain(0, 1) > before);
        assert!((m.gain(0, 1) - DEFAULT_INTERVAL_WEIGHTS[7]).abs() < 1e-6);
        assert!((m.gain(1, 0) - DEFAULT_INTERVAL_WEIGHTS[5]).abs() < 1e-6);
    }
}
