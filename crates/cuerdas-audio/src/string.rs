//! String units: the vibrating elements of the engine.
//!
//! Two physical models implement the same contract (pluck, inject, advance,
//! energy, retune, reset) and are selected at construction:
//!
//! - [`PluckedString`]: delay-line (Karplus-Strong) model. Cheap, bright,
//!   the default for full banks.
//! - [`crate::waveguide::WaveguideString`]: explicit finite-difference wave
//!   equation with a shared rigid bridge, for physically coupled banks.
//!
//! [`StringUnit`] is the tagged wrapper the engine stores; the variant never
//! changes after construction.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::filter::{OnePole, ThiranAllpass};
use crate::primitive::{DelayLine, Lcg, Smoother};
use crate::waveguide::WaveguideString;

/// Delay line capacity; supports fundamentals down to ~11 Hz at 44.1 kHz.
const MAX_DELAY: usize = 4096;

/// Per-sample coefficient for the release damping ramp (~10 ms at 44.1 kHz).
const DAMP_RAMP: f32 = 0.002;

/// How much a full damping boost shortens the feedback gain.
const DAMP_BOOST_DEPTH: f32 = 0.05;

/// Which physical model a string unit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StringModel {
    /// Delay-line (Karplus-Strong) model.
    #[default]
    DelayLine,
    /// Finite-difference wave equation with a shared rigid bridge.
    Waveguide,
}

/// Shape of the excitation burst loaded on a pluck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExcitationShape {
    /// Broadband noise, comb-filtered at the pluck position.
    #[default]
    Noise,
    /// Triangular ramp peaked at the pluck position.
    Triangle,
}

/// Delay-line string model.
///
/// A circular buffer one period long recirculates through a one-pole loss
/// filter and a feedback gain below unity. Sympathetic energy is added to
/// the newly written sample, so injection shapes future periods rather than
/// the instantaneous tap.
#[derive(Debug, Clone)]
pub struct PluckedString {
    delay: DelayLine,
    delay_len: usize,
    frequency: f32,
    sample_rate: f32,
    /// Feedback gain; below 1 so the loop always loses energy.
    feedback: f32,
    loss: OnePole,
    tuning: ThiranAllpass,
    brightness: f32,
    shape: ExcitationShape,
    pending_inject: f32,
    /// Ramped extra damping used by note release; 0 = none, 1 = full.
    damp_boost: Smoother,
    energy: f32,
    energy_decay: f32,
    noise: Lcg,
    scratch: Vec<f32>,
    scratch2: Vec<f32>,
}

impl PluckedString {
    /// Creates a string tuned to `frequency`.
    pub fn new(frequency: f32, sample_rate: f32) -> Self {
        let mut s = Self {
            delay: DelayLine::new(MAX_DELAY),
            delay_len: 2,
            frequency,
            sample_rate,
            feedback: 0.998,
            loss: OnePole::new(0.5),
            tuning: ThiranAllpass::new(0.5),
            brightness: 0.5,
            shape: ExcitationShape::Noise,
            pending_inject: 0.0,
            damp_boost: Smoother::new(DAMP_RAMP),
            energy: 0.0,
            energy_decay: 0.9995,
            noise: Lcg::default(),
            scratch: vec![0.0; MAX_DELAY],
            scratch2: vec![0.0; MAX_DELAY],
        };
        s.set_frequency(frequency);
        s
    }

    /// Sets the excitation shape used by subsequent plucks.
    pub fn with_shape(mut self, shape: ExcitationShape) -> Self {
        self.shape = shape;
        self
    }

    /// Retunes the string without clearing the ringing content.
    ///
    /// The delay length is recomputed from the sample rate; the stored
    /// samples stay, so a retune mid-sustain glides instead of cutting out.
    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency.clamp(20.0, self.sample_rate * 0.45);

        // Half a sample compensates the loss filter's group delay.
        let total_delay = self.sample_rate / self.frequency - 0.5;
        let whole = total_delay.floor().max(2.0) as usize;
        self.delay_len = whole.clamp(2, MAX_DELAY - 1);
        let frac = (total_delay - self.delay_len as f32).clamp(0.0, 1.0);
        self.tuning.set_fractional_delay(frac);
    }

    /// Current tuned frequency in Hz.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Sets the sustain: higher values keep energy in the loop longer.
    pub fn set_damping(&mut self, damping: f32) {
        self.feedback = damping.clamp(0.9, 0.9999);
    }

    /// Sets the brightness (0 = dull, 1 = bright) of the loop loss filter.
    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness.clamp(0.0, 1.0);
        self.loss.set_coeff(0.2 + (1.0 - self.brightness) * 0.6);
    }

    /// Ramps extra damping in (1.0) or out (0.0); used for note release.
    pub fn set_damp_boost(&mut self, target: f32) {
        self.damp_boost.set_target(target.clamp(0.0, 1.0));
    }

    /// Loads an excitation burst covering exactly one period.
    ///
    /// `position` (0..1) is the pluck point along the string, `amplitude`
    /// (0..1) the strike strength. Filter memory is reset so stale state
    /// from the previous note cannot click into the new one.
    pub fn pluck(&mut self, position: f32, amplitude: f32) {
        let amplitude = amplitude.clamp(0.0, 1.0);
        let position = position.clamp(0.05, 0.95);
        let len = self.delay_len;

        match self.shape {
            ExcitationShape::Noise => {
                for i in 0..len {
                    self.scratch[i] = self.noise.next_bipolar() * amplitude;
                }
                // Comb at the pluck position: harmonics at multiples of
                // 1/position are what a pluck there cannot excite.
                let comb = ((len as f32 * position) as usize).clamp(1, len - 1);
                self.scratch2[..len].copy_from_slice(&self.scratch[..len]);
                for i in comb..len {
                    self.scratch2[i] = self.scratch[i] - self.scratch[i - comb] * 0.85;
                }
                self.scratch[..len].copy_from_slice(&self.scratch2[..len]);

                // Short attack ramp keeps the onset from being a hard edge.
                let attack = (len / 6).max(2);
                for i in 0..attack {
                    let env = (i as f32 / attack as f32).sqrt();
                    self.scratch[i] *= env;
                }
            }
            ExcitationShape::Triangle => {
                for i in 0..len {
                    let x = i as f32 / (len - 1) as f32;
                    let tri = if x < position {
                        x / position
                    } else {
                        (1.0 - x) / (1.0 - position)
                    };
                    self.scratch[i] = (tri - 0.5) * 2.0 * amplitude;
                }
            }
        }

        for i in 0..len {
            // Same write invariant as the feedback path: nothing outside
            // [-1, 1] ever enters the line.
            self.delay.store(i, self.scratch[i].clamp(-1.0, 1.0));
        }

        self.loss.reset();
        self.tuning.reset();
        self.pending_inject = 0.0;
        self.damp_boost.set_immediate(0.0);
        self.energy = amplitude;
    }

    /// Queues sympathetic energy to be added on the next `advance`.
    #[inline]
    pub fn inject(&mut self, amount: f32) {
        self.pending_inject += amount;
    }

    /// Advances one sample and returns the output tap.
    ///
    /// The tap is the raw delay-line read; the filtered, fed-back sample
    /// (plus any injected energy) is written behind it, clamped to [-1, 1]
    /// and zeroed if non-finite so a corrupted value can never recirculate.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        let sample = self.delay.read(self.delay_len);

        let interpolated = self.tuning.process(sample);
        let filtered = self.loss.process(interpolated);

        let boost = self.damp_boost.next();
        let feedback = self.feedback * (1.0 - boost * DAMP_BOOST_DEPTH);

        let mut next = filtered * feedback + self.pending_inject;
        self.pending_inject = 0.0;
        if next.is_finite() {
            next = next.clamp(-1.0, 1.0);
        } else {
            next = 0.0;
        }
        self.delay.write(next);

        self.energy = (self.energy * self.energy_decay).max(sample.abs());
        sample
    }

    /// Exponential envelope proxy for the string's vibrational energy.
    pub fn energy(&self) -> f32 {
        self.energy
    }

    /// Returns the string to rest: silence, zeroed filters, no damping boost.
    pub fn reset(&mut self) {
        self.delay.clear();
        self.loss.reset();
        self.tuning.reset();
        self.pending_inject = 0.0;
        self.damp_boost.set_immediate(0.0);
        self.energy = 0.0;
    }

    /// Copies the most recent `count` delay-line samples into `out`.
    pub fn waveform(&self, count: usize, out: &mut Vec<f32>) {
        self.delay.tail(count.min(self.delay_len), out);
    }
}

/// A string unit: one of the two physical models behind a shared contract.
#[derive(Debug, Clone)]
pub enum StringUnit {
    /// Delay-line model.
    Plucked(PluckedString),
    /// Finite-difference model.
    Waveguide(WaveguideString),
}

impl StringUnit {
    /// Creates a string unit for the given model.
    pub fn new(
        model: StringModel,
        frequency: f32,
        sample_rate: f32,
        shape: ExcitationShape,
    ) -> Self {
        match model {
            StringModel::DelayLine => {
                StringUnit::Plucked(PluckedString::new(frequency, sample_rate).with_shape(shape))
            }
            StringModel::Waveguide => {
                StringUnit::Waveguide(WaveguideString::new(frequency, sample_rate))
            }
        }
    }

    /// Excites the string at `position` with the given `amplitude`.
    pub fn pluck(&mut self, position: f32, amplitude: f32) {
        match self {
            StringUnit::Plucked(s) => s.pluck(position, amplitude),
            StringUnit::Waveguide(s) => s.pluck(position, amplitude),
        }
    }

    /// Queues sympathetic energy for the next step.
    #[inline]
    pub fn inject(&mut self, amount: f32) {
        match self {
            StringUnit::Plucked(s) => s.inject(amount),
            StringUnit::Waveguide(s) => s.inject(amount),
        }
    }

    /// Advances one output sample.
    #[inline]
    pub fn advance(&mut self) -> f32 {
        match self {
            StringUnit::Plucked(s) => s.advance(),
            StringUnit::Waveguide(s) => s.advance(),
        }
    }

    /// Current energy estimate.
    pub fn energy(&self) -> f32 {
        match self {
            StringUnit::Plucked(s) => s.energy(),
            StringUnit::Waveguide(s) => s.energy(),
        }
    }

    /// Retunes the string, preserving ringing content.
    pub fn set_frequency(&mut self, frequency: f32) {
        match self {
            StringUnit::Plucked(s) => s.set_frequency(frequency),
            StringUnit::Waveguide(s) => s.set_frequency(frequency),
        }
    }

    /// Current tuned frequency in Hz.
    pub fn frequency(&self) -> f32 {
        match self {
            StringUnit::Plucked(s) => s.frequency(),
            StringUnit::Waveguide(s) => s.frequency(),
        }
    }

    /// Sets sustain (higher = longer).
    pub fn set_damping(&mut self, damping: f32) {
        match self {
            StringUnit::Plucked(s) => s.set_damping(damping),
            StringUnit::Waveguide(s) => s.set_damping(damping),
        }
    }

    /// Sets brightness; the waveguide model has no loss filter, so this only
    /// affects the delay-line variant.
    pub fn set_brightness(&mut self, brightness: f32) {
        match self {
            StringUnit::Plucked(s) => s.set_brightness(brightness),
            StringUnit::Waveguide(_) => {}
        }
    }

    /// Ramps release damping toward `target` (0..1).
    pub fn set_damp_boost(&mut self, target: f32) {
        match self {
            StringUnit::Plucked(s) => s.set_damp_boost(target),
            StringUnit::Waveguide(s) => s.set_damp_boost(target),
        }
    }

    /// Returns the string to rest.
    pub fn reset(&mut self) {
        match self {
            StringUnit::Plucked(s) => s.reset(),
            StringUnit::Waveguide(s) => s.reset(),
        }
    }

    /// Copies a short waveform window into `out` (delay-line tail or
    /// displacement profile, depending on the model).
    pub fn waveform(&self, count: usize, out: &mut Vec<f32>) {
        match self {
            StringUnit::Plucked(s) => s.waveform(count, out),
            StringUnit::Waveguide(s) => s.waveform(count, out),
        }
    }

    /// Downcast for bridge-coupled bank stepping.
    pub fn as_waveguide_mut(&mut self) -> Option<&mut WaveguideString> {
        match self {
            StringUnit::Waveguide(s) => Some(s),
            StringUnit::Plucked(_) => None,
        }
    }

    /// Shared-ref downcast for diagnostics.
    pub fn as_waveguide(&self) -> Option<&WaveguideString> {
        match self {
            StringUnit::Waveguide(s) => Some(s),
            StringUnit::Plucked(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44_100.0;

    #[test]
    fn test_stability_ten_seconds() {
        let mut s = PluckedString::new(440.0, SR);
        s.pluck(0.5, 1.0);
        for i in 0..441_000 {
            let y = s.advance();
            assert!(y.is_finite(), "non-finite sample at {i}");
            assert!(y.abs() <= 1.0, "sample {y} out of range at {i}");
        }
    }

    #[test]
    fn test_decay_monotonic_without_injection() {
        let mut s = PluckedString::new(220.0, SR);
        s.pluck(0.5, 0.9);
        // Let the attack transient settle.
        for _ in 0..1024 {
            s.advance();
        }
        let mut prev = s.energy();
        for _ in 0..40 {
            for _ in 0..512 {
                s.advance();
            }
            let e = s.energy();
            assert!(
                e <= prev * 1.001 + 1e-6,
                "energy rose from {prev} to {e} with no injection"
            );
            prev = e;
        }
    }

    #[test]
    fn test_pitch_accuracy_440() {
        let mut s = PluckedString::new(440.0, SR);
        s.pluck(0.5, 1.0);
        for _ in 0..2048 {
            s.advance();
        }
        let samples: Vec<f32> = (0..4096).map(|_| s.advance()).collect();

        // Dominant periodicity via autocorrelation.
        let mut best_lag = 0;
        let mut best = f32::MIN;
        for lag in 60..150 {
            let mut acc = 0.0;
            for t in 0..2048 {
                acc += samples[t] * samples[t + lag];
            }
            if acc > best {
                best = acc;
                best_lag = lag;
            }
        }
        let expected = SR / 440.0;
        assert!(
            (best_lag as f32 - expected).abs() <= 1.0,
            "period {best_lag} vs expected {expected}"
        );
    }

    #[test]
    fn test_retune_mid_sustain_stays_finite() {
        let mut s = PluckedString::new(440.0, SR);
        s.pluck(0.5, 1.0);
        for _ in 0..500 {
            s.advance();
        }
        s.set_frequency(330.0);
        let y = s.advance();
        assert!(y.is_finite());
        // The buffer was not cleared: the string keeps ringing.
        let tail: f32 = (0..200).map(|_| s.advance().abs()).sum();
        assert!(tail > 0.0, "retune should glide, not silence the string");
    }

    #[test]
    fn test_injection_energizes_silent_string() {
        let mut s = PluckedString::new(440.0, SR);
        assert_eq!(s.energy(), 0.0);
        for _ in 0..2000 {
            s.inject(0.05);
            s.advance();
        }
        assert!(s.energy() > 0.0);
    }

    #[test]
    fn test_injection_shapes_future_not_current_tap() {
        let mut s = PluckedString::new(440.0, SR);
        // First tap after an injection into a silent string is still silent;
        // the injected energy only appears a full period later.
        s.inject(0.1);
        assert_eq!(s.advance(), 0.0);
    }

    #[test]
    fn test_reset_returns_to_rest() {
        let mut s = PluckedString::new(440.0, SR);
        s.pluck(0.3, 1.0);
        for _ in 0..100 {
            s.advance();
        }
        s.reset();
        assert_eq!(s.energy(), 0.0);
        for _ in 0..200 {
            assert_eq!(s.advance(), 0.0);
        }
    }

    #[test]
    fn test_damp_boost_ramps() {
        let mut a = PluckedString::new(220.0, SR);
        let mut b = PluckedString::new(220.0, SR);
        a.pluck(0.5, 0.9);
        b.pluck(0.5, 0.9);
        b.set_damp_boost(1.0);
        for _ in 0..22_050 {
            a.advance();
            b.advance();
        }
        assert!(
            b.energy() < a.energy() * 0.5,
            "boosted damping should decay clearly faster"
        );
    }

    #[test]
    fn test_triangle_excitation_bounded() {
        let mut s = PluckedString::new(440.0, SR).with_shape(ExcitationShape::Triangle);
        s.pluck(0.25, 1.0);
        for _ in 0..10_000 {
            let y = s.advance();
            assert!(y.abs() <= 1.0);
        }
    }

    #[test]
    fn test_extreme_frequencies_clamped() {
        let mut s = PluckedString::new(440.0, SR);
        s.set_frequency(1.0);
        s.pluck(0.5, 1.0);
        for _ in 0..10_000 {
            assert!(s.advance().is_finite());
        }
        s.set_frequency(1_000_000.0);
        for _ in 0..10_000 {
            assert!(s.advance().is_finite());
        }
    }
}
