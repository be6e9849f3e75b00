//! Finite-difference string model with a rigid-bridge boundary.
//!
//! The string is discretized into displacement samples over its length,
//! index 0 at the fixed end and the last index at the bridge. Each output
//! sample runs several oversampled sub-steps of the explicit second-order
//! wave equation so the Courant number stays well below the stability
//! bound at every supported frequency.
//!
//! Energy actually crosses between strings through the shared boundary:
//! each sub-step every string extrapolates the displacement it *wants* at
//! its bridge point, the [`crate::bridge::Bridge`] resolves one value from
//! all the wants, and that value is written back identically into every
//! coupled string.

use crate::primitive::Smoother;

/// Spatial resolution of the displacement array.
const NUM_POINTS: usize = 64;

/// Courant number ceiling the oversampling is sized for.
const COURANT_TARGET: f32 = 0.5;

/// Per-output-sample coefficient for the release damping ramp.
const DAMP_RAMP: f32 = 0.002;

/// Returns the sub-steps per output sample needed to keep the Courant
/// number at or below [`COURANT_TARGET`] for the given top frequency.
pub fn required_oversample(max_frequency: f32, sample_rate: f32) -> u32 {
    let dx = 1.0 / (NUM_POINTS - 1) as f32;
    let wave_speed = 2.0 * max_frequency.max(1.0);
    let steps = (wave_speed / (sample_rate * COURANT_TARGET * dx)).ceil() as u32;
    steps.clamp(4, 32)
}

/// One finite-difference string.
///
/// All buffers are allocated at construction; retuning only rewrites the
/// derived physical constants and never clears the displacement state.
#[derive(Debug, Clone)]
pub struct WaveguideString {
    /// Current displacement.
    y: Vec<f32>,
    /// Displacement one sub-step ago (second-order time stepping).
    y_prev: Vec<f32>,
    /// Scratch target for the next sub-step.
    y_next: Vec<f32>,
    frequency: f32,
    tension: f32,
    density: f32,
    /// Velocity-proportional damping coefficient.
    damping: f32,
    wave_speed: f32,
    sample_rate: f32,
    oversample: u32,
    /// Sub-step duration, `1 / (sample_rate * oversample)`.
    dt: f32,
    /// Where the output is read; deliberately not the bridge end.
    pickup: usize,
    /// Where injected sympathetic energy lands.
    excite: usize,
    /// Boundary displacement this string wants, from the last sub-step.
    want: f32,
    pending_inject: f32,
    damp_boost: Smoother,
    kinetic: f32,
    potential: f32,
}

impl WaveguideString {
    /// Creates a string tuned to `frequency`.
    pub fn new(frequency: f32, sample_rate: f32) -> Self {
        let mut s = Self {
            y: vec![0.0; NUM_POINTS],
            y_prev: vec![0.0; NUM_POINTS],
            y_next: vec![0.0; NUM_POINTS],
            frequency,
            tension: 0.0,
            density: 0.001,
            damping: 1e-5,
            wave_speed: 0.0,
            sample_rate,
            oversample: 8,
            dt: 1.0 / (sample_rate * 8.0),
            pickup: NUM_POINTS / 4,
            excite: NUM_POINTS / 2,
            want: 0.0,
            pending_inject: 0.0,
            damp_boost: Smoother::new(DAMP_RAMP),
            kinetic: 0.0,
            potential: 0.0,
        };
        s.set_frequency(frequency);
        s
    }

    /// Retunes the string, preserving the current displacement state.
    ///
    /// For a unit-length string `f = c / 2L` gives `c = 2f`, and the
    /// tension follows from `c² = T / μ`.
    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency.clamp(30.0, 2_000.0);
        self.wave_speed = 2.0 * self.frequency;
        self.tension = self.density * self.wave_speed * self.wave_speed;
    }

    /// Current tuned frequency in Hz.
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Tension weight this string contributes to the bridge.
    pub fn tension(&self) -> f32 {
        self.tension
    }

    /// Sets the sub-step count per output sample.
    pub fn set_oversample(&mut self, steps: u32) {
        self.oversample = steps.clamp(1, 64);
        self.dt = 1.0 / (self.sample_rate * self.oversample as f32);
    }

    /// Sub-step duration in seconds.
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Sets sustain; higher values keep the string ringing longer.
    ///
    /// The velocity-damping coefficient applies per sub-step, so it sits
    /// orders of magnitude below the delay-line feedback numbers.
    pub fn set_damping(&mut self, damping: f32) {
        let sustain = damping.clamp(0.9, 0.9999);
        self.damping = ((1.0 - sustain) * 0.005).clamp(1e-6, 0.01);
    }

    /// Ramps release damping toward `target` (0..1).
    pub fn set_damp_boost(&mut self, target: f32) {
        self.damp_boost.set_target(target.clamp(0.0, 1.0));
    }

    /// Sets a triangular initial displacement peaked at `position`, with
    /// zero initial velocity (previous displacement written identically).
    pub fn pluck(&mut self, position: f32, amplitude: f32) {
        let position = position.clamp(0.1, 0.9);
        let amplitude = amplitude.clamp(0.0, 1.0);
        for i in 0..NUM_POINTS {
            let x = i as f32 / (NUM_POINTS - 1) as f32;
            self.y[i] = if x < position {
                amplitude * x / position
            } else {
                amplitude * (1.0 - x) / (1.0 - position)
            };
        }
        self.y[0] = 0.0;
        self.y_prev.copy_from_slice(&self.y);
        self.pending_inject = 0.0;
        self.damp_boost.set_immediate(0.0);
        self.update_energy();
    }

    /// Queues sympathetic energy to be applied on the next output step.
    #[inline]
    pub fn inject(&mut self, amount: f32) {
        self.pending_inject += amount;
    }

    /// Applies queued injection and advances the damping ramp.
    ///
    /// Called once per output sample, before the sub-step loop.
    #[inline]
    pub fn begin_output_step(&mut self) {
        let kick = self.pending_inject.clamp(-0.5, 0.5);
        self.pending_inject = 0.0;
        if kick != 0.0 {
            // Displacing only the current array turns the kick into a
            // velocity impulse at the excitation point.
            self.y[self.excite] += kick;
        }
        self.damp_boost.next();
    }

    /// One oversampled interior update.
    ///
    /// Updates every non-boundary point and extrapolates the displacement
    /// this string wants at the bridge; the caller resolves the shared
    /// boundary and then calls [`commit_substep`](Self::commit_substep).
    #[inline]
    pub fn sub_step(&mut self) {
        let n = NUM_POINTS;
        let dx = 1.0 / (n - 1) as f32;
        let r = self.wave_speed * self.dt / dx;
        // Hard ceiling: a misconfigured rate degrades the tone, never the
        // integration.
        let r2 = (r * r).min(0.98);
        let gamma = (self.damping * (1.0 + self.damp_boost.value() * 200.0)).min(0.05);

        for i in 1..n - 1 {
            let lap = self.y[i + 1] - 2.0 * self.y[i] + self.y[i - 1];
            self.y_next[i] = 2.0 * self.y[i] - self.y_prev[i] + r2 * lap
                - gamma * (self.y[i] - self.y_prev[i]);
        }

        // One-sided update at the bridge point: what this string would do
        // if the boundary were free to follow it.
        let lap_end = self.y[n - 2] - self.y[n - 1];
        self.want = 2.0 * self.y[n - 1] - self.y_prev[n - 1] + r2 * lap_end
            - gamma * (self.y[n - 1] - self.y_prev[n - 1]);
    }

    /// Boundary displacement this string wants, from the last sub-step.
    pub fn bridge_want(&self) -> f32 {
        self.want
    }

    /// Writes the resolved boundary and commits the sub-step.
    #[inline]
    pub fn commit_substep(&mut self, boundary: f32) {
        let n = NUM_POINTS;
        self.y_next[0] = 0.0;
        self.y_next[n - 1] = boundary;
        std::mem::swap(&mut self.y_prev, &mut self.y);
        std::mem::swap(&mut self.y, &mut self.y_next);
    }

    /// Finishes an output step: recomputes energy, guards against a
    /// corrupted state, and returns the pickup displacement.
    #[inline]
    pub fn finish_output_step(&mut self) -> f32 {
        self.update_energy();
        let out = self.y[self.pickup];
        if out.is_finite() {
            out
        } else {
            // A non-finite interior state cannot be repaired in place;
            // degrade to silence.
            self.y.fill(0.0);
            self.y_prev.fill(0.0);
            self.kinetic = 0.0;
            self.potential = 0.0;
            0.0
        }
    }

    /// Advances one output sample as an uncoupled string (its own boundary
    /// want becomes the boundary).
    pub fn advance(&mut self) -> f32 {
        self.begin_output_step();
        for _ in 0..self.oversample {
            self.sub_step();
            let mut boundary = self.want;
            if !boundary.is_finite() {
                boundary = 0.0;
            }
            self.commit_substep(boundary.clamp(-0.5, 0.5));
        }
        self.finish_output_step()
    }

    /// Kinetic plus potential energy, recomputed each output step.
    pub fn energy(&self) -> f32 {
        self.kinetic + self.potential
    }

    /// Kinetic energy `Σ ½ μ dx v²`.
    pub fn kinetic_energy(&self) -> f32 {
        self.kinetic
    }

    /// Potential energy `Σ ½ T strain² dx`.
    pub fn potential_energy(&self) -> f32 {
        self.potential
    }

    /// Displacement at the bridge end.
    pub fn boundary(&self) -> f32 {
        self.y[NUM_POINTS - 1]
    }

    /// Returns the string to rest.
    pub fn reset(&mut self) {
        self.y.fill(0.0);
        self.y_prev.fill(0.0);
        self.y_next.fill(0.0);
        self.want = 0.0;
        self.pending_inject = 0.0;
        self.damp_boost.set_immediate(0.0);
        self.kinetic = 0.0;
        self.potential = 0.0;
    }

    /// Copies the first `count` displacement points into `out`.
    pub fn waveform(&self, count: usize, out: &mut Vec<f32>) {
        out.clear();
        out.extend_from_slice(&self.y[..count.min(NUM_POINTS)]);
    }

    fn update_energy(&mut self) {
        let n = NUM_POINTS;
        let dx = 1.0 / (n - 1) as f32;
        let mut ke = 0.0;
        let mut pe = 0.0;
        for i in 0..n {
            let v = (self.y[i] - self.y_prev[i]) / self.dt;
            ke += 0.5 * self.density * dx * v * v;
            if i < n - 1 {
                let strain = (self.y[i + 1] - self.y[i]) / dx;
                pe += 0.5 * self.tension * strain * strain * dx;
            }
        }
        self.kinetic = ke;
        self.potential = pe;
    }
}
