//! Output stage: panning, reverb, warmth, and limiting.
//!
//! Per-string stereo placement is fixed at construction and applied as a
//! constant-power split. The summed signal feeds a Schroeder/Moorer
//! feedback-delay-network reverb (parallel combs, series allpass
//! diffusers), then a DC blocker, an optional warmth saturator, and a
//! soft-knee limiter per channel.

use crate::filter::{DcBlocker, OnePole};

/// Comb delay lengths per channel, in samples at 44.1 kHz.
///
/// All entries are prime, so every pair is coprime and no two combs share
/// resonant build-up at a common divisor. The right channel uses a second
/// prime set for stereo decorrelation.
const COMB_TUNINGS_LEFT: [usize; 8] = [1117, 1193, 1277, 1361, 1433, 1499, 1583, 1657];
const COMB_TUNINGS_RIGHT: [usize; 8] = [1129, 1201, 1289, 1373, 1447, 1511, 1597, 1669];

/// Allpass diffuser delay lengths per channel (primes as well).
const ALLPASS_TUNINGS_LEFT: [usize; 4] = [223, 347, 443, 557];
const ALLPASS_TUNINGS_RIGHT: [usize; 4] = [229, 349, 449, 563];

/// Internal reverb return level; the wet signal is added on top of the dry
/// mix, so it sits low.
const REVERB_GAIN: f32 = 0.015;

/// Feedback comb filter with a damping lowpass in the loop.
#[derive(Debug, Clone)]
struct Comb {
    buffer: Vec<f32>,
    write_pos: usize,
    feedback: f32,
    damping: OnePole,
}

impl Comb {
    fn new(delay_samples: usize, feedback: f32, damping: f32) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
            feedback,
            damping: OnePole::new(damping),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.write_pos];
        let filtered = self.damping.process(output);
        self.buffer[self.write_pos] = input + filtered * self.feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.damping.reset();
    }
}

/// Allpass diffuser.
#[derive(Debug, Clone)]
struct Diffuser {
    buffer: Vec<f32>,
    write_pos: usize,
    feedback: f32,
}

impl Diffuser {
    fn new(delay_samples: usize, feedback: f32) -> Self {
        Self {
            buffer: vec![0.0; delay_samples.max(1)],
            write_pos: 0,
            feedback,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.write_pos];
        let output = delayed - input * self.feedback;
        self.buffer[self.write_pos] = input + delayed * self.feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

/// Stereo feedback-delay-network reverb.
#[derive(Debug, Clone)]
pub struct StereoReverb {
    combs_left: Vec<Comb>,
    combs_right: Vec<Comb>,
    diffusers_left: Vec<Diffuser>,
    diffusers_right: Vec<Diffuser>,
    input_lowpass: OnePole,
    room_size: f32,
    damping: f32,
    width: f32,
}

impl StereoReverb {
    /// Creates a reverb with delay times scaled to the sample rate.
    pub fn new(sample_rate: f32) -> Self {
        let scale = sample_rate / 44_100.0;
        let make_combs = |tunings: &[usize]| {
            tunings
                .iter()
                .map(|&d| Comb::new((d as f32 * scale) as usize, 0.84, 0.2))
                .collect()
        };
        let make_diffusers = |tunings: &[usize]| {
            tunings
                .iter()
                .map(|&d| Diffuser::new((d as f32 * scale) as usize, 0.5))
                .collect()
        };
        Self {
            combs_left: make_combs(&COMB_TUNINGS_LEFT),
            combs_right: make_combs(&COMB_TUNINGS_RIGHT),
            diffusers_left: make_diffusers(&ALLPASS_TUNINGS_LEFT),
            diffusers_right: make_diffusers(&ALLPASS_TUNINGS_RIGHT),
            input_lowpass: OnePole::new(0.3),
            room_size: 0.5,
            damping: 0.5,
            width: 1.0,
        }
    }

    /// Sets the room size (0..1); larger rooms decay longer.
    pub fn set_room_size(&mut self, size: f32) {
        self.room_size = size.clamp(0.0, 1.0);
        let feedback = 0.7 + self.room_size * 0.28;
        for comb in self.combs_left.iter_mut().chain(&mut self.combs_right) {
            comb.feedback = feedback;
        }
    }

    /// Sets high-frequency damping (0..1).
    pub fn set_damping(&mut self, damping: f32) {
        self.damping = damping.clamp(0.0, 1.0);
        for comb in self.combs_left.iter_mut().chain(&mut self.combs_right) {
            comb.damping.set_coeff(self.damping);
        }
    }

    /// Sets stereo width (0 = mono, 2 = exaggerated).
    pub fn set_width(&mut self, width: f32) {
        self.width = width.clamp(0.0, 2.0);
    }

    /// Processes one mono sample into a stereo pair.
    #[inline]
    pub fn process(&mut self, input: f32) -> (f32, f32) {
        let filtered = self.input_lowpass.process(input);

        let mut left = 0.0;
        for comb in &mut self.combs_left {
            left += comb.process(filtered);
        }
        left /= self.combs_left.len() as f32;

        let mut right = 0.0;
        for comb in &mut self.combs_right {
            right += comb.process(filtered);
        }
        right /= self.combs_right.len() as f32;

        for diffuser in &mut self.diffusers_left {
            left = diffuser.process(left);
        }
        for diffuser in &mut self.diffusers_right {
            right = diffuser.process(right);
        }

        let mono = (left + right) * 0.5;
        let side = (left - right) * 0.5;
        let mut out_l = (mono + side * self.width) * REVERB_GAIN;
        let mut out_r = (mono - side * self.width) * REVERB_GAIN;

        if !out_l.is_finite() {
            out_l = 0.0;
        }
        if !out_r.is_finite() {
            out_r = 0.0;
        }
        (out_l.clamp(-1.0, 1.0), out_r.clamp(-1.0, 1.0))
    }

    /// Clears every delay buffer.
    pub fn clear(&mut self) {
        for comb in self.combs_left.iter_mut().chain(&mut self.combs_right) {
            comb.clear();
        }
        for d in self
            .diffusers_left
            .iter_mut()
            .chain(&mut self.diffusers_right)
        {
            d.clear();
        }
        self.input_lowpass.reset();
    }
}

/// Soft-knee limiter with a running envelope per instance.
///
/// Below the threshold the signal passes untouched. Above it, gain is
/// computed against a peak envelope (instant attack, smooth release) and
/// the overshoot is folded through a tanh knee, so transients saturate
/// smoothly instead of hard-clipping. The envelope persists across blocks,
/// keeping gain reduction continuous at block boundaries.
#[derive(Debug, Clone)]
pub struct SoftLimiter {
    threshold: f32,
    envelope: f32,
    release: f32,
}

impl SoftLimiter {
    /// Creates a limiter with the given threshold (0..1).
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(0.5, 0.99),
            envelope: 0.0,
            release: 0.0005,
        }
    }

    /// Processes one sample; output magnitude never exceeds 1.0.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        if !input.is_finite() {
            self.envelope = 0.0;
            return 0.0;
        }
        let mag = input.abs();
        if mag > self.envelope {
            self.envelope = mag;
        } else {
            self.envelope += (mag - self.envelope) * self.release;
        }

        let th = self.threshold;
        let out = if self.envelope > th {
            let knee = th + (self.envelope - th).tanh() * (1.0 - th);
            input * (knee / self.envelope)
        } else {
            input
        };
        out.clamp(-1.0, 1.0)
    }

    /// Resets the envelope.
    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

/// Full output stage for a string bank.
#[derive(Debug, Clone)]
pub struct OutputStage {
    /// Constant-power gain pairs, one per string, fixed at construction.
    pans: Vec<(f32, f32)>,
    reverb: StereoReverb,
    dc_left: DcBlocker,
    dc_right: DcBlocker,
    limiter_left: SoftLimiter,
    limiter_right: SoftLimiter,
    master_volume: f32,
    reverb_mix: f32,
    warmth: f32,
}

impl OutputStage {
    /// Creates an output stage with strings spread across the stereo field.
    pub fn new(num_strings: usize, sample_rate: f32) -> Self {
        let pans = (0..num_strings)
            .map(|i| {
                let pan = if num_strings > 1 {
                    (i as f32 / (num_strings - 1) as f32) * 2.0 - 1.0
                } else {
                    0.0
                };
                (
                    ((1.0 - pan) * 0.5).sqrt(),
                    ((1.0 + pan) * 0.5).sqrt(),
                )
            })
            .collect();
        Self {
            pans,
            reverb: StereoReverb::new(sample_rate),
            dc_left: DcBlocker::new(10.0, sample_rate),
            dc_right: DcBlocker::new(10.0, sample_rate),
            limiter_left: SoftLimiter::new(0.95),
            limiter_right: SoftLimiter::new(0.95),
            master_volume: 0.7,
            reverb_mix: 0.25,
            warmth: 0.0,
        }
    }

    /// Sets the master volume (0..1).
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    /// Sets the reverb send level (0..1).
    pub fn set_reverb_mix(&mut self, mix: f32) {
        self.reverb_mix = mix.clamp(0.0, 1.0);
    }

    /// Sets the warmth (0..1): a gentle tanh saturation blended in before
    /// the limiter. Zero is fully linear.
    pub fn set_warmth(&mut self, warmth: f32) {
        self.warmth = warmth.clamp(0.0, 1.0);
    }

    /// Reverb parameter access.
    pub fn reverb_mut(&mut self) -> &mut StereoReverb {
        &mut self.reverb
    }

    /// Mixes per-string outputs into one limited stereo frame.
    #[inline]
    pub fn mix(&mut self, outputs: &[f32]) -> (f32, f32) {
        let mut left = 0.0;
        let mut right = 0.0;
        let mut mono = 0.0;
        for (&sample, &(gain_l, gain_r)) in outputs.iter().zip(&self.pans) {
            left += sample * gain_l;
            right += sample * gain_r;
            mono += sample;
        }
        if !outputs.is_empty() {
            mono /= outputs.len() as f32;
        }
        if !mono.is_finite() {
            mono = 0.0;
        }

        if self.reverb_mix > 0.001 {
            let (rev_l, rev_r) = self.reverb.process(mono);
            left += rev_l * self.reverb_mix;
            right += rev_r * self.reverb_mix;
        }

        left = self.dc_left.process(left) * self.master_volume;
        right = self.dc_right.process(right) * self.master_volume;

        if self.warmth > 0.0 {
            left = saturate(left, self.warmth);
            right = saturate(right, self.warmth);
        }

        (
            self.limiter_left.process(left),
            self.limiter_right.process(right),
        )
    }

    /// Clears reverb tails and filter state.
    pub fn clear(&mut self) {
        self.reverb.clear();
        self.dc_left.reset();
        self.dc_right.reset();
        self.limiter_left.reset();
        self.limiter_right.reset();
    }
}

/// Bounded tanh saturation blend; `warmth` 0 is the identity.
#[inline]
fn saturate(x: f32, warmth: f32) -> f32 {
    let drive = 1.0 + 3.0 * warmth;
    x * (1.0 - warmth) + (x * drive).tanh() / drive * warmth
}
