//! Grain-based pitch shifting for one channel of the master bus.
//!
//! Overlapping Hann-windowed grains are read from a circular history of the
//! input at a rate of `1 / ratio` and overlap-added into the output, so the
//! playback speed is unchanged while the pitch moves by `1 / ratio`. A ratio
//! close to one bypasses the grains entirely and only delays the input.

use std::f32::consts::PI;

pub const MIN_RATIO: f32 = 0.5;
pub const MAX_RATIO: f32 = 2.0;

/// Delay applied to the signal in passthrough mode, in samples.
pub const PASSTHROUGH_LATENCY: usize = 128;

const HISTORY_LEN: usize = 16384;
const GRAIN_LEN: usize = 1024;
const HOP: usize = 256;
/// Sum of Hann windows at 75% overlap is 2.
const OLA_GAIN: f32 = 0.5;
const TARGET_LAG: f64 = 3072.0;
const MAX_LAG: f64 = 8192.0;
const RATIO_EPSILON: f32 = 1e-3;
/// Fraction of the remaining distance the ratio moves per processed block.
const RATIO_SMOOTHING: f32 = 0.05;

pub struct PitchShifter {
    history: Vec<f32>,
    written: u64,
    accumulator: Vec<f32>,
    out_pos: u64,
    next_grain: u64,
    cursor: f64,
    window: Vec<f32>,
    ratio: f32,
    target_ratio: f32,
    grains_active: bool,
}

impl Default for PitchShifter {
    fn default() -> Self {
        Self::new()
    }
}

impl PitchShifter {
    pub fn new() -> Self {
        let window = (0..GRAIN_LEN)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / GRAIN_LEN as f32).cos()))
            .collect();
        Self {
            history: vec![0.0; HISTORY_LEN],
            written: 0,
            accumulator: vec![0.0; HISTORY_LEN],
            out_pos: 0,
            next_grain: 0,
            cursor: 0.0,
            window,
            ratio: 1.0,
            target_ratio: 1.0,
            grains_active: false,
        }
    }

    /// Request a new ratio. The value is clamped to `[MIN_RATIO, MAX_RATIO]`
    /// and approached gradually over the following blocks.
    pub fn set_ratio(&mut self, ratio: f32) {
        self.target_ratio = if ratio.is_finite() {
            ratio.clamp(MIN_RATIO, MAX_RATIO)
        } else {
            1.0
        };
    }

    /// The smoothed ratio currently in effect.
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn target_ratio(&self) -> f32 {
        self.target_ratio
    }

    pub fn is_passthrough(&self) -> bool {
        !self.grains_active
    }

    /// Process one block. `input` and `output` must have the same length.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        let n = input.len().min(output.len());
        let block_start = self.written;

        for &sample in &input[..n] {
            self.history[(self.written % HISTORY_LEN as u64) as usize] = sample;
            self.written += 1;
        }

        self.smooth_ratio();

        let passthrough = (self.ratio - 1.0).abs() < RATIO_EPSILON
            && (self.target_ratio - 1.0).abs() < RATIO_EPSILON;

        if passthrough {
            if self.grains_active {
                self.accumulator.fill(0.0);
                self.grains_active = false;
            }
            for (i, out) in output[..n].iter_mut().enumerate() {
                let abs = block_start + i as u64;
                *out = if abs >= PASSTHROUGH_LATENCY as u64 {
                    self.history[((abs - PASSTHROUGH_LATENCY as u64) % HISTORY_LEN as u64) as usize]
                } else {
                    0.0
                };
            }
            self.out_pos += n as u64;
            return;
        }

        if !self.grains_active {
            self.grains_active = true;
            self.next_grain = self.out_pos;
            self.cursor = (self.written as f64 - TARGET_LAG).max(0.0);
        }

        while self.next_grain < self.out_pos + n as u64 {
            self.add_grain();
        }

        for out in output[..n].iter_mut() {
            let idx = (self.out_pos % HISTORY_LEN as u64) as usize;
            *out = self.accumulator[idx];
            self.accumulator[idx] = 0.0;
            self.out_pos += 1;
        }
    }

    fn smooth_ratio(&mut self) {
        let diff = self.target_ratio - self.ratio;
        if diff.abs() < 1e-4 {
            self.ratio = self.target_ratio;
        } else {
            self.ratio += diff * RATIO_SMOOTHING;
        }
    }

    fn add_grain(&mut self) {
        let ratio = self.ratio as f64;
        let written = self.written as f64;
        let lag = written - self.cursor;
        let span = GRAIN_LEN as f64 / ratio;
        if lag > MAX_LAG || lag < span {
            self.cursor = (written - TARGET_LAG).max(0.0);
        }

        let step = 1.0 / ratio;
        for i in 0..GRAIN_LEN {
            let src = self.cursor + i as f64 * step;
            let base = src.floor();
            // Both interpolation points must already be written.
            if base + 1.0 >= written {
                break;
            }
            let frac = (src - base) as f32;
            let base = base as u64;
            let a = self.history[(base % HISTORY_LEN as u64) as usize];
            let b = self.history[((base + 1) % HISTORY_LEN as u64) as usize];
            let value = a + (b - a) * frac;
            let out = ((self.next_grain + i as u64) % HISTORY_LEN as u64) as usize;
            self.accumulator[out] += value * self.window[i] * OLA_GAIN;
        }

        self.cursor += HOP as f64 * step;
        self.next_grain += HOP as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = fastrand::Rng::with_seed(seed);
        (0..len).map(|_| rng.f32() * 2.0 - 1.0).collect()
    }

    #[test]
    fn unity_ratio_is_a_delayed_copy() {
        let mut shifter = PitchShifter::new();
        shifter.set_ratio(1.0);
        let input = noise(128 * 40, 7);
        let mut output = vec![0.0; input.len()];
        for (inp, out) in input.chunks(128).zip(output.chunks_mut(128)) {
            shifter.process(inp, out);
        }

        assert!(output[..PASSTHROUGH_LATENCY].iter().all(|&s| s == 0.0));
        for (i, &s) in output.iter().enumerate().skip(PASSTHROUGH_LATENCY) {
            assert_eq!(s.to_bits(), input[i - PASSTHROUGH_LATENCY].to_bits());
        }
    }

    #[test]
    fn ratio_is_clamped() {
        let mut shifter = PitchShifter::new();
        shifter.set_ratio(5.0);
        assert_eq!(shifter.target_ratio(), MAX_RATIO);
        shifter.set_ratio(0.1);
        assert_eq!(shifter.target_ratio(), MIN_RATIO);
        shifter.set_ratio(f32::NAN);
        assert_eq!(shifter.target_ratio(), 1.0);
    }

    #[test]
    fn ratio_changes_are_smoothed() {
        let mut shifter = PitchShifter::new();
        shifter.set_ratio(2.0);
        let input = vec![0.0; 128];
        let mut output = vec![0.0; 128];
        shifter.process(&input, &mut output);
        assert!(shifter.ratio() > 1.0 && shifter.ratio() < 1.1);
        for _ in 0..400 {
            shifter.process(&input, &mut output);
        }
        assert_eq!(shifter.ratio(), 2.0);
        assert!(!shifter.is_passthrough());
    }

    #[test]
    fn first_grain_stops_at_the_last_written_sample() {
        let mut shifter = PitchShifter::new();
        shifter.set_ratio(0.5);
        let input = vec![1.0; 128];
        let mut output = vec![0.0; 128];
        shifter.process(&input, &mut output);

        // After one block the ratio is 0.975, so the grain reads 1.0256
        // samples per step and runs out of history after 124 steps.
        assert!(!shifter.is_passthrough());
        assert!(output.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
        assert!(output[1..124].iter().all(|&s| s > 0.0));
        assert!(output[124..].iter().all(|&s| s == 0.0));
        for (i, &s) in output[..124].iter().enumerate() {
            assert!((s - shifter.window[i] * OLA_GAIN).abs() < 1e-6, "sample {i}");
        }
    }

    #[test]
    fn shifted_output_stays_bounded_and_non_silent() {
        let mut shifter = PitchShifter::new();
        shifter.set_ratio(0.5);
        let sr = 48000.0;
        let input: Vec<f32> = (0..48000)
            .map(|i| (2.0 * PI * 220.0 * i as f32 / sr).sin() * 0.5)
            .collect();
        let mut output = vec![0.0; input.len()];
        for (inp, out) in input.chunks(128).zip(output.chunks_mut(128)) {
            shifter.process(inp, out);
        }

        let tail = &output[24000..];
        let peak = tail.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.1, "peak {peak}");
        assert!(peak <= 1.0, "peak {peak}");
    }
}
