//! Spectrum analysis of a tap stream.
//!
//! Produces the same byte-scaled magnitude spectrum a browser `AnalyserNode`
//! reports: Blackman window, magnitudes normalised by the FFT size,
//! exponential smoothing across frames and a decibel range mapped to
//! `0..=255`.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_SMOOTHING: f32 = 0.8;
pub const DEFAULT_MIN_DB: f32 = -100.0;
pub const DEFAULT_MAX_DB: f32 = -30.0;

pub struct Analyser {
    fft: Arc<dyn RealToComplex<f32>>,
    fft_size: usize,
    history: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

impl Analyser {
    /// `fft_size` is rounded up to a power of two.
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = 2.0 * std::f32::consts::PI * i as f32 / n;
                0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
            })
            .collect();

        Self {
            input: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            smoothed: vec![0.0; fft_size / 2],
            fft,
            fft_size,
            history: vec![0.0; fft_size],
            write_pos: 0,
            window,
            smoothing: DEFAULT_SMOOTHING,
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
        }
    }

    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing.clamp(0.0, 1.0);
        self
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins returned by [`Analyser::byte_frequency_data`].
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Move everything waiting in a tap ring into the history.
    pub fn drain(&mut self, tap: &mut rtrb::Consumer<f32>) {
        let available = tap.slots();
        if available == 0 {
            return;
        }
        if let Ok(chunk) = tap.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            self.push_samples(first);
            self.push_samples(second);
            chunk.commit_all();
        }
    }

    /// Forget history and smoothing state.
    pub fn clear(&mut self) {
        self.history.fill(0.0);
        self.smoothed.fill(0.0);
        self.write_pos = 0;
    }

    /// Analyse the most recent `fft_size` samples and write one byte per bin
    /// into `out` (at most [`Analyser::bin_count`] entries are written).
    pub fn byte_frequency_data(&mut self, out: &mut [u8]) {
        for i in 0..self.fft_size {
            let sample = self.history[(self.write_pos + i) % self.fft_size];
            self.input[i] = sample * self.window[i];
        }

        if self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .is_err()
        {
            out.fill(0);
            return;
        }

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_db - self.min_db;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[k].norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
        }

        for (byte, &magnitude) in out.iter_mut().zip(&self.smoothed) {
            let db = 20.0 * magnitude.max(1e-12).log10();
            let scaled = 255.0 / range * (db - self.min_db);
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: f32, len: usize, amp: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin() * amp)
            .collect()
    }

    #[test]
    fn silence_maps_to_zero() {
        let mut analyser = Analyser::default();
        analyser.push_samples(&vec![0.0; 4096]);
        let mut bins = vec![1u8; analyser.bin_count()];
        analyser.byte_frequency_data(&mut bins);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        let mut analyser = Analyser::new(2048).with_smoothing(0.0);
        let sr = 48000.0;
        // Exactly bin 20.
        let freq = 20.0 * sr / 2048.0;
        analyser.push_samples(&sine(freq, sr, 2048, 0.5));
        let mut bins = vec![0u8; analyser.bin_count()];
        analyser.byte_frequency_data(&mut bins);

        assert_eq!(bins[20], 255);
        for (k, &b) in bins.iter().enumerate() {
            if b == 255 {
                assert!((17..=23).contains(&k), "bin {k} saturated");
            }
        }
        assert_eq!(bins[600], 0);
    }

    #[test]
    fn smoothing_lags_behind_the_signal() {
        let sr = 48000.0;
        let freq = 20.0 * sr / 2048.0;
        let signal = sine(freq, sr, 2048, 0.5);

        let mut fast = Analyser::new(2048).with_smoothing(0.0);
        let mut slow = Analyser::new(2048).with_smoothing(0.8);
        fast.push_samples(&signal);
        slow.push_samples(&signal);

        let mut a = vec![0u8; 1024];
        let mut b = vec![0u8; 1024];
        fast.byte_frequency_data(&mut a);
        slow.byte_frequency_data(&mut b);
        assert!(b[20] <= a[20]);
        assert!(b[20] > 0);
    }

    #[test]
    fn drains_tap_ring() {
        let (mut tx, mut rx) = rtrb::RingBuffer::<f32>::new(64);
        for _ in 0..10 {
            tx.push(0.25).unwrap();
        }
        let mut analyser = Analyser::new(32);
        analyser.drain(&mut rx);
        assert_eq!(rx.slots(), 0);
    }
}
