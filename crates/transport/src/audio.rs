use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Shared, immutable interleaved sample data.
///
/// Cloning only bumps a reference count, so the same decoded track can be held
/// by its playback chain, the render thread and a waveform job at once.
///
/// ```text
/// AudioArc
/// ├─ samples: Arc<[f32]> ────> Heap: [L, R, L, R, ...]
/// ├─ sample_rate: u32
/// └─ channels: u16
/// ```
///
/// # Examples
///
/// ```
/// use backtrack_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// let shared = audio.clone();
/// assert_eq!(shared.frames(), 2);
/// assert_eq!(audio.frame_stereo(1), (1.0, 0.5));
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// Wrap owned interleaved samples.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is 0 or `samples.len()` is not a multiple of `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self::from_arc(Arc::from(samples), sample_rate, channels)
    }

    /// Wrap an existing shared slice without copying.
    ///
    /// # Panics
    ///
    /// Same conditions as [`AudioArc::new`].
    pub fn from_arc(samples: Arc<[f32]>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_arc(&self) -> &Arc<[f32]> {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Read one frame as a stereo pair. Mono is duplicated to both sides and
    /// channels beyond the second are ignored. Out-of-range frames are silent.
    #[inline]
    pub fn frame_stereo(&self, frame: usize) -> (f32, f32) {
        let channels = self.channels as usize;
        let base = frame * channels;
        if base + channels > self.samples.len() {
            return (0.0, 0.0);
        }
        let left = self.samples[base];
        let right = if channels > 1 { self.samples[base + 1] } else { left };
        (left, right)
    }

    /// Iterate one channel's samples.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= self.channels()`.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        assert!(
            channel < self.channels as usize,
            "channel index out of bounds"
        );
        let channels = self.channels as usize;
        (0..self.frames()).map(move |frame| self.samples[frame * channels + channel])
    }

    /// Resample to `target_sample_rate`, or return a cheap clone if already there.
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        resample_audio_arc(self, target_sample_rate)
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}

/// Min/max peaks of a mono mixdown, one pair per bucket of frames.
#[derive(Debug, Clone)]
pub struct WaveformData {
    pub peaks: Vec<(f32, f32)>,
    pub samples_per_bucket: usize,
}

impl WaveformData {
    pub fn from_audio_arc(audio: &AudioArc, samples_per_bucket: usize) -> Self {
        let samples_per_bucket = samples_per_bucket.max(1);
        let channels = audio.channels() as usize;
        let peaks = audio
            .samples()
            .chunks(samples_per_bucket * channels)
            .map(|bucket| {
                bucket
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .fold((0.0f32, 0.0f32), |(lo, hi), s| (lo.min(s), hi.max(s)))
            })
            .collect();

        Self {
            peaks,
            samples_per_bucket,
        }
    }
}

/// Sinc-resample `audio` to `target_sample_rate`.
///
/// Frame `n` of the output lines up with time `n / target_sample_rate` of the
/// input; the output length is the input duration at the new rate.
///
/// ```
/// use backtrack_transport::{AudioArc, resample_audio_arc};
///
/// let audio = AudioArc::new(vec![0.0; 44100], 44100, 1);
/// let resampled = resample_audio_arc(&audio, 48000).unwrap();
/// assert_eq!(resampled.sample_rate(), 48000);
/// assert_eq!(resampled.frames(), 48000);
/// ```
pub fn resample_audio_arc(audio: &AudioArc, target_sample_rate: u32) -> anyhow::Result<AudioArc> {
    if audio.sample_rate == target_sample_rate {
        return Ok(audio.clone());
    }
    if audio.sample_rate == 0 || target_sample_rate == 0 {
        anyhow::bail!(
            "cannot resample between {} Hz and {} Hz",
            audio.sample_rate,
            target_sample_rate
        );
    }

    let channels = audio.channels as usize;
    let input_frames = audio.frames();
    if input_frames == 0 {
        return Ok(AudioArc::new(Vec::new(), target_sample_rate, audio.channels));
    }

    let ratio = target_sample_rate as f64 / audio.sample_rate as f64;
    let output_frames = (input_frames as f64 * ratio).round() as usize;

    let input_channels: Vec<Vec<f32>> = (0..channels).map(|ch| audio.channel(ch).collect()).collect();

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input_frames, channels)?;

    // Output frame n of `process` already sits at input time n / ratio; only
    // the length needs fixing up.
    let mut planar = resampler.process(&input_channels, None)?;
    while planar[0].len() < output_frames {
        let tail = resampler.process_partial::<Vec<f32>>(None, None)?;
        if tail[0].is_empty() {
            break;
        }
        for (out, more) in planar.iter_mut().zip(tail) {
            out.extend(more);
        }
    }

    let available = planar[0].len().min(output_frames);
    let mut output = Vec::with_capacity(available * channels);
    for frame in 0..available {
        for channel in &planar {
            output.push(channel[frame]);
        }
    }

    Ok(AudioArc::new(output, target_sample_rate, audio.channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(frequency: f32, sample_rate: u32, seconds: f32, channels: u16) -> AudioArc {
        let frames = (sample_rate as f32 * seconds) as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for i in 0..frames {
            let value = (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin();
            samples.extend(std::iter::repeat_n(value, channels as usize));
        }
        AudioArc::new(samples, sample_rate, channels)
    }

    fn zero_crossings(samples: impl Iterator<Item = f32>) -> usize {
        let mut last = 0.0f32;
        let mut count = 0;
        for s in samples {
            if (last < 0.0 && s >= 0.0) || (last >= 0.0 && s < 0.0) {
                count += 1;
            }
            last = s;
        }
        count
    }

    #[test]
    #[should_panic(expected = "channels must be greater than 0")]
    fn rejects_zero_channels() {
        AudioArc::new(vec![0.0], 44100, 0);
    }

    #[test]
    #[should_panic(expected = "samples.len() must be divisible by channels")]
    fn rejects_partial_frames() {
        AudioArc::new(vec![0.0, 0.1, 0.2], 44100, 2);
    }

    #[test]
    fn clone_shares_storage() {
        let audio = AudioArc::new(vec![0.0; 1000], 44100, 2);
        let other = audio.clone();
        assert_eq!(Arc::strong_count(other.samples_arc()), 2);
    }

    #[test]
    fn frame_stereo_duplicates_mono_and_silences_past_end() {
        let mono = AudioArc::new(vec![0.25, -0.5], 8000, 1);
        assert_eq!(mono.frame_stereo(1), (-0.5, -0.5));
        assert_eq!(mono.frame_stereo(2), (0.0, 0.0));

        let quad = AudioArc::new(vec![0.1, 0.2, 0.3, 0.4], 8000, 4);
        assert_eq!(quad.frame_stereo(0), (0.1, 0.2));
    }

    #[test]
    fn duration_follows_frames() {
        let audio = AudioArc::new(vec![0.0; 48000 * 2], 48000, 2);
        assert!((audio.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn waveform_tracks_bucket_extremes() {
        let audio = AudioArc::new(vec![0.5, -0.25, 1.0, -1.0, 0.0], 8000, 1);
        let waveform = WaveformData::from_audio_arc(&audio, 2);
        assert_eq!(waveform.peaks, vec![(-0.25, 0.5), (-1.0, 1.0), (0.0, 0.0)]);
    }

    #[test]
    fn resample_same_rate_is_a_clone() {
        let audio = sine(440.0, 44100, 0.1, 2);
        let resampled = audio.resample(44100).unwrap();
        assert!(Arc::ptr_eq(audio.samples_arc(), resampled.samples_arc()));
    }

    #[test]
    fn resample_keeps_duration_and_pitch() {
        let audio = sine(440.0, 44100, 1.0, 2);
        let resampled = resample_audio_arc(&audio, 48000).unwrap();

        assert_eq!(resampled.sample_rate(), 48000);
        assert_eq!(resampled.channels(), 2);
        assert!((resampled.duration_secs() - 1.0).abs() < 0.01);

        let before = zero_crossings(audio.channel(0));
        let after = zero_crossings(resampled.channel(0));
        assert!((before as i64 - after as i64).abs() <= 4, "{before} vs {after}");
    }

    #[test]
    fn resample_lines_up_output_frames_with_input_time() {
        let audio = sine(440.0, 44100, 1.0, 1);
        let resampled = resample_audio_arc(&audio, 48000).unwrap();
        let out = resampled.samples();

        assert_eq!(resampled.frames(), 48000);
        assert!(out[0].abs() < 0.05, "first frame {}", out[0]);
        for n in [1000usize, 12345, 30000] {
            let expected = (2.0 * PI * 440.0 * n as f32 / 48000.0).sin();
            assert!((out[n] - expected).abs() < 0.05, "frame {n}: {} vs {expected}", out[n]);
        }
        // The sine runs to the end instead of fading out early.
        let tail_peak = out[47800..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail_peak > 0.5, "tail peak {tail_peak}");
    }

    #[test]
    fn resample_empty_audio() {
        let audio = AudioArc::new(Vec::new(), 44100, 2);
        let resampled = resample_audio_arc(&audio, 48000).unwrap();
        assert!(resampled.is_empty());
        assert_eq!(resampled.sample_rate(), 48000);
    }
}
