//! Metronome click synthesis.
//!
//! Clicks are rendered once into mono buffers on the control side and handed
//! to the render thread, which only mixes them.

use std::f32::consts::PI;

use basedrop::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClickSound {
    Square,
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Woodblock,
    Kick,
    HiHat,
}

impl ClickSound {
    pub const ALL: [ClickSound; 7] = [
        ClickSound::Square,
        ClickSound::Sine,
        ClickSound::Triangle,
        ClickSound::Sawtooth,
        ClickSound::Woodblock,
        ClickSound::Kick,
        ClickSound::HiHat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ClickSound::Square => "square",
            ClickSound::Sine => "sine",
            ClickSound::Triangle => "triangle",
            ClickSound::Sawtooth => "sawtooth",
            ClickSound::Woodblock => "woodblock",
            ClickSound::Kick => "kick",
            ClickSound::HiHat => "hihat",
        }
    }
}

impl std::str::FromStr for ClickSound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClickSound::ALL
            .into_iter()
            .find(|sound| sound.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown click sound '{s}'"))
    }
}

/// Control → render messages for the click bus.
pub enum ClickEvent {
    /// Start playing a rendered click right away.
    Trigger(Shared<Vec<f32>>),
    /// Click bus gain in `[0, 1]`, ramped.
    SetVolume(f32),
    /// Cut every click that is still ringing.
    Silence,
}

#[derive(Clone, Copy)]
enum Wave {
    Square,
    Sine,
    Triangle,
    Sawtooth,
}

impl Wave {
    fn at(self, phase: f32) -> f32 {
        let p = phase.fract();
        match self {
            Wave::Sine => (2.0 * PI * p).sin(),
            Wave::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Wave::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
            Wave::Sawtooth => 2.0 * p - 1.0,
        }
    }
}

/// Oscillator click: frequency, peak gain and length in seconds for the
/// normal and accented variants.
struct Tone {
    wave: Wave,
    freq: (f32, f32),
    gain: (f32, f32),
    length: f32,
}

const SQUARE: Tone = Tone {
    wave: Wave::Square,
    freq: (800.0, 1200.0),
    gain: (0.25, 0.35),
    length: 0.03,
};
const SINE: Tone = Tone {
    wave: Wave::Sine,
    freq: (1000.0, 1500.0),
    gain: (0.5, 0.7),
    length: 0.05,
};
const TRIANGLE: Tone = Tone {
    wave: Wave::Triangle,
    freq: (880.0, 1320.0),
    gain: (0.5, 0.7),
    length: 0.05,
};
const SAWTOOTH: Tone = Tone {
    wave: Wave::Sawtooth,
    freq: (600.0, 900.0),
    gain: (0.25, 0.35),
    length: 0.04,
};

/// Render one click. Accented clicks are louder and higher.
pub fn synthesize(sound: ClickSound, accent: bool, sample_rate: u32) -> Vec<f32> {
    let sr = sample_rate.max(1) as f32;
    match sound {
        ClickSound::Square => tone(&SQUARE, accent, sr),
        ClickSound::Sine => tone(&SINE, accent, sr),
        ClickSound::Triangle => tone(&TRIANGLE, accent, sr),
        ClickSound::Sawtooth => tone(&SAWTOOTH, accent, sr),
        ClickSound::Woodblock => woodblock(accent, sr),
        ClickSound::Kick => kick(accent, sr),
        ClickSound::HiHat => hihat(accent, sr),
    }
}

fn pick(pair: (f32, f32), accent: bool) -> f32 {
    if accent { pair.1 } else { pair.0 }
}

fn len_for(seconds: f32, sr: f32) -> usize {
    ((seconds * sr) as usize).max(1)
}

fn tone(tone: &Tone, accent: bool, sr: f32) -> Vec<f32> {
    let freq = pick(tone.freq, accent);
    let gain = pick(tone.gain, accent);
    let len = len_for(tone.length, sr);
    // 1 ms attack, exponential decay to about -60 dB at the end.
    let attack = len_for(0.001, sr) as f32;
    let decay = 6.9 / len as f32;
    (0..len)
        .map(|i| {
            let t = i as f32;
            let env = (t / attack).min(1.0) * (-decay * t).exp();
            tone.wave.at(freq * t / sr) * env * gain
        })
        .collect()
}

fn woodblock(accent: bool, sr: f32) -> Vec<f32> {
    let base = if accent { 1200.0 } else { 800.0 };
    let gain = if accent { 0.8 } else { 0.6 };
    let partials = [(1.0, 0.6, 60.0), (2.0, 0.3, 90.0), (3.7, 0.15, 140.0)];
    let len = len_for(0.06, sr);
    (0..len)
        .map(|i| {
            let t = i as f32 / sr;
            partials
                .iter()
                .map(|&(mult, amp, damping)| {
                    (2.0 * PI * base * mult * t).sin() * amp * (-damping * t).exp()
                })
                .sum::<f32>()
                * gain
        })
        .collect()
}

fn kick(accent: bool, sr: f32) -> Vec<f32> {
    let (start, end) = if accent { (180.0, 50.0) } else { (140.0, 45.0) };
    let gain = if accent { 0.95 } else { 0.75 };
    let len = len_for(0.15, sr);
    let mut phase = 0.0f32;
    (0..len)
        .map(|i| {
            let t = i as f32 / sr;
            let freq = end + (start - end) * (-t * 30.0).exp();
            phase += freq / sr;
            (2.0 * PI * phase).sin() * (-t * 20.0).exp() * gain
        })
        .collect()
}

fn hihat(accent: bool, sr: f32) -> Vec<f32> {
    let gain = if accent { 0.5 } else { 0.3 };
    let length = if accent { 0.06 } else { 0.04 };
    let len = len_for(length, sr);
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    // One-pole high-pass at roughly 7 kHz.
    let rc = 1.0 / (2.0 * PI * 7000.0);
    let alpha = rc / (rc + 1.0 / sr);
    let mut prev_in = 0.0f32;
    let mut prev_out = 0.0f32;
    (0..len)
        .map(|i| {
            let x = rng.f32() * 2.0 - 1.0;
            let y = alpha * (prev_out + x - prev_in);
            prev_in = x;
            prev_out = y;
            let t = i as f32 / sr;
            y * (-t / (length * 0.25)).exp() * gain
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0, |m, s| m.max(s.abs()))
    }

    fn energy(samples: &[f32]) -> f32 {
        samples.iter().map(|s| s * s).sum()
    }

    #[test]
    fn every_sound_renders_bounded_audio() {
        for sound in ClickSound::ALL {
            for accent in [false, true] {
                let click = synthesize(sound, accent, 48000);
                assert!(!click.is_empty(), "{sound:?}");
                let p = peak(&click);
                assert!(p > 0.01 && p <= 1.0, "{sound:?} accent={accent} peak={p}");
            }
        }
    }

    #[test]
    fn accent_is_louder() {
        for sound in ClickSound::ALL {
            let normal = synthesize(sound, false, 48000);
            let accent = synthesize(sound, true, 48000);
            assert!(energy(&accent) > energy(&normal), "{sound:?}");
        }
    }

    #[test]
    fn clicks_decay_to_near_silence() {
        for sound in ClickSound::ALL {
            let click = synthesize(sound, false, 48000);
            let tail = &click[click.len() * 9 / 10..];
            assert!(peak(tail) < 0.1, "{sound:?}");
        }
    }

    #[test]
    fn parses_sound_names() {
        assert_eq!("WoodBlock".parse::<ClickSound>(), Ok(ClickSound::Woodblock));
        assert!("cowbell".parse::<ClickSound>().is_err());
    }
}
