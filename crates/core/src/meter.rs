//! Level meters derived from the analysis taps.
//!
//! Track meters read the low end of each track's spectrum, master meters the
//! mid band of the post-master tap. Both are display values in `[0, 100]`.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::time::{Duration, Instant};

use backtrack_engine::{Analyser, EngineHandle};
use backtrack_transport::TrackId;

use crate::chain::TrackChain;

/// Low bins averaged for a track meter.
const TRACK_BINS: usize = 32;
/// Smoothing time constant of the track meters, in seconds.
const TRACK_TAU: f64 = 0.08;
const KNEE_THRESHOLD: f32 = 0.6;
/// Relative amplitude of the left/right display offset.
const STEREO_SPREAD: f32 = 0.05;
const STEREO_RATE_HZ: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoLevels {
    pub left: f32,
    pub right: f32,
}

struct Tap {
    analyser: Analyser,
    consumer: rtrb::Consumer<f32>,
}

impl Tap {
    fn new(consumer: rtrb::Consumer<f32>) -> Self {
        Self {
            analyser: Analyser::default(),
            consumer,
        }
    }

    fn spectrum(&mut self, bins: &mut [u8]) {
        self.analyser.drain(&mut self.consumer);
        self.analyser.byte_frequency_data(bins);
    }

    fn clear(&mut self) {
        self.analyser.drain(&mut self.consumer);
        self.analyser.clear();
    }
}

#[derive(Clone, Copy)]
struct Smoothed {
    value: f32,
    updated: Instant,
}

/// Meter sensitivity by what the track name suggests it carries.
pub fn category_factor(name: &str) -> f32 {
    let name = name.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| name.contains(w));
    if has(&["click", "metronome", "count"]) {
        2.2
    } else if has(&["bass"]) {
        1.8
    } else if has(&["drum", "kick", "snare", "perc"]) {
        1.6
    } else {
        1.3
    }
}

pub struct LevelMeter {
    taps: Vec<Option<Tap>>,
    master: Option<Tap>,
    track_interval: Duration,
    master_interval: Duration,
    tracks: HashMap<TrackId, Smoothed>,
    master_levels: StereoLevels,
    master_updated: Option<Instant>,
    epoch: Instant,
    bins: Vec<u8>,
}

fn interval_for(hz: f64) -> Duration {
    if hz > 0.0 {
        Duration::from_secs_f64(1.0 / hz)
    } else {
        Duration::ZERO
    }
}

impl LevelMeter {
    pub fn new(track_hz: f64, master_hz: f64) -> Self {
        Self {
            taps: Vec::new(),
            master: None,
            track_interval: interval_for(track_hz),
            master_interval: interval_for(master_hz),
            tracks: HashMap::new(),
            master_levels: StereoLevels::default(),
            master_updated: None,
            epoch: Instant::now(),
            bins: vec![0; Analyser::default().bin_count()],
        }
    }

    /// Take over every analysis tap of a freshly built graph.
    pub(crate) fn connect(&mut self, handle: &mut EngineHandle) {
        self.taps = (0..handle.max_tracks())
            .map(|slot| handle.take_tap(slot).map(Tap::new))
            .collect();
        self.master = handle.take_master_tap().map(Tap::new);
    }

    pub(crate) fn disconnect(&mut self) {
        self.taps.clear();
        self.master = None;
        self.reset();
    }

    /// Forget all smoothing state and buffered tap data.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.master_levels = StereoLevels::default();
        self.master_updated = None;
        for tap in self.taps.iter_mut().flatten() {
            tap.clear();
        }
        if let Some(master) = &mut self.master {
            master.clear();
        }
    }

    pub(crate) fn track_levels_at(
        &mut self,
        now: Instant,
        playing: bool,
        chains: &[TrackChain],
    ) -> HashMap<TrackId, f32> {
        let mut levels = HashMap::with_capacity(chains.len());
        for chain in chains {
            let id = chain.id();
            let Some(tap) = self.taps.get_mut(chain.slot()).and_then(Option::as_mut) else {
                self.tracks.remove(&id);
                levels.insert(id, 0.0);
                continue;
            };
            if !(playing && chain.is_playing()) {
                // Start the next run from a clean history.
                self.tracks.remove(&id);
                tap.clear();
                levels.insert(id, 0.0);
                continue;
            }

            if let Some(prev) = self.tracks.get(&id) {
                if now.saturating_duration_since(prev.updated) < self.track_interval {
                    levels.insert(id, prev.value);
                    continue;
                }
            }

            tap.spectrum(&mut self.bins);
            let n = TRACK_BINS.min(self.bins.len());
            let average = self.bins[..n].iter().map(|&b| b as f32).sum::<f32>() / n as f32;
            let raw = (average / 255.0 * 100.0 * category_factor(&chain.track().name)).clamp(0.0, 100.0);

            let value = match self.tracks.get(&id) {
                Some(prev) => {
                    let dt = now.saturating_duration_since(prev.updated).as_secs_f64();
                    let alpha = 1.0 - (-dt / TRACK_TAU).exp();
                    prev.value + (raw - prev.value) * alpha as f32
                }
                None => raw,
            };
            self.tracks.insert(id, Smoothed { value, updated: now });
            levels.insert(id, value);
        }
        levels
    }

    pub(crate) fn master_levels_at(&mut self, now: Instant, playing: bool) -> StereoLevels {
        let Some(master) = self.master.as_mut().filter(|_| playing) else {
            self.master_levels = StereoLevels::default();
            self.master_updated = None;
            return self.master_levels;
        };

        if let Some(last) = self.master_updated {
            if now.saturating_duration_since(last) < self.master_interval {
                return self.master_levels;
            }
        }

        master.spectrum(&mut self.bins);
        let lo = self.bins.len() / 10;
        let hi = self.bins.len() * 8 / 10;
        let band = &self.bins[lo..hi];
        let mean_square =
            band.iter().map(|&b| (b as f32 / 255.0).powi(2)).sum::<f32>() / band.len().max(1) as f32;
        let rms = mean_square.sqrt();

        let compressed = if rms > KNEE_THRESHOLD {
            KNEE_THRESHOLD + (1.0 - KNEE_THRESHOLD) * ((rms - KNEE_THRESHOLD) / (1.0 - KNEE_THRESHOLD)).tanh()
        } else {
            rms
        };
        let level = (compressed * 100.0).clamp(0.0, 100.0);

        // Display-only spread between the two sides.
        let t = now.saturating_duration_since(self.epoch).as_secs_f64();
        let offset = level * STEREO_SPREAD * (2.0 * PI * STEREO_RATE_HZ * t).sin() as f32;

        self.master_levels = StereoLevels {
            left: (level + offset).clamp(0.0, 100.0),
            right: (level - offset).clamp(0.0, 100.0),
        };
        self.master_updated = Some(now);
        self.master_levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_track_names() {
        assert_eq!(category_factor("Bass DI"), 1.8);
        assert_eq!(category_factor("Drums L"), 1.6);
        assert_eq!(category_factor("Snare top"), 1.6);
        assert_eq!(category_factor("Click"), 2.2);
        assert_eq!(category_factor("Count-in"), 2.2);
        assert_eq!(category_factor("Vocals"), 1.3);
    }

    #[test]
    fn master_is_silent_when_stopped() {
        let mut meter = LevelMeter::new(60.0, 30.0);
        let levels = meter.master_levels_at(Instant::now(), false);
        assert_eq!(levels, StereoLevels::default());
    }
}
