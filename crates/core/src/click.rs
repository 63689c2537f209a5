//! Count-in and metronome scheduling.
//!
//! Clicks run on a tokio interval, not on the audio clock, so over a long song
//! they can drift against the tracks by the difference of the two clocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backtrack_engine::{ClickEvent, ClickSound, synthesize};
use basedrop::{Handle, Shared};
use tokio::task::JoinHandle;

use crate::error::ClickError;

pub const BEATS_PER_MEASURE: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct ClickConfig {
    pub bpm: f64,
    /// Measures of count-in, 1 to 4.
    pub count_in_measures: u8,
    /// Click volume, 0 to 100.
    pub volume: f32,
    pub enabled: bool,
    pub accent_downbeat: bool,
    pub sound: ClickSound,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            count_in_measures: 1,
            volume: 80.0,
            enabled: true,
            accent_downbeat: true,
            sound: ClickSound::Woodblock,
        }
    }
}

impl ClickConfig {
    pub fn beat_interval(&self) -> Result<Duration, ClickError> {
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(ClickError::InvalidTempo);
        }
        Ok(Duration::from_secs_f64(60.0 / self.bpm))
    }

    pub fn count_in_clicks(&self) -> u32 {
        self.count_in_measures.clamp(1, 4) as u32 * BEATS_PER_MEASURE
    }

    fn gain(&self) -> f32 {
        volume_to_gain(self.volume)
    }
}

fn volume_to_gain(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 100.0) / 100.0
    }
}

/// Where rendered clicks go.
pub trait ClickSink: Send + 'static {
    /// Get ready to play `sound` soon, e.g. by rendering it ahead of time.
    fn prepare(&mut self, sound: ClickSound);
    fn trigger(&mut self, sound: ClickSound, accent: bool);
    /// Gain in `[0, 1]`.
    fn set_volume(&mut self, gain: f32);
    /// Cut clicks that are still ringing.
    fn silence(&mut self);
}

/// Feeds clicks into the engine's click bus.
pub struct OutputClickSink {
    producer: rtrb::Producer<ClickEvent>,
    handle: Handle,
    sample_rate: u32,
    rendered: HashMap<(ClickSound, bool), Shared<Vec<f32>>>,
}

impl OutputClickSink {
    pub(crate) fn new(producer: rtrb::Producer<ClickEvent>, handle: Handle, sample_rate: u32) -> Self {
        Self {
            producer,
            handle,
            sample_rate,
            rendered: HashMap::new(),
        }
    }

    fn rendered(&mut self, sound: ClickSound, accent: bool) -> Shared<Vec<f32>> {
        let handle = &self.handle;
        let sample_rate = self.sample_rate;
        self.rendered
            .entry((sound, accent))
            .or_insert_with(|| Shared::new(handle, synthesize(sound, accent, sample_rate)))
            .clone()
    }

    fn push(&mut self, event: ClickEvent) {
        if self.producer.push(event).is_err() {
            log::debug!("click queue is full, dropping click event");
        }
    }
}

impl ClickSink for OutputClickSink {
    fn prepare(&mut self, sound: ClickSound) {
        self.rendered(sound, false);
        self.rendered(sound, true);
    }

    fn trigger(&mut self, sound: ClickSound, accent: bool) {
        let samples = self.rendered(sound, accent);
        self.push(ClickEvent::Trigger(samples));
    }

    fn set_volume(&mut self, gain: f32) {
        self.push(ClickEvent::SetVolume(gain));
    }

    fn silence(&mut self) {
        self.push(ClickEvent::Silence);
    }
}

/// Schedules count-ins and a free-running metronome on a tokio runtime.
pub struct ClickGenerator<S: ClickSink> {
    sink: Arc<Mutex<S>>,
    run: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl<S: ClickSink> ClickGenerator<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            run: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn sink(&self) -> Arc<Mutex<S>> {
        self.sink.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Play `count_in_clicks()` clicks one beat apart, then call `on_complete`
    /// one beat after the last click. Replaces any running schedule.
    pub fn start_count_in<F>(&mut self, config: &ClickConfig, on_complete: F) -> Result<(), ClickError>
    where
        F: FnOnce() + Send + 'static,
    {
        let period = config.beat_interval()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClickError::NoRuntime)?;
        let run = self.begin(config);

        let clicks = config.count_in_clicks();
        let sound = config.sound;
        let accent = config.accent_downbeat;
        let sink = self.sink.clone();
        let current = self.run.clone();

        log::debug!("count-in: {clicks} clicks at {:.1} bpm", config.bpm);
        self.task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            for i in 0..clicks {
                ticker.tick().await;
                if current.load(Ordering::Acquire) != run {
                    return;
                }
                if let Ok(mut sink) = sink.lock() {
                    sink.trigger(sound, accent && i % BEATS_PER_MEASURE == 0);
                }
            }
            ticker.tick().await;
            if current.load(Ordering::Acquire) == run {
                on_complete();
            }
        }));
        Ok(())
    }

    /// Click every beat until [`ClickGenerator::stop`]. A disabled config
    /// only stops what is running.
    pub fn start_continuous(&mut self, config: &ClickConfig) -> Result<(), ClickError> {
        if !config.enabled {
            self.stop();
            return Ok(());
        }
        let period = config.beat_interval()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClickError::NoRuntime)?;
        let run = self.begin(config);

        let sound = config.sound;
        let accent = config.accent_downbeat;
        let sink = self.sink.clone();
        let current = self.run.clone();

        self.task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut beat: u64 = 0;
            loop {
                ticker.tick().await;
                if current.load(Ordering::Acquire) != run {
                    return;
                }
                if let Ok(mut sink) = sink.lock() {
                    sink.trigger(sound, accent && beat % BEATS_PER_MEASURE as u64 == 0);
                }
                beat += 1;
            }
        }));
        Ok(())
    }

    /// Cancel every pending click. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.run.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Ok(mut sink) = self.sink.lock() {
            sink.silence();
        }
    }

    /// Change the click volume (0 to 100) without touching the schedule.
    pub fn set_volume(&self, volume: f32) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.set_volume(volume_to_gain(volume));
        }
    }

    /// Play a single unaccented click.
    pub fn preview(&self, sound: ClickSound) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.prepare(sound);
            sink.trigger(sound, false);
        }
    }

    fn begin(&mut self, config: &ClickConfig) -> u64 {
        self.stop();
        if let Ok(mut sink) = self.sink.lock() {
            sink.prepare(config.sound);
            sink.set_volume(config.gain());
        }
        self.run.load(Ordering::Acquire)
    }
}

impl<S: ClickSink> Drop for ClickGenerator<S> {
    fn drop(&mut self) {
        self.run.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
