use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use backtrack_engine::{
    EngineHandle, GraphConfig, MAX_RATIO, MIN_RATIO, OutputDevice, build_graph,
};
use backtrack_transport::{
    Command, Song, SongId, Status, Track, TrackId, TransportClock, VOLUME_MAX, WaveformData,
    round_tenths,
};
use tokio::task::JoinSet;

use crate::chain::{LoadRequest, TrackChain};
use crate::click::OutputClickSink;
use crate::config::EngineConfig;
use crate::error::{EngineError, TrackLoadError};
use crate::meter::{LevelMeter, StereoLevels};
use crate::provider::AudioSourceProvider;

pub const PITCH_SEMITONE_LIMIT: f32 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Stopped,
}

/// Playback position handed to the position listener on every `update()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionEvent {
    pub song_id: SongId,
    pub seconds: f64,
    pub playing: bool,
}

/// Outcome of [`AudioEngine::load_song`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<TrackId>,
    pub failed: Vec<(TrackId, TrackLoadError)>,
    pub duration: f64,
}

impl LoadReport {
    pub fn is_playable(&self) -> bool {
        !self.loaded.is_empty()
    }
}

type DurationCallback = Box<dyn FnMut(SongId, f64) + Send>;
type PositionListener = Box<dyn FnMut(PositionEvent) + Send>;

/// Multi-track transport: loads a song's tracks, starts them together on one
/// render frame and keeps mixer state, meters and position in sync.
pub struct AudioEngine {
    config: EngineConfig,
    provider: Arc<dyn AudioSourceProvider>,
    output: Box<dyn OutputDevice>,
    handle: Option<EngineHandle>,
    click_sink: Option<OutputClickSink>,
    meter: LevelMeter,
    chains: Vec<TrackChain>,
    clock: TransportClock,
    state: EngineState,
    loading: bool,
    song_id: Option<SongId>,
    duration: f64,
    master_volume: f32,
    pitch_semitones: f32,
    on_duration_updated: Option<DurationCallback>,
    position_listener: Option<PositionListener>,
}

impl AudioEngine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn AudioSourceProvider>,
        output: Box<dyn OutputDevice>,
    ) -> Self {
        let meter = LevelMeter::new(config.track_meter_hz, config.master_meter_hz);
        Self {
            config,
            provider,
            output,
            handle: None,
            click_sink: None,
            meter,
            chains: Vec::new(),
            clock: TransportClock::new(),
            state: EngineState::Idle,
            loading: false,
            song_id: None,
            duration: 0.0,
            master_volume: VOLUME_MAX,
            pitch_semitones: 0.0,
            on_duration_updated: None,
            position_listener: None,
        }
    }

    /// Open the output device and start rendering. A device that comes up
    /// suspended gets one resume attempt.
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let output = self.output.open().map_err(EngineError::Init)?;
        let (mut handle, graph) = build_graph(GraphConfig {
            sample_rate: output.sample_rate,
            channels: output.channels,
            max_tracks: self.config.max_tracks,
            command_capacity: self.config.command_capacity,
            ramp_frames: self.config.ramp_frames(output.sample_rate),
        });
        self.output.start(graph).map_err(EngineError::Init)?;
        if self.output.is_suspended() {
            log::info!("output came up suspended, resuming");
            if let Err(e) = self.output.resume() {
                self.output.close();
                return Err(EngineError::Init(e));
            }
        }

        self.meter.connect(&mut handle);
        self.click_sink = handle
            .take_click_producer()
            .map(|producer| OutputClickSink::new(producer, handle.handle(), output.sample_rate));

        send(&mut handle, Command::SetMasterGain(self.master_volume / VOLUME_MAX));
        send(&mut handle, Command::SetPitchRatio(semitones_to_ratio(self.pitch_semitones)));

        log::info!(
            "audio engine initialized: {} Hz, {} channels, {} track slots",
            output.sample_rate,
            output.channels,
            self.config.max_tracks
        );
        self.handle = Some(handle);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// The click sink wired to this engine's output. Available once after
    /// `initialize()`.
    pub fn take_click_sink(&mut self) -> Option<OutputClickSink> {
        self.click_sink.take()
    }

    pub fn set_on_duration_updated<F>(&mut self, callback: F)
    where
        F: FnMut(SongId, f64) + Send + 'static,
    {
        self.on_duration_updated = Some(Box::new(callback));
    }

    pub fn set_position_listener<F>(&mut self, listener: F)
    where
        F: FnMut(PositionEvent) + Send + 'static,
    {
        self.position_listener = Some(Box::new(listener));
    }

    /// Replace the current song with `song`, loading all of its tracks in
    /// parallel. Tracks that fail are left out; the song is playable when at
    /// least one track loaded. `song.duration` is set from the decoded audio.
    pub async fn load_song(&mut self, song: &mut Song) -> Result<LoadReport, EngineError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(EngineError::NotInitialized);
        };

        // The loads below are owned by this future: dropping it aborts them,
        // and the next call starts from a cleared track set.
        self.loading = true;
        self.state = EngineState::Loading;

        self.clock.stop();
        for chain in &mut self.chains {
            chain.dispose(&mut handle.commands);
        }
        self.chains.clear();
        self.meter.reset();
        self.duration = 0.0;
        self.song_id = Some(song.id);

        log::info!(
            "loading {} '{}' ({} tracks)",
            song.id,
            song.title,
            song.tracks.len()
        );

        let mut report = LoadReport::default();
        let mut loads = JoinSet::new();
        let sample_rate = handle.sample_rate();
        for (slot, track) in song.tracks.iter().enumerate() {
            if slot >= handle.max_tracks() {
                log::warn!("{}: no free track slot, skipping", track.id);
                report.failed.push((track.id, TrackLoadError::Cancelled));
                continue;
            }
            let request = LoadRequest {
                track: track.clone(),
                slot,
                sample_rate,
                preview_seconds: self.config.preview_seconds,
            };
            let provider = self.provider.clone();
            let id = track.id;
            loads.spawn(async move { (id, TrackChain::load(request, provider).await) });
        }

        let mut chains = Vec::new();
        while let Some(joined) = loads.join_next().await {
            match joined {
                Ok((_, Ok(chain))) => chains.push(chain),
                Ok((id, Err(e))) => {
                    log::warn!("{id}: {e}");
                    report.failed.push((id, e));
                }
                Err(e) => log::warn!("track load task failed: {e}"),
            }
        }

        chains.sort_by_key(TrackChain::slot);
        let any_solo = chains.iter().any(|c| c.track().solo);
        for chain in &mut chains {
            chain.attach(&mut handle.commands, any_solo);
        }
        self.chains = chains;
        report.loaded = self.chains.iter().map(TrackChain::id).collect();

        self.duration = self.longest_chain();
        report.duration = self.duration;
        if !self.chains.is_empty() {
            song.duration = self.duration;
            if let Some(callback) = self.on_duration_updated.as_mut() {
                callback(song.id, self.duration);
            }
        }

        self.loading = false;
        self.state = EngineState::Ready;
        log::info!(
            "{}: {} of {} tracks ready, {:.1}s",
            song.id,
            report.loaded.len(),
            song.tracks.len(),
            self.duration
        );
        Ok(report)
    }

    /// Start every loaded track from the current position on one common
    /// render frame.
    pub fn play(&mut self) -> Result<(), EngineError> {
        if self.handle.is_none() {
            return Err(EngineError::NotInitialized);
        }
        if self.loading {
            log::warn!("play ignored: song is still loading");
            return Ok(());
        }
        if self.chains.is_empty() {
            log::warn!("play ignored: no tracks loaded");
            return Ok(());
        }
        if self.clock.is_playing() {
            log::warn!("play ignored: already playing");
            return Ok(());
        }

        if self.output.is_suspended() {
            self.output.resume().map_err(EngineError::Device)?;
        }

        let Some(handle) = self.handle.as_mut() else {
            return Err(EngineError::NotInitialized);
        };
        let sample_rate = handle.sample_rate();
        let at_frame = handle.frames() + self.config.lookahead_frames(sample_rate);
        let offset = self.clock.start(at_frame as f64 / sample_rate as f64);

        log::debug!("starting {} tracks at {offset:.3}s on frame {at_frame}", self.chains.len());
        for chain in &mut self.chains {
            chain.play(&mut handle.commands, offset, at_frame);
        }
        self.state = EngineState::Playing;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(EngineError::NotInitialized);
        };
        if !self.clock.is_playing() {
            return Ok(());
        }
        self.clock.pause(handle.seconds(), self.duration);
        for chain in &mut self.chains {
            chain.pause(&mut handle.commands);
        }
        self.state = EngineState::Paused;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), EngineError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(EngineError::NotInitialized);
        };
        self.clock.stop();
        for chain in &mut self.chains {
            chain.stop(&mut handle.commands);
        }
        if !self.loading && self.state != EngineState::Idle {
            self.state = EngineState::Stopped;
        }
        Ok(())
    }

    /// Jump to `seconds`. Playback stops, and restarts from the new position
    /// if it was running.
    pub fn seek(&mut self, seconds: f64) -> Result<(), EngineError> {
        let was_playing = self.clock.is_playing();
        self.stop()?;
        let target = if self.duration > 0.0 {
            seconds.clamp(0.0, self.duration)
        } else {
            seconds.max(0.0)
        };
        self.clock.park(target);
        if was_playing {
            self.play()
        } else {
            if target > 0.0 && !self.chains.is_empty() {
                self.state = EngineState::Paused;
            }
            Ok(())
        }
    }

    fn position(&self) -> f64 {
        let now = self.handle.as_ref().map_or(0.0, EngineHandle::seconds);
        self.clock.position(now, self.duration)
    }

    /// Song position in seconds, rounded to tenths.
    pub fn current_time(&self) -> f64 {
        round_tenths(self.position())
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn song_id(&self) -> Option<SongId> {
        self.song_id
    }

    pub fn loaded_track_count(&self) -> usize {
        self.chains.len()
    }

    pub fn chains(&self) -> &[TrackChain] {
        &self.chains
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.chain(id).map(TrackChain::track)
    }

    fn chain(&self, id: TrackId) -> Option<&TrackChain> {
        self.chains.iter().find(|c| c.id() == id)
    }

    fn with_chain<R>(
        &mut self,
        id: TrackId,
        f: impl FnOnce(&mut TrackChain, &mut EngineHandle) -> R,
    ) -> Result<R, EngineError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(EngineError::NotInitialized);
        };
        let chain = self
            .chains
            .iter_mut()
            .find(|c| c.id() == id)
            .ok_or(EngineError::UnknownTrack(id))?;
        Ok(f(chain, handle))
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    /// Master volume, 0 to 100.
    pub fn set_master_volume(&mut self, volume: f32) -> Result<(), EngineError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(EngineError::NotInitialized);
        };
        self.master_volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, VOLUME_MAX) };
        send(handle, Command::SetMasterGain(self.master_volume / VOLUME_MAX));
        Ok(())
    }

    pub fn set_track_volume(&mut self, id: TrackId, volume: f32) -> Result<(), EngineError> {
        self.with_chain(id, |chain, handle| chain.set_volume(&mut handle.commands, volume))
    }

    pub fn set_track_balance(&mut self, id: TrackId, balance: f32) -> Result<(), EngineError> {
        self.with_chain(id, |chain, handle| chain.set_balance(&mut handle.commands, balance))
    }

    /// Returns the new mute flag.
    pub fn toggle_track_mute(&mut self, id: TrackId) -> Result<bool, EngineError> {
        self.with_chain(id, |chain, handle| chain.toggle_mute(&mut handle.commands))
    }

    /// Returns the new solo flag. Every chain's audibility is re-evaluated.
    pub fn toggle_track_solo(&mut self, id: TrackId) -> Result<bool, EngineError> {
        let solo = self.with_chain(id, |chain, _| chain.toggle_solo())?;
        let any_solo = self.chains.iter().any(|c| c.track().solo);
        if let Some(handle) = self.handle.as_mut() {
            for chain in &mut self.chains {
                chain.update_solo_state(&mut handle.commands, any_solo);
            }
        }
        Ok(solo)
    }

    /// Shift the master bus by `semitones`, clamped to one octave either way.
    pub fn set_pitch_semitones(&mut self, semitones: f32) -> Result<(), EngineError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(EngineError::NotInitialized);
        };
        self.pitch_semitones = if semitones.is_finite() {
            semitones.clamp(-PITCH_SEMITONE_LIMIT, PITCH_SEMITONE_LIMIT)
        } else {
            0.0
        };
        send(handle, Command::SetPitchRatio(semitones_to_ratio(self.pitch_semitones)));
        Ok(())
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_semitones
    }

    /// Ratio handed to the pitch shifter for the current setting.
    pub fn pitch_ratio(&self) -> f32 {
        semitones_to_ratio(self.pitch_semitones)
    }

    pub fn waveform(&self, id: TrackId, samples_per_bucket: usize) -> Option<WaveformData> {
        self.chain(id)?.waveform(samples_per_bucket)
    }

    /// Housekeeping for the control side; call once per UI frame.
    pub fn update(&mut self) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };

        while let Ok(status) = handle.status.pop() {
            match status {
                Status::VoiceEnded { slot } => {
                    if let Some(chain) = self.chains.iter_mut().find(|c| c.slot() == slot) {
                        chain.ended();
                    }
                }
                Status::Starved { slot } => log::debug!("slot {slot} is waiting for audio"),
            }
        }

        let mut refined = false;
        for chain in &mut self.chains {
            if chain.poll_background(&mut handle.commands) {
                refined = true;
            }
        }
        if refined {
            let longest = self.longest_chain();
            if (longest - self.duration).abs() > f64::EPSILON {
                log::debug!("duration refined {:.2}s -> {:.2}s", self.duration, longest);
                self.duration = longest;
            }
        }

        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        handle.collect();

        // A length that still rests on container estimates only ends the song
        // once every voice has run out.
        let settled = self.chains.iter().all(TrackChain::is_fully_decoded)
            || self.chains.iter().all(|c| !c.is_playing());
        if self.clock.is_playing()
            && self.duration > 0.0
            && settled
            && self.position() >= self.duration
        {
            log::info!("end of song");
            let _ = self.stop();
        }

        if let Some(song_id) = self.song_id {
            let event = PositionEvent {
                song_id,
                seconds: self.current_time(),
                playing: self.clock.is_playing(),
            };
            if let Some(listener) = self.position_listener.as_mut() {
                listener(event);
            }
        }
    }

    pub fn get_audio_levels(&mut self) -> HashMap<TrackId, f32> {
        let playing = self.clock.is_playing();
        self.meter.track_levels_at(Instant::now(), playing, &self.chains)
    }

    pub fn get_master_stereo_levels(&mut self) -> StereoLevels {
        let playing = self.clock.is_playing();
        self.meter.master_levels_at(Instant::now(), playing)
    }

    /// Stop, release every chain and close the output device.
    pub fn dispose(&mut self) {
        self.clock.stop();
        if let Some(mut handle) = self.handle.take() {
            for chain in &mut self.chains {
                chain.dispose(&mut handle.commands);
            }
            self.output.close();
            handle.collect();
        }
        self.chains.clear();
        self.meter.disconnect();
        self.click_sink = None;
        self.loading = false;
        self.duration = 0.0;
        self.song_id = None;
        self.state = EngineState::Idle;
        log::info!("audio engine disposed");
    }

    fn longest_chain(&self) -> f64 {
        self.chains.iter().map(TrackChain::duration).fold(0.0, f64::max)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.dispose();
        }
    }
}

/// Ratio read by the pitch shifter for a shift of `semitones`. The shifter
/// reads grains at `1 / ratio`, so raising the pitch means a ratio below one.
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2f32.powf(-semitones / 12.0).clamp(MIN_RATIO, MAX_RATIO)
}

fn send(handle: &mut EngineHandle, cmd: Command) {
    if handle.commands.send(cmd).is_err() {
        log::warn!("render command queue is full, dropping command");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semitones_map_to_inverse_ratio() {
        assert_eq!(semitones_to_ratio(0.0), 1.0);
        assert!((semitones_to_ratio(12.0) - 0.5).abs() < 1e-6);
        assert!((semitones_to_ratio(-12.0) - 2.0).abs() < 1e-6);
        assert!(semitones_to_ratio(7.0) < 1.0);
    }
}
