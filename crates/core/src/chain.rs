use std::sync::Arc;

use backtrack_decode::{AudioResource, ProgressiveDecoder, decode_resource};
use backtrack_engine::CommandSender;
use backtrack_transport::{AudioArc, Command, Track, TrackId, WaveformData};
use tokio::sync::oneshot;

use crate::error::TrackLoadError;
use crate::provider::AudioSourceProvider;

/// Everything needed to turn a track into a chain.
pub(crate) struct LoadRequest {
    pub track: Track,
    pub slot: usize,
    pub sample_rate: u32,
    pub preview_seconds: f64,
}

struct PreviewReady {
    audio: AudioArc,
    complete: bool,
    estimated_duration: Option<f64>,
}

/// Playback chain of one track: the track's mixer state plus the decoded
/// audio feeding its voice on the render thread.
///
/// A chain becomes playable as soon as a short prefix is decoded; the rest of
/// the track keeps decoding in the background and is picked up by
/// [`TrackChain::poll_background`].
pub struct TrackChain {
    track: Track,
    slot: usize,
    sample_rate: u32,
    preview: Option<AudioArc>,
    buffer: Option<AudioArc>,
    estimated_duration: Option<f64>,
    pending: Option<oneshot::Receiver<anyhow::Result<AudioArc>>>,
    any_solo: bool,
    playing: bool,
    starts: usize,
}

impl TrackChain {
    pub(crate) async fn load(
        request: LoadRequest,
        provider: Arc<dyn AudioSourceProvider>,
    ) -> Result<TrackChain, TrackLoadError> {
        let resource = provider
            .resolve(&request.track)
            .await
            .map_err(TrackLoadError::Provider)?
            .ok_or(TrackLoadError::NotFound)?;
        if resource.is_empty() {
            return Err(TrackLoadError::Empty);
        }

        let (preview_tx, preview_rx) = oneshot::channel();
        let (full_tx, full_rx) = oneshot::channel();
        let sample_rate = request.sample_rate;
        let preview_seconds = request.preview_seconds;
        tokio::task::spawn_blocking(move || {
            decode_in_background(resource, sample_rate, preview_seconds, preview_tx, full_tx)
        });

        let mut chain = TrackChain::new(request.track, request.slot, sample_rate);
        chain.settle(preview_rx.await, full_rx).await?;
        Ok(chain)
    }

    fn new(track: Track, slot: usize, sample_rate: u32) -> Self {
        TrackChain {
            track,
            slot,
            sample_rate,
            preview: None,
            buffer: None,
            estimated_duration: None,
            pending: None,
            any_solo: false,
            playing: false,
            starts: 0,
        }
    }

    /// Install the first decode result. A preview only stands in for the
    /// track when its full length is known up front; otherwise the load waits
    /// for the whole decode so the song duration is never a guess.
    async fn settle(
        &mut self,
        preview: Result<anyhow::Result<PreviewReady>, oneshot::error::RecvError>,
        full_rx: oneshot::Receiver<anyhow::Result<AudioArc>>,
    ) -> Result<(), TrackLoadError> {
        match preview {
            Ok(Ok(ready)) if ready.complete => {
                self.estimated_duration = ready.estimated_duration;
                self.buffer = Some(ready.audio);
            }
            Ok(Ok(ready)) if ready.estimated_duration.is_some() => {
                self.estimated_duration = ready.estimated_duration;
                self.preview = Some(ready.audio);
                self.pending = Some(full_rx);
            }
            Ok(Ok(_)) => {
                log::debug!("{}: length unknown, waiting for full decode", self.track.id);
                self.buffer = Some(Self::full(full_rx).await?);
            }
            Ok(Err(e)) => {
                log::debug!(
                    "{}: preview decode failed ({e}), waiting for full decode",
                    self.track.id
                );
                self.buffer = Some(Self::full(full_rx).await?);
            }
            Err(_) => return Err(TrackLoadError::Cancelled),
        }
        Ok(())
    }

    async fn full(
        full_rx: oneshot::Receiver<anyhow::Result<AudioArc>>,
    ) -> Result<AudioArc, TrackLoadError> {
        full_rx
            .await
            .map_err(|_| TrackLoadError::Cancelled)?
            .map_err(TrackLoadError::Decode)
    }

    pub fn id(&self) -> TrackId {
        self.track.id
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// How often this chain has been started.
    pub fn starts(&self) -> usize {
        self.starts
    }

    /// Seconds of fully decoded audio; 0 until the background decode lands.
    pub fn buffered_duration(&self) -> f64 {
        self.buffer.as_ref().map_or(0.0, AudioArc::duration_secs)
    }

    /// Best known length of the track: the decoded length once the full
    /// buffer is in, the container's estimate before that.
    pub fn duration(&self) -> f64 {
        if let Some(buffer) = &self.buffer {
            return buffer.duration_secs();
        }
        let preview = self.preview.as_ref().map_or(0.0, AudioArc::duration_secs);
        self.estimated_duration.unwrap_or(0.0).max(preview)
    }

    pub fn is_fully_decoded(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn waveform(&self, samples_per_bucket: usize) -> Option<WaveformData> {
        self.buffer
            .as_ref()
            .map(|audio| WaveformData::from_audio_arc(audio, samples_per_bucket))
    }

    pub fn is_effectively_muted(&self) -> bool {
        self.track.muted || (self.any_solo && !self.track.solo)
    }

    /// Gain the track currently contributes to the mix.
    pub fn effective_gain(&self) -> f32 {
        if self.is_effectively_muted() {
            0.0
        } else {
            self.track.gain()
        }
    }

    /// Install the decoded audio and the mixer state on the chain's voice.
    pub(crate) fn attach(&mut self, tx: &mut CommandSender, any_solo: bool) {
        self.any_solo = any_solo;
        let (audio, complete) = match (&self.buffer, &self.preview) {
            (Some(buffer), _) => (buffer.clone(), true),
            (None, Some(preview)) => (preview.clone(), false),
            (None, None) => return,
        };
        let audio = tx.share(audio);
        send(tx, Command::SetSource { slot: self.slot, audio, complete });
        send(tx, Command::SetGain { slot: self.slot, gain: self.track.gain() });
        send(tx, Command::SetPan { slot: self.slot, pan: self.track.pan() });
        send(tx, Command::SetMute { slot: self.slot, muted: self.is_effectively_muted() });
        self.connect_analyzer(tx, true);
    }

    /// Start at `offset` seconds on render frame `at_frame`.
    pub(crate) fn play(&mut self, tx: &mut CommandSender, offset: f64, at_frame: u64) {
        // The full buffer bounds the offset once it exists.
        let limit = if self.buffer.is_some() {
            self.buffered_duration()
        } else {
            self.duration()
        };
        let offset = offset.clamp(0.0, limit.max(0.0));
        let offset_frames = (offset * self.sample_rate as f64).round() as u64;
        send(
            tx,
            Command::Start {
                slot: self.slot,
                offset_frames,
                at_frame,
            },
        );
        self.playing = true;
        self.starts += 1;
    }

    pub(crate) fn pause(&mut self, tx: &mut CommandSender) {
        send(tx, Command::Pause { slot: self.slot });
        self.playing = false;
    }

    pub(crate) fn stop(&mut self, tx: &mut CommandSender) {
        send(tx, Command::Stop { slot: self.slot });
        self.playing = false;
    }

    /// The voice ran off the end of the track.
    pub(crate) fn ended(&mut self) {
        self.playing = false;
    }

    pub(crate) fn set_volume(&mut self, tx: &mut CommandSender, volume: f32) {
        self.track.set_volume(volume);
        send(tx, Command::SetGain { slot: self.slot, gain: self.track.gain() });
    }

    pub(crate) fn set_balance(&mut self, tx: &mut CommandSender, balance: f32) {
        self.track.set_balance(balance);
        send(tx, Command::SetPan { slot: self.slot, pan: self.track.pan() });
    }

    pub(crate) fn toggle_mute(&mut self, tx: &mut CommandSender) -> bool {
        self.track.muted = !self.track.muted;
        self.push_mute(tx);
        self.track.muted
    }

    /// Flip the solo flag. The engine re-evaluates every chain afterwards.
    pub(crate) fn toggle_solo(&mut self) -> bool {
        self.track.solo = !self.track.solo;
        self.track.solo
    }

    pub(crate) fn update_solo_state(&mut self, tx: &mut CommandSender, any_solo: bool) {
        self.any_solo = any_solo;
        self.push_mute(tx);
    }

    pub(crate) fn connect_analyzer(&mut self, tx: &mut CommandSender, enabled: bool) {
        send(tx, Command::SetTap { slot: self.slot, enabled });
    }

    fn push_mute(&self, tx: &mut CommandSender) {
        send(
            tx,
            Command::SetMute {
                slot: self.slot,
                muted: self.is_effectively_muted(),
            },
        );
    }

    /// Pick up the background decode if it finished. Returns true when the
    /// full buffer was attached by this call.
    pub(crate) fn poll_background(&mut self, tx: &mut CommandSender) -> bool {
        let Some(pending) = self.pending.as_mut() else {
            return false;
        };
        match pending.try_recv() {
            Ok(Ok(full)) => {
                self.pending = None;
                log::debug!(
                    "{}: full decode ready ({:.2}s)",
                    self.track.id,
                    full.duration_secs()
                );
                let audio = tx.share(full.clone());
                send(tx, Command::SetSource { slot: self.slot, audio, complete: true });
                self.buffer = Some(full);
                self.preview = None;
                true
            }
            Ok(Err(e)) => {
                self.pending = None;
                log::warn!("{}: background decode failed: {e}", self.track.id);
                // The prefix becomes the whole track so the voice ends there
                // instead of starving.
                let Some(preview) = self.preview.take() else {
                    return false;
                };
                let audio = tx.share(preview.clone());
                send(tx, Command::SetSource { slot: self.slot, audio, complete: true });
                self.buffer = Some(preview);
                true
            }
            Err(oneshot::error::TryRecvError::Empty) => false,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.pending = None;
                false
            }
        }
    }

    pub(crate) fn dispose(&mut self, tx: &mut CommandSender) {
        send(tx, Command::ClearVoice { slot: self.slot });
        self.playing = false;
        self.pending = None;
        self.preview = None;
        self.buffer = None;
    }
}

fn send(tx: &mut CommandSender, cmd: Command) {
    if tx.send(cmd).is_err() {
        log::warn!("render command queue is full, dropping command");
    }
}

fn decode_in_background(
    resource: AudioResource,
    sample_rate: u32,
    preview_seconds: f64,
    preview_tx: oneshot::Sender<anyhow::Result<PreviewReady>>,
    full_tx: oneshot::Sender<anyhow::Result<AudioArc>>,
) {
    let preview = ProgressiveDecoder::open(&resource).and_then(|mut decoder| {
        let estimated_duration = decoder.estimated_duration();
        let preview = decoder.preview(preview_seconds)?;
        let audio = preview.audio.resample(sample_rate)?;
        Ok((
            decoder,
            PreviewReady {
                audio,
                complete: preview.complete,
                estimated_duration,
            },
        ))
    });

    match preview {
        Ok((_, ready)) if ready.complete => {
            let _ = preview_tx.send(Ok(ready));
        }
        Ok((decoder, ready)) => {
            if preview_tx.send(Ok(ready)).is_err() {
                return;
            }
            let full = decoder.finish().and_then(|audio| audio.resample(sample_rate));
            let _ = full_tx.send(full);
        }
        Err(e) => {
            if preview_tx.send(Err(e)).is_err() {
                return;
            }
            // Start over with a one-shot decode of the whole resource.
            let full = decode_resource(&resource).and_then(|audio| audio.resample(sample_rate));
            let _ = full_tx.send(full);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(seconds: f64) -> AudioArc {
        AudioArc::new(vec![0.0; (seconds * 8000.0) as usize], 8000, 1)
    }

    fn chain() -> TrackChain {
        TrackChain::new(Track::new(TrackId(1), "Keys"), 0, 8000)
    }

    fn prefix(estimated_duration: Option<f64>) -> anyhow::Result<PreviewReady> {
        Ok(PreviewReady {
            audio: silence(0.5),
            complete: false,
            estimated_duration,
        })
    }

    #[tokio::test]
    async fn unknown_length_waits_for_the_full_decode() {
        let (full_tx, full_rx) = oneshot::channel();
        let _ = full_tx.send(Ok(silence(3.0)));

        let mut chain = chain();
        chain.settle(Ok(prefix(None)), full_rx).await.unwrap();

        assert!(chain.is_fully_decoded());
        assert!(chain.pending.is_none());
        assert_eq!(chain.duration(), 3.0);
    }

    #[tokio::test]
    async fn known_length_plays_from_the_prefix() {
        let (_full_tx, full_rx) = oneshot::channel();

        let mut chain = chain();
        chain.settle(Ok(prefix(Some(3.0))), full_rx).await.unwrap();

        assert!(!chain.is_fully_decoded());
        assert!(chain.pending.is_some());
        assert_eq!(chain.duration(), 3.0);
    }

    #[tokio::test]
    async fn unknown_length_with_failed_decode_is_an_error() {
        let (full_tx, full_rx) = oneshot::channel();
        let _ = full_tx.send(Err(anyhow::anyhow!("corrupt frame")));

        let mut chain = chain();
        let result = chain.settle(Ok(prefix(None)), full_rx).await;

        assert!(matches!(result, Err(TrackLoadError::Decode(_))));
    }
}
