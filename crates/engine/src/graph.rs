use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use backtrack_transport::{AudioArc, Command, Status};
use basedrop::Shared;

use crate::click::ClickEvent;
use crate::pitch::PitchShifter;
use crate::ramp::Ramp;

/// Frames rendered between two command drains.
pub const RENDER_QUANTUM: usize = 128;

/// Clicks that may ring on top of each other.
const MAX_CLICKS: usize = 4;

enum VoiceState {
    Idle,
    Scheduled { at: u64, offset: u64 },
    Playing { pos: u64 },
}

struct Voice {
    source: Option<Shared<AudioArc>>,
    complete: bool,
    state: VoiceState,
    gain: Ramp,
    pan: Ramp,
    mute: Ramp,
    tap_enabled: bool,
    tap: rtrb::Producer<f32>,
    starved: bool,
}

impl Voice {
    fn new(tap: rtrb::Producer<f32>, ramp_frames: u32) -> Self {
        Self {
            source: None,
            complete: false,
            state: VoiceState::Idle,
            gain: Ramp::new(1.0, ramp_frames),
            pan: Ramp::new(0.0, ramp_frames),
            mute: Ramp::new(1.0, ramp_frames),
            tap_enabled: false,
            tap,
            starved: false,
        }
    }

    fn is_playing(&self) -> bool {
        matches!(self.state, VoiceState::Playing { .. })
    }

    fn set_param(ramp: &mut Ramp, value: f32, audible: bool) {
        if audible {
            ramp.set_target(value);
        } else {
            ramp.jump(value);
        }
    }

    fn clear(&mut self) {
        self.source = None;
        self.complete = false;
        self.state = VoiceState::Idle;
        self.gain.jump(1.0);
        self.pan.jump(0.0);
        self.mute.jump(1.0);
        self.tap_enabled = false;
        self.starved = false;
    }

    fn render(
        &mut self,
        slot: usize,
        first_frame: u64,
        left: &mut [f32],
        right: &mut [f32],
        status: &mut rtrb::Producer<Status>,
    ) {
        if matches!(self.state, VoiceState::Idle) {
            return;
        }

        for (j, (out_l, out_r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            let frame = first_frame + j as u64;

            if let VoiceState::Scheduled { at, offset } = self.state {
                if frame < at {
                    continue;
                }
                // A late start keeps its distance to the shared start frame.
                self.state = VoiceState::Playing {
                    pos: offset + (frame - at),
                };
            }

            let VoiceState::Playing { pos } = self.state else {
                return;
            };

            let (mut l, mut r) = match &self.source {
                Some(audio) if (pos as usize) < audio.frames() => audio.frame_stereo(pos as usize),
                _ if self.complete => {
                    self.state = VoiceState::Idle;
                    let _ = status.push(Status::VoiceEnded { slot });
                    return;
                }
                _ => {
                    if !self.starved {
                        self.starved = true;
                        let _ = status.push(Status::Starved { slot });
                    }
                    (0.0, 0.0)
                }
            };
            self.state = VoiceState::Playing { pos: pos + 1 };

            let gain = self.gain.next();
            l *= gain;
            r *= gain;

            let pan = self.pan.next();
            l *= (1.0 - pan).min(1.0);
            r *= (1.0 + pan).min(1.0);

            if self.tap_enabled {
                let _ = self.tap.push((l + r) * 0.5);
            }

            let mute = self.mute.next();
            *out_l += l * mute;
            *out_r += r * mute;
        }
    }
}

struct ClickVoice {
    samples: Shared<Vec<f32>>,
    pos: usize,
}

/// Sizes and ramp length of a render graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_tracks: usize,
    pub command_capacity: usize,
    pub ramp_frames: u32,
}

pub(crate) struct GraphParts {
    pub commands: rtrb::Consumer<Command>,
    pub status: rtrb::Producer<Status>,
    pub clicks: rtrb::Consumer<ClickEvent>,
    pub taps: Vec<rtrb::Producer<f32>>,
    pub master_tap: rtrb::Producer<f32>,
    pub frames: Arc<AtomicU64>,
}

/// Everything that runs on the audio thread.
///
/// All buffers are allocated up front; [`RenderGraph::process`] never
/// allocates, locks or blocks.
pub struct RenderGraph {
    commands: rtrb::Consumer<Command>,
    status: rtrb::Producer<Status>,
    clicks: rtrb::Consumer<ClickEvent>,
    voices: Vec<Voice>,
    master_tap: rtrb::Producer<f32>,
    master_gain: Ramp,
    pitch: [PitchShifter; 2],
    click_gain: Ramp,
    click_voices: [Option<ClickVoice>; MAX_CLICKS],
    frames: Arc<AtomicU64>,
    frame: u64,
    channels: usize,
    sample_rate: u32,
    mix_l: Vec<f32>,
    mix_r: Vec<f32>,
    wet_l: Vec<f32>,
    wet_r: Vec<f32>,
    pending: Vec<f32>,
    pending_pos: usize,
}

impl RenderGraph {
    pub(crate) fn new(config: &GraphConfig, parts: GraphParts) -> Self {
        let channels = config.channels.max(1) as usize;
        let voices = parts
            .taps
            .into_iter()
            .map(|tap| Voice::new(tap, config.ramp_frames))
            .collect();

        Self {
            commands: parts.commands,
            status: parts.status,
            clicks: parts.clicks,
            voices,
            master_tap: parts.master_tap,
            master_gain: Ramp::new(1.0, config.ramp_frames),
            pitch: [PitchShifter::new(), PitchShifter::new()],
            click_gain: Ramp::new(1.0, config.ramp_frames),
            click_voices: Default::default(),
            frames: parts.frames,
            frame: 0,
            channels,
            sample_rate: config.sample_rate,
            mix_l: vec![0.0; RENDER_QUANTUM],
            mix_r: vec![0.0; RENDER_QUANTUM],
            wet_l: vec![0.0; RENDER_QUANTUM],
            wet_r: vec![0.0; RENDER_QUANTUM],
            pending: vec![0.0; RENDER_QUANTUM * channels],
            pending_pos: RENDER_QUANTUM * channels,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Fill an interleaved output buffer with `channels()` samples per frame.
    pub fn process(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos >= self.pending.len() {
                self.render_quantum();
            }
            let n = (self.pending.len() - self.pending_pos).min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }
    }

    fn render_quantum(&mut self) {
        self.drain_commands();
        self.drain_clicks();

        self.mix_l.fill(0.0);
        self.mix_r.fill(0.0);
        for (slot, voice) in self.voices.iter_mut().enumerate() {
            voice.render(
                slot,
                self.frame,
                &mut self.mix_l,
                &mut self.mix_r,
                &mut self.status,
            );
        }

        self.pitch[0].process(&self.mix_l, &mut self.wet_l);
        self.pitch[1].process(&self.mix_r, &mut self.wet_r);

        for j in 0..RENDER_QUANTUM {
            let gain = self.master_gain.next();
            let mut l = self.wet_l[j] * gain;
            let mut r = self.wet_r[j] * gain;
            let _ = self.master_tap.push((l + r) * 0.5);

            let click = self.next_click_sample();
            l += click;
            r += click;

            let frame = &mut self.pending[j * self.channels..(j + 1) * self.channels];
            match frame {
                [mono] => *mono = (l + r) * 0.5,
                [first, second, rest @ ..] => {
                    *first = l;
                    *second = r;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }

        self.pending_pos = 0;
        self.frame += RENDER_QUANTUM as u64;
        self.frames.store(self.frame, Ordering::Release);
    }

    fn next_click_sample(&mut self) -> f32 {
        let gain = self.click_gain.next();
        let mut sum = 0.0;
        for slot in self.click_voices.iter_mut() {
            if let Some(click) = slot {
                match click.samples.get(click.pos) {
                    Some(&s) => {
                        sum += s;
                        click.pos += 1;
                    }
                    None => *slot = None,
                }
            }
        }
        sum * gain
    }

    fn drain_clicks(&mut self) {
        while let Ok(event) = self.clicks.pop() {
            match event {
                ClickEvent::Trigger(samples) => {
                    let voice = ClickVoice { samples, pos: 0 };
                    let free = self.click_voices.iter().position(Option::is_none);
                    let index = free.unwrap_or_else(|| {
                        // Replace the click that has played the longest.
                        self.click_voices
                            .iter()
                            .enumerate()
                            .max_by_key(|(_, c)| c.as_ref().map_or(0, |c| c.pos))
                            .map_or(0, |(i, _)| i)
                    });
                    self.click_voices[index] = Some(voice);
                }
                ClickEvent::SetVolume(volume) => self.click_gain.set_target(volume.clamp(0.0, 1.0)),
                ClickEvent::Silence => self.click_voices.iter_mut().for_each(|c| *c = None),
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.pop() {
            match cmd {
                Command::SetMasterGain(gain) => self.master_gain.set_target(gain.max(0.0)),
                Command::SetPitchRatio(ratio) => {
                    for shifter in &mut self.pitch {
                        shifter.set_ratio(ratio);
                    }
                }
                cmd => self.apply_voice_command(cmd),
            }
        }
    }

    fn apply_voice_command(&mut self, cmd: Command) {
        let slot = match &cmd {
            Command::SetSource { slot, .. }
            | Command::ClearVoice { slot }
            | Command::Start { slot, .. }
            | Command::Pause { slot }
            | Command::Stop { slot }
            | Command::SetGain { slot, .. }
            | Command::SetPan { slot, .. }
            | Command::SetMute { slot, .. }
            | Command::SetTap { slot, .. } => *slot,
            Command::SetMasterGain(_) | Command::SetPitchRatio(_) => return,
        };
        let Some(voice) = self.voices.get_mut(slot) else {
            return;
        };
        let audible = voice.is_playing();

        match cmd {
            Command::SetSource {
                audio, complete, ..
            } => {
                // Replacing the source keeps the play position.
                voice.source = Some(audio);
                voice.complete = complete;
                voice.starved = false;
            }
            Command::ClearVoice { .. } => voice.clear(),
            Command::Start {
                offset_frames,
                at_frame,
                ..
            } => {
                voice.starved = false;
                voice.state = VoiceState::Scheduled {
                    at: at_frame,
                    offset: offset_frames,
                };
            }
            Command::Pause { .. } | Command::Stop { .. } => voice.state = VoiceState::Idle,
            Command::SetGain { gain, .. } => Voice::set_param(&mut voice.gain, gain.max(0.0), audible),
            Command::SetPan { pan, .. } => {
                Voice::set_param(&mut voice.pan, pan.clamp(-1.0, 1.0), audible)
            }
            Command::SetMute { muted, .. } => {
                Voice::set_param(&mut voice.mute, if muted { 0.0 } else { 1.0 }, audible)
            }
            Command::SetTap { enabled, .. } => voice.tap_enabled = enabled,
            Command::SetMasterGain(_) | Command::SetPitchRatio(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EngineHandle, PASSTHROUGH_LATENCY, build_graph};

    fn graph() -> (EngineHandle, RenderGraph) {
        build_graph(GraphConfig {
            sample_rate: 48000,
            channels: 2,
            max_tracks: 4,
            command_capacity: 64,
            ramp_frames: 32,
        })
    }

    fn ramp_source(engine: &EngineHandle, frames: usize) -> Shared<AudioArc> {
        let samples = (0..frames).map(|i| i as f32 / 1000.0).collect();
        engine.commands.share(AudioArc::new(samples, 48000, 1))
    }

    fn send(engine: &mut EngineHandle, cmd: Command) {
        assert!(engine.commands.send(cmd).is_ok());
    }

    fn render(graph: &mut RenderGraph, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * graph.channels()];
        graph.process(&mut out);
        out
    }

    #[test]
    fn voice_starts_on_its_frame() {
        let (mut engine, mut graph) = graph();
        let audio = engine.commands.share(AudioArc::new(vec![0.5; 4800], 48000, 1));
        send(&mut engine, Command::SetSource { slot: 0, audio, complete: true });
        send(&mut engine, Command::Start { slot: 0, offset_frames: 0, at_frame: 200 });

        let out = render(&mut graph, 512);
        let first = 200 + PASSTHROUGH_LATENCY;
        assert_eq!(out[(first - 1) * 2], 0.0);
        assert_eq!(out[first * 2], 0.5);
        assert_eq!(out[first * 2 + 1], 0.5);
        assert_eq!(engine.frames(), 512);
    }

    #[test]
    fn late_start_keeps_alignment() {
        let (mut engine, mut graph) = graph();
        render(&mut graph, 256);
        let audio = ramp_source(&engine, 4800);
        send(&mut engine, Command::SetSource { slot: 0, audio, complete: true });
        // Frame 100 has already been rendered.
        send(&mut engine, Command::Start { slot: 0, offset_frames: 0, at_frame: 100 });

        let out = render(&mut graph, 256);
        // Mix frame 256 reaches the output PASSTHROUGH_LATENCY frames later.
        let idx = 256 - 256 + PASSTHROUGH_LATENCY;
        assert!((out[idx * 2] - 0.156).abs() < 1e-6, "{}", out[idx * 2]);
    }

    #[test]
    fn tap_sits_after_pan_and_before_mute() {
        let (mut engine, mut graph) = graph();
        let mut tap = engine.take_tap(1).unwrap();
        let audio = engine.commands.share(AudioArc::new(vec![0.8; 4800], 48000, 1));
        send(&mut engine, Command::SetSource { slot: 1, audio, complete: true });
        send(&mut engine, Command::SetGain { slot: 1, gain: 0.5 });
        send(&mut engine, Command::SetPan { slot: 1, pan: 1.0 });
        send(&mut engine, Command::SetMute { slot: 1, muted: true });
        send(&mut engine, Command::SetTap { slot: 1, enabled: true });
        send(&mut engine, Command::Start { slot: 1, offset_frames: 0, at_frame: 0 });

        let out = render(&mut graph, 512);
        assert!(out.iter().all(|&s| s == 0.0));

        // Left is panned away, right keeps 0.8 * 0.5.
        let mut taken = 0;
        while let Ok(sample) = tap.pop() {
            assert!((sample - 0.2).abs() < 1e-6);
            taken += 1;
        }
        assert_eq!(taken, 512);
    }

    #[test]
    fn master_gain_does_not_reach_track_taps() {
        let (mut engine, mut graph) = graph();
        let mut tap = engine.take_tap(0).unwrap();
        let audio = engine.commands.share(AudioArc::new(vec![0.4; 4800], 48000, 1));
        send(&mut engine, Command::SetSource { slot: 0, audio, complete: true });
        send(&mut engine, Command::SetTap { slot: 0, enabled: true });
        send(&mut engine, Command::SetMasterGain(0.0));
        send(&mut engine, Command::Start { slot: 0, offset_frames: 0, at_frame: 0 });

        render(&mut graph, 1024);
        let last = std::iter::from_fn(|| tap.pop().ok()).last().unwrap();
        assert!((last - 0.4).abs() < 1e-6);
    }

    #[test]
    fn complete_source_reports_end() {
        let (mut engine, mut graph) = graph();
        let audio = ramp_source(&engine, 100);
        send(&mut engine, Command::SetSource { slot: 2, audio, complete: true });
        send(&mut engine, Command::Start { slot: 2, offset_frames: 0, at_frame: 0 });
        render(&mut graph, 256);
        assert_eq!(engine.status.pop(), Ok(Status::VoiceEnded { slot: 2 }));
    }

    #[test]
    fn partial_source_starves_and_keeps_position() {
        let (mut engine, mut graph) = graph();
        let prefix = ramp_source(&engine, 200);
        send(&mut engine, Command::SetSource { slot: 0, audio: prefix, complete: false });
        send(&mut engine, Command::Start { slot: 0, offset_frames: 0, at_frame: 0 });
        render(&mut graph, 256);
        assert_eq!(engine.status.pop(), Ok(Status::Starved { slot: 0 }));
        assert!(engine.status.pop().is_err());

        let full = ramp_source(&engine, 4800);
        send(&mut engine, Command::SetSource { slot: 0, audio: full, complete: true });
        let out = render(&mut graph, 256);
        // Output frame 384 carries mix frame 256.
        let idx = 384 - 256;
        assert!((out[idx * 2] - 0.256).abs() < 1e-6, "{}", out[idx * 2]);
    }

    #[test]
    fn pause_silences_and_clear_resets() {
        let (mut engine, mut graph) = graph();
        let audio = engine.commands.share(AudioArc::new(vec![0.5; 48000], 48000, 1));
        send(&mut engine, Command::SetSource { slot: 0, audio, complete: true });
        send(&mut engine, Command::Start { slot: 0, offset_frames: 0, at_frame: 0 });
        render(&mut graph, 512);
        send(&mut engine, Command::Pause { slot: 0 });
        render(&mut graph, 256);
        let out = render(&mut graph, 256);
        assert!(out.iter().all(|&s| s == 0.0));

        send(&mut engine, Command::ClearVoice { slot: 0 });
        send(&mut engine, Command::Start { slot: 0, offset_frames: 0, at_frame: 0 });
        let out = render(&mut graph, 512);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn clicks_bypass_the_pitch_delay() {
        let (mut engine, mut graph) = graph();
        let mut clicks = engine.take_click_producer().unwrap();
        let click = engine.commands.share(vec![0.25; 10]);
        assert!(clicks.push(ClickEvent::Trigger(click)).is_ok());

        let out = render(&mut graph, 128);
        assert_eq!(out[0], 0.25);
        assert_eq!(out[9 * 2 + 1], 0.25);
        assert_eq!(out[10 * 2], 0.0);
    }

    #[test]
    fn unknown_slots_are_ignored() {
        let (mut engine, mut graph) = graph();
        send(&mut engine, Command::Start { slot: 99, offset_frames: 0, at_frame: 0 });
        let out = render(&mut graph, 128);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
