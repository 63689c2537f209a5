use basedrop::Shared;

use crate::AudioArc;

/// Control → render messages. Every variant addresses a voice slot that was
/// preallocated when the render graph was built; slots past the graph's
/// capacity are ignored by the render thread.
pub enum Command {
    /// Attach or replace a voice's sample source. Replacing keeps the play
    /// position, so a longer buffer can take over from a shorter prefix
    /// without a seam. `complete` marks a source that holds the whole track.
    SetSource {
        slot: usize,
        audio: Shared<AudioArc>,
        complete: bool,
    },
    /// Drop the voice's source and reset all of its stages.
    ClearVoice { slot: usize },
    /// Start playing from `offset_frames` on render frame `at_frame`.
    Start {
        slot: usize,
        offset_frames: u64,
        at_frame: u64,
    },
    Pause { slot: usize },
    /// Halt and rewind to the beginning.
    Stop { slot: usize },
    SetGain { slot: usize, gain: f32 },
    SetPan { slot: usize, pan: f32 },
    SetMute { slot: usize, muted: bool },
    /// Enable or disable the voice's analysis tap.
    SetTap { slot: usize, enabled: bool },
    SetMasterGain(f32),
    SetPitchRatio(f32),
}

/// Render → control notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A voice with a complete source played past its last frame.
    VoiceEnded { slot: usize },
    /// A voice is playing past the end of a partial source.
    Starved { slot: usize },
}
