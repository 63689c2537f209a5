//! Shared types for the backing-track player: the song/track model, shared
//! sample storage, the transport clock and the messages exchanged with the
//! render thread.

mod audio;
mod clock;
mod message;
mod model;

pub use audio::{AudioArc, WaveformData, resample_audio_arc};
pub use clock::{TransportClock, round_tenths};
pub use message::{Command, Status};
pub use model::{BALANCE_LIMIT, Song, SongId, Track, TrackId, VOLUME_MAX};
