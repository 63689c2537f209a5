use backtrack_engine::AudioError;
use backtrack_transport::TrackId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("audio engine is not initialized")]
    NotInitialized,

    #[error("failed to initialize audio output: {0}")]
    Init(#[source] AudioError),

    #[error("audio output unavailable: {0}")]
    Device(#[source] AudioError),

    #[error("no loaded track with id {0}")]
    UnknownTrack(TrackId),
}

/// Why a single track was left out of a song.
#[derive(Debug, thiserror::Error)]
pub enum TrackLoadError {
    #[error("no audio resource for track")]
    NotFound,

    #[error("audio resource is empty")]
    Empty,

    #[error("failed to decode audio: {0}")]
    Decode(#[source] anyhow::Error),

    #[error("audio source provider failed: {0}")]
    Provider(#[source] anyhow::Error),

    #[error("track load was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClickError {
    #[error("click scheduling needs a running tokio runtime")]
    NoRuntime,

    #[error("tempo must be a positive number of beats per minute")]
    InvalidTempo,
}
