use thiserror::Error;

/// Failures of the audio output path.
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no audio output device found")]
    NoDevice,

    #[error("failed to get device config: {0}")]
    Config(String),

    #[error("failed to build output stream: {0}")]
    StreamBuild(String),

    #[error("failed to start output stream: {0}")]
    StreamPlay(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// `start` or `resume` was called before `open`, or after `close`.
    #[error("output device is not open")]
    NotOpen,
}

pub type AudioResult<T> = Result<T, AudioError>;
