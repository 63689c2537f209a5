//! Control side of the backing-track player: song loading, transport,
//! mixer, meters and the click track.

mod chain;
mod click;
mod config;
mod engine;
mod error;
mod meter;
mod provider;

pub use chain::TrackChain;
pub use click::{BEATS_PER_MEASURE, ClickConfig, ClickGenerator, ClickSink, OutputClickSink};
pub use config::EngineConfig;
pub use engine::{
    AudioEngine, EngineState, LoadReport, PITCH_SEMITONE_LIMIT, PositionEvent, semitones_to_ratio,
};
pub use error::{ClickError, EngineError, TrackLoadError};
pub use meter::{LevelMeter, StereoLevels, category_factor};
pub use provider::{AudioSourceProvider, FileSourceProvider, MemorySourceProvider, ResolveFuture};

pub use backtrack_decode::{AudioResource, decode_file, load_resource};
pub use backtrack_engine::{
    AudioError, ClickSound, CpalOutput, OfflineDriver, OfflineOutput, OutputConfig, OutputDevice,
};
pub use backtrack_transport::{Song, SongId, Track, TrackId, WaveformData};
