#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use backtrack_core::{
    AudioEngine, AudioResource, EngineConfig, MemorySourceProvider, OfflineDriver, OfflineOutput,
    Song, SongId, Track, TrackId,
};

pub const SAMPLE_RATE: u32 = 8000;

pub fn sine_wav(seconds: f32, freq: f32, amp: f32) -> Vec<u8> {
    burst_wav(seconds, seconds, freq, amp)
}

/// A sine for `loud_seconds`, then silence up to `seconds`.
pub fn burst_wav(loud_seconds: f32, seconds: f32, freq: f32, amp: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (SAMPLE_RATE as f32 * seconds) as usize;
        for i in 0..frames {
            let t = i as f32 / SAMPLE_RATE as f32;
            let value = if t < loud_seconds {
                (2.0 * std::f32::consts::PI * freq * t).sin() * amp
            } else {
                0.0
            };
            writer.write_sample((value * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn wav_resource(seconds: f32) -> AudioResource {
    AudioResource::new(sine_wav(seconds, 60.0, 0.5)).with_extension("wav")
}

/// A song whose tracks are named after `names`, with ids starting at 1.
pub fn song(names: &[&str]) -> Song {
    names
        .iter()
        .enumerate()
        .fold(Song::new(SongId(7), "Test Song", "Band"), |song, (i, name)| {
            song.with_track(Track::new(TrackId(i as u64 + 1), *name))
        })
}

pub fn engine(provider: MemorySourceProvider) -> (AudioEngine, OfflineDriver) {
    engine_with(provider, EngineConfig::default())
}

pub fn engine_with(provider: MemorySourceProvider, config: EngineConfig) -> (AudioEngine, OfflineDriver) {
    let (output, driver) = OfflineOutput::new(SAMPLE_RATE, 2);
    let mut engine = AudioEngine::new(config, Arc::new(provider), Box::new(output));
    engine.initialize().unwrap();
    (engine, driver)
}

/// Provider holding one track per `(id, seconds)` pair.
pub fn provider(tracks: &[(u64, f32)]) -> MemorySourceProvider {
    tracks.iter().fold(MemorySourceProvider::new(), |p, &(id, seconds)| {
        p.with(TrackId(id), wav_resource(seconds))
    })
}

pub fn assert_near(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 0.1 + 1e-9,
        "expected about {expected}, got {actual}"
    );
}
