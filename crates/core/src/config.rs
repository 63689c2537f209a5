use serde::{Deserialize, Serialize};

/// Tuning knobs of the audio engine. Every field falls back to its default
/// when missing from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Length of gain, pan and mute ramps.
    pub ramp_ms: f64,
    /// Distance between `play()` and the frame every track starts on.
    pub start_lookahead_ms: f64,
    /// Seconds decoded before a track becomes playable.
    pub preview_seconds: f64,
    pub track_meter_hz: f64,
    pub master_meter_hz: f64,
    pub max_tracks: usize,
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ramp_ms: 30.0,
            start_lookahead_ms: 20.0,
            preview_seconds: 8.0,
            track_meter_hz: 60.0,
            master_meter_hz: 30.0,
            max_tracks: 32,
            command_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn ramp_frames(&self, sample_rate: u32) -> u32 {
        (self.ramp_ms.max(0.0) / 1000.0 * sample_rate as f64).round().max(1.0) as u32
    }

    pub fn lookahead_frames(&self, sample_rate: u32) -> u64 {
        (self.start_lookahead_ms.max(0.0) / 1000.0 * sample_rate as f64).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str("max_tracks = 8\nramp_ms = 10.0\n").unwrap();
        assert_eq!(config.max_tracks, 8);
        assert_eq!(config.ramp_ms, 10.0);
        assert_eq!(config.preview_seconds, 8.0);
        assert_eq!(config.command_capacity, 1024);
    }

    #[test]
    fn converts_times_to_frames() {
        let config = EngineConfig::default();
        assert_eq!(config.ramp_frames(48000), 1440);
        assert_eq!(config.lookahead_frames(48000), 960);
    }
}
