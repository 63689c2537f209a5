use std::fs;
use std::path::{Path, PathBuf};

use backtrack_core::{ClickConfig, EngineConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub click: ClickSettings,
}

/// Click defaults; command line flags override them per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickSettings {
    pub bpm: f64,
    pub count_in_measures: u8,
    pub volume: f32,
    pub accent_downbeat: bool,
    pub sound: String,
}

impl Default for ClickSettings {
    fn default() -> Self {
        let click = ClickConfig::default();
        Self {
            bpm: click.bpm,
            count_in_measures: click.count_in_measures,
            volume: click.volume,
            accent_downbeat: click.accent_downbeat,
            sound: click.sound.name().to_string(),
        }
    }
}

impl ClickSettings {
    pub fn to_click_config(&self) -> ClickConfig {
        let sound = self.sound.parse().unwrap_or_else(|e| {
            log::warn!("{e}, using the default click sound");
            ClickConfig::default().sound
        });
        ClickConfig {
            bpm: self.bpm,
            count_in_measures: self.count_in_measures,
            volume: self.volume,
            enabled: true,
            accent_downbeat: self.accent_downbeat,
            sound,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("backtrack").join("config.toml"))
    }

    /// Read `path`, or the default location when `None`. Missing or broken
    /// files give the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Self::default();
        };

        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("ignoring {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => {
                log::debug!("no config at {}, using defaults", path.display());
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtrack_core::ClickSound;

    #[test]
    fn sections_are_optional() {
        let config: Config = toml::from_str("[click]\nbpm = 96.0\nsound = \"kick\"\n").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.click.bpm, 96.0);
        assert_eq!(config.click.count_in_measures, 1);

        let click = config.click.to_click_config();
        assert_eq!(click.sound, ClickSound::Kick);
    }

    #[test]
    fn unknown_sound_falls_back() {
        let settings = ClickSettings {
            sound: "cowbell".into(),
            ..ClickSettings::default()
        };
        assert_eq!(settings.to_click_config().sound, ClickSound::Woodblock);
    }
}
