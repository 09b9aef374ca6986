//! Deck configuration
//!
//! Machine-level settings, stored as YAML next to the project: which PCM
//! devices to open, their declared latencies, and the channel count used
//! when a new tape has to be created. Per-project state (levels, mutes,
//! head position) lives in the session file instead.

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::MAX_TRACKS;

/// Deck-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    /// Playback PCM name (e.g. "default", "hw:0")
    pub playback_device: String,
    /// Capture PCM name
    pub capture_device: String,
    /// Declared playback latency in microseconds
    pub playback_latency_us: u32,
    /// Declared capture latency in microseconds
    pub capture_latency_us: u32,
    /// Track count for newly created project tapes
    pub default_tracks: u16,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            playback_device: "default".to_string(),
            capture_device: "default".to_string(),
            playback_latency_us: 50_000,
            capture_latency_us: 50_000,
            default_tracks: MAX_TRACKS as u16,
        }
    }
}

impl DeckConfig {
    /// Record offset in frames: the declared round-trip latency expressed
    /// at the tape's sample rate
    pub fn record_offset_frames(&self, sample_rate: u32) -> u64 {
        u64::from(self.playback_latency_us + self.capture_latency_us) * u64::from(sample_rate)
            / 1_000_000
    }
}

/// Load configuration from a YAML file
///
/// A missing file yields the default config; an unreadable or unparsable
/// file logs a warning and also falls back to defaults, so a damaged
/// config never blocks a session.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("no config at {:?}, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => {
                log::info!("loaded config from {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("failed to parse config {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("failed to read config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("failed to write config {:?}", path))?;
    log::info!("saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_returns_defaults() {
        let config: DeckConfig = load_config(Path::new("/nonexistent/spool.yaml"));
        assert_eq!(config, DeckConfig::default());
        assert_eq!(config.default_tracks, 16);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.yaml");

        let config = DeckConfig {
            playback_device: "hw:1".to_string(),
            capture_device: "hw:2".to_string(),
            playback_latency_us: 30_000,
            capture_latency_us: 20_000,
            default_tracks: 8,
        };
        save_config(&config, &path).unwrap();

        let loaded: DeckConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.yaml");
        std::fs::write(&path, ": not yaml [").unwrap();

        let loaded: DeckConfig = load_config(&path);
        assert_eq!(loaded, DeckConfig::default());
    }

    #[test]
    fn test_record_offset_from_latencies() {
        let config = DeckConfig {
            playback_latency_us: 50_000,
            capture_latency_us: 50_000,
            ..Default::default()
        };
        // 100 ms round trip at 44.1 kHz
        assert_eq!(config.record_offset_frames(44_100), 4410);
        assert_eq!(config.record_offset_frames(0), 0);
    }
}
