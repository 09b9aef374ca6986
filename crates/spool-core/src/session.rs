//! Per-project session settings
//!
//! Stored next to the tape as plain key=value text, one entry per line:
//! `NNL`/`NNR` are track NN's monitor attenuation for bus A and B, `NNM`
//! its mute, `Pos` the head frame and `Rof` the record offset in frames.
//! Unknown keys are ignored so files written by newer builds still load.
//! A missing file yields defaults (unity attenuation, everything muted,
//! head at zero, record offset derived from the declared latencies).

use std::fmt::Write as _;
use std::path::Path;

use crate::types::ATTEN_SILENCE;

/// Saved monitor settings for one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackSettings {
    pub atten_a: u8,
    pub atten_b: u8,
    pub muted: bool,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            atten_a: 0,
            atten_b: 0,
            muted: true,
        }
    }
}

/// The session file contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// One entry per track, in index order
    pub tracks: Vec<TrackSettings>,
    /// Head position in frames
    pub position: u64,
    /// Record offset in frames; None means "compute from latencies"
    pub record_offset: Option<u64>,
}

impl SessionConfig {
    /// Defaults for a project with the given track count
    pub fn with_defaults(tracks: usize) -> Self {
        Self {
            tracks: vec![TrackSettings::default(); tracks],
            position: 0,
            record_offset: None,
        }
    }

    /// Load the session file, falling back to defaults on any failure
    pub fn load(path: &Path, tracks: usize) -> Self {
        let mut session = Self::with_defaults(tracks);

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no session file at {:?}, using defaults", path);
                return session;
            }
            Err(e) => {
                log::warn!("failed to read session file {:?}: {}, using defaults", path, e);
                return session;
            }
        };

        for line in contents.lines() {
            if let Some((key, value)) = line.split_once('=') {
                session.apply_entry(key.trim(), value.trim());
            }
        }
        log::info!("loaded session from {:?}", path);
        session
    }

    fn apply_entry(&mut self, key: &str, value: &str) {
        match key {
            "Pos" => {
                if let Ok(v) = value.parse() {
                    self.position = v;
                }
                return;
            }
            "Rof" => {
                if let Ok(v) = value.parse() {
                    self.record_offset = Some(v);
                }
                return;
            }
            _ => {}
        }

        // Track keys: two-digit index plus a field letter
        let (Some(index), Some(field)) = (
            key.get(..2).and_then(|s| s.parse::<usize>().ok()),
            (key.len() == 3).then(|| key.chars().nth(2)).flatten(),
        ) else {
            return;
        };
        let Some(track) = self.tracks.get_mut(index) else {
            return;
        };
        match field {
            'L' => {
                if let Ok(v) = value.parse::<i64>() {
                    track.atten_a = v.clamp(0, ATTEN_SILENCE as i64) as u8;
                }
            }
            'R' => {
                if let Ok(v) = value.parse::<i64>() {
                    track.atten_b = v.clamp(0, ATTEN_SILENCE as i64) as u8;
                }
            }
            'M' => match value {
                "0" => track.muted = false,
                "1" => track.muted = true,
                _ => {}
            },
            _ => {}
        }
    }

    /// Write all tracks in index order, then the head and record offset
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut out = String::new();
        for (index, track) in self.tracks.iter().enumerate() {
            let _ = writeln!(out, "{:02}L={}", index, track.atten_a);
            let _ = writeln!(out, "{:02}R={}", index, track.atten_b);
            let _ = writeln!(out, "{:02}M={}", index, if track.muted { 1 } else { 0 });
        }
        let _ = writeln!(out, "Pos={}", self.position);
        if let Some(offset) = self.record_offset {
            let _ = writeln!(out, "Rof={}", offset);
        }
        std::fs::write(path, out)?;
        log::info!("saved session to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let session = SessionConfig::load(Path::new("/nonexistent/no.session"), 4);
        assert_eq!(session, SessionConfig::with_defaults(4));
        assert_eq!(session.tracks.len(), 4);
        assert!(session.tracks.iter().all(|t| t.muted));
        assert_eq!(session.position, 0);
        assert_eq!(session.record_offset, None);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.session");

        let mut session = SessionConfig::with_defaults(3);
        session.tracks[0] = TrackSettings { atten_a: 0, atten_b: 16, muted: false };
        session.tracks[2] = TrackSettings { atten_a: 6, atten_b: 6, muted: true };
        session.position = 132_300;
        session.record_offset = Some(4410);

        session.save(&path).unwrap();
        let loaded = SessionConfig::load(&path, 3);
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_file_format_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.session");

        let mut session = SessionConfig::with_defaults(2);
        session.tracks[1].muted = false;
        session.position = 7;
        session.record_offset = Some(441);
        session.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec!["00L=0", "00R=0", "00M=1", "01L=0", "01R=0", "01M=0", "Pos=7", "Rof=441"]
        );
    }

    #[test]
    fn test_unknown_keys_and_junk_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.session");
        std::fs::write(
            &path,
            "Fancy=yes\n00L=2\nnot a line\n99L=5\n00X=1\nPos=50\n00M=maybe\n",
        )
        .unwrap();

        let session = SessionConfig::load(&path, 2);
        assert_eq!(session.tracks[0].atten_a, 2);
        // 99 is out of range, X is not a field, "maybe" is not a mute value
        assert!(session.tracks[0].muted);
        assert_eq!(session.position, 50);
        assert_eq!(session.record_offset, None);
    }

    #[test]
    fn test_attenuation_values_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.session");
        std::fs::write(&path, "00L=99\n00R=-3\n").unwrap();

        let session = SessionConfig::load(&path, 1);
        assert_eq!(session.tracks[0].atten_a, 16);
        assert_eq!(session.tracks[0].atten_b, 0);
    }
}
