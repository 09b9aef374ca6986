//! Per-track monitor state
//!
//! A [`Track`] is a pure value object: how loudly the track feeds each of
//! the two monitor buses, whether it is muted, and whether it is currently
//! receiving an overdub (which silences its own monitor contribution so the
//! incoming signal is not fed back through the mix).

use crate::types::ATTEN_SILENCE;

/// Monitor state for one tape track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    /// Bus A attenuation in 6 dB steps (0 = unity, 16 = silence)
    atten_a: u8,
    /// Bus B attenuation in 6 dB steps (0 = unity, 16 = silence)
    atten_b: u8,
    /// Muted tracks contribute nothing to either bus
    muted: bool,
    /// True only while this track is armed and the capture device is open
    recording: bool,
}

impl Default for Track {
    fn default() -> Self {
        // New projects come up muted; the operator opens tracks explicitly
        Self {
            atten_a: 0,
            atten_b: 0,
            muted: true,
            recording: false,
        }
    }
}

impl Track {
    /// Create a track with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set both bus attenuations, clamped to 0..=16
    pub fn set_monitor(&mut self, atten_a: u8, atten_b: u8) {
        self.atten_a = atten_a.min(ATTEN_SILENCE);
        self.atten_b = atten_b.min(ATTEN_SILENCE);
    }

    pub fn atten_a(&self) -> u8 {
        self.atten_a
    }

    pub fn atten_b(&self) -> u8 {
        self.atten_b
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
    }

    pub fn recording(&self) -> bool {
        self.recording
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    /// This track's contribution to bus A for one sample
    ///
    /// Attenuation is an arithmetic right shift of the signed sample; a
    /// muted or recording track contributes zero.
    #[inline]
    pub fn contribution_a(&self, sample: i16) -> i32 {
        self.contribution(sample, self.atten_a)
    }

    /// This track's contribution to bus B for one sample
    #[inline]
    pub fn contribution_b(&self, sample: i16) -> i32 {
        self.contribution(sample, self.atten_b)
    }

    #[inline]
    fn contribution(&self, sample: i16, atten: u8) -> i32 {
        if self.muted || self.recording || atten >= ATTEN_SILENCE {
            0
        } else {
            i32::from(sample) >> atten
        }
    }
}

/// The session's track table
///
/// One entry per tape channel, fixed for the life of the session.
#[derive(Debug, Clone)]
pub struct TrackTable {
    tracks: Vec<Track>,
}

impl TrackTable {
    /// Create a table with one default track per channel
    pub fn new(channels: usize) -> Self {
        Self {
            tracks: vec![Track::default(); channels],
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Clear the transient recording flag on every track
    pub fn clear_recording(&mut self) {
        for track in &mut self.tracks {
            track.set_recording(false);
        }
    }

    /// Global mute: every track flips to the complement of track 0's mute
    pub fn toggle_mute_all(&mut self) {
        let muted = !self.tracks.first().map(Track::muted).unwrap_or(true);
        for track in &mut self.tracks {
            track.set_muted(muted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attenuation_is_signed_shift() {
        let mut track = Track::new();
        track.set_muted(false);

        track.set_monitor(0, 3);
        assert_eq!(track.contribution_a(-32768), -32768);
        assert_eq!(track.contribution_b(-32768), -4096);
        assert_eq!(track.contribution_b(1000), 125);

        // Step 16 is silence, and clamping keeps larger requests there
        track.set_monitor(16, 200);
        assert_eq!(track.atten_b(), 16);
        assert_eq!(track.contribution_a(32767), 0);
        assert_eq!(track.contribution_b(32767), 0);
    }

    #[test]
    fn test_mute_and_recording_silence_contributions() {
        let mut track = Track::new();
        assert!(track.muted());
        assert_eq!(track.contribution_a(20000), 0);

        track.set_muted(false);
        assert_eq!(track.contribution_a(20000), 20000);

        track.set_recording(true);
        assert_eq!(track.contribution_a(20000), 0);
        assert_eq!(track.contribution_b(20000), 0);
    }

    #[test]
    fn test_mute_all_follows_track_zero() {
        let mut table = TrackTable::new(4);
        table.get_mut(0).unwrap().set_muted(false);
        table.get_mut(2).unwrap().set_muted(false);

        // Track 0 is open, so global mute closes everything
        table.toggle_mute_all();
        assert!(table.iter().all(Track::muted));

        table.toggle_mute_all();
        assert!(table.iter().all(|t| !t.muted()));
    }
}
