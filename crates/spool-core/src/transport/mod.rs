//! Transport engine
//!
//! Owns the head position, transport state, record-arm state and the
//! per-period loop. Each pass reads one period from the tape, mixes it to
//! the stereo monitor pair, hands it to the playback device (whose blocking
//! write paces the loop), and then runs the overdub path: read one period
//! of capture, splice the armed columns into a read-modify-write window
//! placed one record offset past the period that was just played, and
//! write it back positionally.
//!
//! Everything is single-threaded and cooperative. Commands are applied
//! between periods; the only suspension points are the blocking device and
//! file calls.

mod command;

pub use command::TransportCommand;

use thiserror::Error;

use crate::device::{DeviceError, Direction, PcmBackend, PcmStream};
use crate::mixer::MonitorMixer;
use crate::session::{SessionConfig, TrackSettings};
use crate::tape::{TapeError, TapeFile};
use crate::track::TrackTable;
use crate::types::{
    store_sample, TapeTime, TransportState, DATA_OFFSET, MONITOR_CHANNELS, PERIOD_FRAMES,
};

/// Errors surfaced by the transport
///
/// Xruns never appear here; they are counted, recovered and absorbed inside
/// the period loop. Anything that does surface has already dropped the
/// transport back to Stop with devices closed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Tape(#[from] TapeError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Command named a track the tape does not have
    #[error("track {0} is out of range")]
    TrackOutOfRange(usize),
}

/// Controller-facing snapshot of one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackStatus {
    pub atten_a: u8,
    pub atten_b: u8,
    pub muted: bool,
    pub recording: bool,
    pub armed_a: bool,
    pub armed_b: bool,
}

/// Controller-facing snapshot of the whole transport
#[derive(Debug, Clone)]
pub struct TransportStatus {
    pub state: TransportState,
    pub record_enabled: bool,
    /// Head position in frames from the start of data
    pub head: u64,
    /// Head position as wall time
    pub time: TapeTime,
    /// Number of whole frames on the tape
    pub last_frame: u64,
    pub underruns: u32,
    pub overruns: u32,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub tracks: Vec<TrackStatus>,
}

impl TransportStatus {
    /// The record indicator is a display-only derivative of Play + enable
    pub fn record_lit(&self) -> bool {
        self.state == TransportState::Play && self.record_enabled
    }
}

/// The transport engine
///
/// Owns the tape, the track table, the device backend and the four
/// session-lifetime buffers; nothing is reallocated per period.
pub struct Engine<B: PcmBackend> {
    tape: TapeFile,
    tracks: TrackTable,
    mixer: MonitorMixer,
    backend: B,
    playback: Option<B::Stream>,
    capture: Option<B::Stream>,
    state: TransportState,
    record_enabled: bool,
    arm_a: Option<usize>,
    arm_b: Option<usize>,
    /// Head position in frames; playback-driven, advances one period per pass
    head: u64,
    /// Frames by which captured samples lag the playback head
    record_offset: u64,
    underruns: u32,
    overruns: u32,
    /// One period of tape input for the play stream
    read_buf: Vec<u8>,
    /// One period of mixed stereo output
    stereo_buf: Vec<i16>,
    /// One period of stereo capture input
    capture_buf: Vec<i16>,
    /// Read-modify-write window for the overdub splice
    scratch_buf: Vec<u8>,
}

impl<B: PcmBackend> Engine<B> {
    /// Build an engine around an open tape
    ///
    /// `record_offset` is the compensating delay in frames between the
    /// playback head and the overdub write position, normally derived from
    /// the declared device latencies (or restored from the session file).
    pub fn new(tape: TapeFile, backend: B, record_offset: u64) -> Self {
        let channels = tape.channels() as usize;
        let period_bytes = tape.period_bytes();
        Self {
            tracks: TrackTable::new(channels),
            mixer: MonitorMixer::new(channels),
            read_buf: vec![0; period_bytes],
            scratch_buf: vec![0; period_bytes],
            stereo_buf: vec![0; PERIOD_FRAMES * MONITOR_CHANNELS],
            capture_buf: vec![0; PERIOD_FRAMES * MONITOR_CHANNELS],
            tape,
            backend,
            playback: None,
            capture: None,
            state: TransportState::Stop,
            record_enabled: false,
            arm_a: None,
            arm_b: None,
            head: 0,
            record_offset,
            underruns: 0,
            overruns: 0,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn record_enabled(&self) -> bool {
        self.record_enabled
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn record_offset(&self) -> u64 {
        self.record_offset
    }

    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    /// Apply a loaded session: monitor settings, head position, offset
    pub fn apply_session(&mut self, session: &SessionConfig) {
        for (index, settings) in session.tracks.iter().enumerate() {
            if let Some(track) = self.tracks.get_mut(index) {
                track.set_monitor(settings.atten_a, settings.atten_b);
                track.set_muted(settings.muted);
            }
        }
        self.head = session.position.min(self.tape.last_frame());
        if let Some(offset) = session.record_offset {
            self.record_offset = offset;
        }
    }

    /// Capture the current session state for saving
    pub fn session_snapshot(&self) -> SessionConfig {
        SessionConfig {
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackSettings {
                    atten_a: t.atten_a(),
                    atten_b: t.atten_b(),
                    muted: t.muted(),
                })
                .collect(),
            position: self.head,
            record_offset: Some(self.record_offset),
        }
    }

    /// Snapshot for the controller's display
    pub fn status(&self) -> TransportStatus {
        TransportStatus {
            state: self.state,
            record_enabled: self.record_enabled,
            head: self.head,
            time: TapeTime::from_frames(self.head, self.tape.sample_rate()),
            last_frame: self.tape.last_frame(),
            underruns: self.underruns,
            overruns: self.overruns,
            sample_rate: self.tape.sample_rate(),
            bits_per_sample: 16,
            tracks: self
                .tracks
                .iter()
                .enumerate()
                .map(|(i, t)| TrackStatus {
                    atten_a: t.atten_a(),
                    atten_b: t.atten_b(),
                    muted: t.muted(),
                    recording: t.recording(),
                    armed_a: self.arm_a == Some(i),
                    armed_b: self.arm_b == Some(i),
                })
                .collect(),
        }
    }

    /// Apply one operator command
    ///
    /// Called between periods. Errors leave the transport state unchanged
    /// except where noted (a failed Start stays in Stop with no devices).
    pub fn handle_command(&mut self, cmd: TransportCommand) -> Result<(), EngineError> {
        match cmd {
            TransportCommand::Start => self.start(),
            TransportCommand::Stop => {
                self.stop();
                Ok(())
            }
            TransportCommand::ToggleRecordEnable => self.toggle_record_enable(),
            TransportCommand::ArmA(track) => self.toggle_arm(track, true),
            TransportCommand::ArmB(track) => self.toggle_arm(track, false),
            TransportCommand::SeekAbsolute(frame) => self.seek_to(frame),
            TransportCommand::SeekRelative(delta) => {
                let target = if delta < 0 {
                    self.head.saturating_sub(delta.unsigned_abs())
                } else {
                    self.head.saturating_add(delta as u64)
                };
                self.seek_to(target)
            }
            TransportCommand::SetMonitor {
                track,
                atten_a,
                atten_b,
            } => {
                self.tracks
                    .get_mut(track)
                    .ok_or(EngineError::TrackOutOfRange(track))?
                    .set_monitor(atten_a, atten_b);
                Ok(())
            }
            TransportCommand::ToggleMute(track) => {
                self.tracks
                    .get_mut(track)
                    .ok_or(EngineError::TrackOutOfRange(track))?
                    .toggle_mute();
                Ok(())
            }
            TransportCommand::ToggleMuteAll => {
                self.tracks.toggle_mute_all();
                Ok(())
            }
        }
    }

    /// Run one period of the transport loop
    ///
    /// A no-op unless rolling. A fatal tape or device fault closes the
    /// devices, drops to Stop and surfaces the error; xruns are recovered
    /// in place and only show up in the status counters.
    pub fn run_period(&mut self) -> Result<(), EngineError> {
        if self.state != TransportState::Play {
            return Ok(());
        }
        match self.play_one_period() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("transport fault, stopping: {e}");
                self.stop();
                Err(e)
            }
        }
    }

    /// Close the transport and flush the tape header
    pub fn close(mut self) -> Result<(), EngineError> {
        self.stop();
        self.tape.close()?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // State transitions
    // ─────────────────────────────────────────────────────────────

    fn start(&mut self) -> Result<(), EngineError> {
        if self.state == TransportState::Play {
            return Ok(());
        }
        let playback = self
            .backend
            .open(Direction::Playback, self.tape.sample_rate())?;
        let capture = if self.capture_needed() {
            Some(self.backend.open(Direction::Capture, self.tape.sample_rate())?)
        } else {
            None
        };
        if self.head >= self.tape.last_frame() && !self.record_enabled {
            self.head = 0;
        }
        self.tape.seek_frame(self.head)?;
        self.playback = Some(playback);
        self.capture = capture;
        self.state = TransportState::Play;
        self.sync_recording_flags();
        log::info!("transport: play from frame {}", self.head);
        Ok(())
    }

    fn stop(&mut self) {
        let was_rolling = self.state == TransportState::Play;
        self.playback = None;
        self.capture = None;
        self.state = TransportState::Stop;
        self.sync_recording_flags();
        if was_rolling {
            log::info!(
                "transport: stop at frame {} ({} frames on tape)",
                self.head,
                self.tape.last_frame()
            );
        }
    }

    fn toggle_record_enable(&mut self) -> Result<(), EngineError> {
        self.record_enabled = !self.record_enabled;
        log::info!(
            "record {}",
            if self.record_enabled { "enabled" } else { "disabled" }
        );
        if self.state == TransportState::Play && self.capture_needed() {
            self.ensure_capture()?;
        }
        if !self.record_enabled {
            self.capture = None;
            self.sync_recording_flags();
        }
        Ok(())
    }

    /// Toggle an arm onto a track; arming steals the track from the other
    /// arm, re-arming the same track clears it
    fn toggle_arm(&mut self, track: usize, bus_a: bool) -> Result<(), EngineError> {
        if track >= self.tracks.len() {
            return Err(EngineError::TrackOutOfRange(track));
        }
        let (own, other) = if bus_a {
            (&mut self.arm_a, &mut self.arm_b)
        } else {
            (&mut self.arm_b, &mut self.arm_a)
        };
        if *own == Some(track) {
            *own = None;
        } else {
            if *other == Some(track) {
                *other = None;
            }
            *own = Some(track);
        }
        if self.state == TransportState::Play && self.capture_needed() {
            self.ensure_capture()?;
        } else {
            self.sync_recording_flags();
        }
        Ok(())
    }

    fn seek_to(&mut self, frame: u64) -> Result<(), EngineError> {
        self.head = frame.min(self.tape.last_frame());
        self.tape.seek_frame(self.head)?;
        Ok(())
    }

    fn capture_needed(&self) -> bool {
        self.record_enabled && (self.arm_a.is_some() || self.arm_b.is_some())
    }

    fn ensure_capture(&mut self) -> Result<(), EngineError> {
        if self.capture.is_none() {
            self.capture = Some(self.backend.open(Direction::Capture, self.tape.sample_rate())?);
        }
        self.sync_recording_flags();
        Ok(())
    }

    /// A track records only while it is armed and the capture device is open
    fn sync_recording_flags(&mut self) {
        let open = self.capture.is_some();
        for index in 0..self.tracks.len() {
            let recording =
                open && (self.arm_a == Some(index) || self.arm_b == Some(index));
            if let Some(track) = self.tracks.get_mut(index) {
                track.set_recording(recording);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // The period loop
    // ─────────────────────────────────────────────────────────────

    fn play_one_period(&mut self) -> Result<(), EngineError> {
        let period_start = self.head;

        // Replay: tape -> mix -> playback
        let n = self.tape.read_period(&mut self.read_buf)?;
        if n == 0 && !self.record_enabled {
            log::info!("end of tape at frame {}", self.head);
            self.stop();
            return Ok(());
        }
        self.read_buf[n..].fill(0);
        self.mixer
            .mix_period(&self.read_buf, &self.tracks, &mut self.stereo_buf);

        if self.playback.is_none() {
            self.stop();
            return Ok(());
        }
        if let Some(playback) = self.playback.as_mut() {
            match write_frames(playback, &self.stereo_buf) {
                Ok(()) => {}
                Err(DeviceError::Xrun(kind)) => {
                    self.underruns += 1;
                    log::warn!("playback {kind} (total {}), recovering", self.underruns);
                    playback.recover()?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // The head is playback-driven: it advances whether or not capture
        // kept up, so restarting a take lands on the same region.
        self.head += PERIOD_FRAMES as u64;

        if self.capture_needed() {
            self.record_one_period(period_start)?;
        }
        Ok(())
    }

    fn record_one_period(&mut self, period_start: u64) -> Result<(), EngineError> {
        self.ensure_capture()?;
        let Some(capture) = self.capture.as_mut() else {
            return Ok(());
        };
        match read_frames(capture, &mut self.capture_buf) {
            Ok(()) => {}
            Err(DeviceError::Xrun(kind)) => {
                self.overruns += 1;
                log::warn!("capture {kind} (total {}), recovering", self.overruns);
                capture.recover()?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        // The period just read was captured against the playback that
        // started at period_start and arrives record_offset frames late,
        // so it lands that far past where the head was: file frame f
        // receives capture sample f - record_offset of the take.
        let target = period_start + self.record_offset;

        // Grow by whole silent periods until the replay read and the splice
        // window both stay inside the data region.
        while self.head >= self.tape.last_frame()
            || target + PERIOD_FRAMES as u64 > self.tape.last_frame()
        {
            self.tape.extend_silence(1)?;
        }

        let channels = self.tracks.len();
        let frame_size = self.tape.frame_size();
        let offset = DATA_OFFSET + target * frame_size as u64;

        // Read-modify-write so untouched columns survive byte for byte
        let n = self.tape.read_period_at(&mut self.scratch_buf, offset)?;
        let frames = n / frame_size;
        for i in 0..frames {
            if let Some(track) = self.arm_a {
                store_sample(
                    &mut self.scratch_buf,
                    i * channels + track,
                    self.capture_buf[i * MONITOR_CHANNELS],
                );
            }
            if let Some(track) = self.arm_b {
                store_sample(
                    &mut self.scratch_buf,
                    i * channels + track,
                    self.capture_buf[i * MONITOR_CHANNELS + 1],
                );
            }
        }
        self.tape.write_period_at(&self.scratch_buf[..n], offset)?;
        Ok(())
    }
}

/// Write a full buffer of frames, looping over partial writes
fn write_frames<S: PcmStream>(stream: &mut S, samples: &[i16]) -> Result<(), DeviceError> {
    let total = samples.len() / MONITOR_CHANNELS;
    let mut done = 0;
    while done < total {
        let n = stream.write_interleaved(&samples[done * MONITOR_CHANNELS..])?;
        if n == 0 {
            break;
        }
        done += n;
    }
    Ok(())
}

/// Read a full buffer of frames, looping over partial reads
fn read_frames<S: PcmStream>(stream: &mut S, samples: &mut [i16]) -> Result<(), DeviceError> {
    let total = samples.len() / MONITOR_CHANNELS;
    let mut done = 0;
    while done < total {
        let n = stream.read_interleaved(&mut samples[done * MONITOR_CHANNELS..])?;
        if n == 0 {
            break;
        }
        done += n;
    }
    Ok(())
}
