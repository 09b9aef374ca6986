//! Spool deck — keyboard front-end for the spool transport engine
//!
//! Wires the engine to a raw-mode terminal. While the transport rolls, the
//! blocking playback write inside `run_period` paces the loop and keys are
//! polled with a zero timeout between periods; while stopped, the poll
//! timeout doubles as the idle sleep. One status line is redrawn per pass.
//!
//! Keys: space start/stop, `r` record-enable, up/down select track,
//! `a`/`b` arm the selected track, `m` mute, `M` mute all, left/right seek
//! one second, home rewind, `[`/`]` and `{`/`}` trim the bus A/B monitor
//! level, `q` quit.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal;

use spool_core::config::{load_config, DeckConfig};
use spool_core::device::alsa::AlsaBackend;
use spool_core::session::SessionConfig;
use spool_core::tape::TapeFile;
use spool_core::transport::{Engine, TransportCommand};
use spool_core::{TransportState, ATTEN_SILENCE, SAMPLE_RATE};

/// Deck settings file, looked up next to the project tape
const CONFIG_FILE: &str = "spool.yaml";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let project = PathBuf::from(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "project.wav".to_string()),
    );
    let config_path = project
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(CONFIG_FILE);
    let config: DeckConfig = load_config(&config_path);

    let tape = TapeFile::open(&project, config.default_tracks)
        .with_context(|| format!("failed to open project tape {:?}", project))?;
    if tape.created() {
        println!("created new project tape {:?}", project);
    }

    let sample_rate = tape.sample_rate();
    let session_path = project.with_extension("session");
    let session = SessionConfig::load(&session_path, tape.channels() as usize);
    let record_offset = session
        .record_offset
        .unwrap_or_else(|| config.record_offset_frames(sample_rate));

    let backend = AlsaBackend::new(
        config.playback_device.clone(),
        config.capture_device.clone(),
        config.playback_latency_us,
        config.capture_latency_us,
    );
    let mut engine = Engine::new(tape, backend, record_offset);
    engine.apply_session(&session);

    println!(
        "spool: {:?} ({} tracks, {} Hz, record offset {} frames)",
        project,
        engine.tracks().len(),
        sample_rate,
        record_offset
    );

    terminal::enable_raw_mode().context("failed to enter raw terminal mode")?;
    let result = run(&mut engine);
    terminal::disable_raw_mode().ok();
    println!();

    // Orderly shutdown: persist the session, flush the tape header
    engine
        .session_snapshot()
        .save(&session_path)
        .with_context(|| format!("failed to save session {:?}", session_path))?;
    engine.close().context("failed to close project tape")?;
    result
}

fn run(engine: &mut Engine<AlsaBackend>) -> Result<()> {
    let mut cursor = 0usize;
    let channels = engine.tracks().len();

    loop {
        if engine.state() == TransportState::Play {
            // Faults drop the transport back to Stop; keep taking commands
            if let Err(e) = engine.run_period() {
                log::error!("transport stopped: {e}");
            }
        }

        let mut timeout = if engine.state() == TransportState::Play {
            Duration::ZERO
        } else {
            Duration::from_millis(50)
        };
        while event::poll(timeout)? {
            timeout = Duration::ZERO;
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match map_key(key, engine, &mut cursor, channels) {
                    KeyAction::Quit => return Ok(()),
                    KeyAction::Command(cmd) => {
                        if let Err(e) = engine.handle_command(cmd) {
                            log::warn!("rejected {:?}: {}", cmd, e);
                        }
                    }
                    KeyAction::None => {}
                }
            }
        }

        draw_status(engine, cursor)?;
    }
}

enum KeyAction {
    Quit,
    Command(TransportCommand),
    None,
}

fn map_key(
    key: KeyEvent,
    engine: &Engine<AlsaBackend>,
    cursor: &mut usize,
    channels: usize,
) -> KeyAction {
    use TransportCommand::*;

    let cmd = match key.code {
        KeyCode::Char('q') => return KeyAction::Quit,
        KeyCode::Up => {
            *cursor = cursor.checked_sub(1).unwrap_or(channels - 1);
            return KeyAction::None;
        }
        KeyCode::Down => {
            *cursor = (*cursor + 1) % channels;
            return KeyAction::None;
        }
        KeyCode::Char(' ') => {
            if engine.state() == TransportState::Play {
                Stop
            } else {
                Start
            }
        }
        KeyCode::Char('r') => ToggleRecordEnable,
        KeyCode::Char('a') => ArmA(*cursor),
        KeyCode::Char('b') => ArmB(*cursor),
        KeyCode::Char('m') => ToggleMute(*cursor),
        KeyCode::Char('M') => ToggleMuteAll,
        KeyCode::Left => SeekRelative(-i64::from(SAMPLE_RATE)),
        KeyCode::Right => SeekRelative(i64::from(SAMPLE_RATE)),
        KeyCode::Home => SeekAbsolute(0),
        KeyCode::Char('[') => trim_monitor(engine, *cursor, 1, 0),
        KeyCode::Char(']') => trim_monitor(engine, *cursor, -1, 0),
        KeyCode::Char('{') => trim_monitor(engine, *cursor, 0, 1),
        KeyCode::Char('}') => trim_monitor(engine, *cursor, 0, -1),
        _ => return KeyAction::None,
    };
    KeyAction::Command(cmd)
}

/// Nudge the selected track's monitor attenuation by one 6 dB step
fn trim_monitor(
    engine: &Engine<AlsaBackend>,
    track: usize,
    delta_a: i8,
    delta_b: i8,
) -> TransportCommand {
    let (a, b) = engine
        .tracks()
        .get(track)
        .map(|t| (t.atten_a(), t.atten_b()))
        .unwrap_or((0, 0));
    TransportCommand::SetMonitor {
        track,
        atten_a: (a as i8 + delta_a).clamp(0, ATTEN_SILENCE as i8) as u8,
        atten_b: (b as i8 + delta_b).clamp(0, ATTEN_SILENCE as i8) as u8,
    }
}

fn draw_status(engine: &Engine<AlsaBackend>, cursor: usize) -> Result<()> {
    let status = engine.status();
    let state = match (status.state, status.record_enabled) {
        (TransportState::Play, true) => "REC ",
        (TransportState::Play, false) => "PLAY",
        (TransportState::Stop, true) => "STOP*",
        (TransportState::Stop, false) => "STOP",
    };
    let track = &status.tracks[cursor];
    print!(
        "\r{:5} {}  trk {:02} [{}{}{}{}] A-{:02} B-{:02}  xrun {}/{}   ",
        state,
        status.time,
        cursor + 1,
        if track.muted { 'M' } else { '-' },
        if track.recording { 'R' } else { '-' },
        if track.armed_a { 'a' } else { '-' },
        if track.armed_b { 'b' } else { '-' },
        track.atten_a,
        track.atten_b,
        status.underruns,
        status.overruns,
    );
    io::stdout().flush()?;
    Ok(())
}
