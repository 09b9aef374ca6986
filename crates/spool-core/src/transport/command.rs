//! Operator command set for the transport
//!
//! Commands are delivered between periods from a non-blocking source; a
//! command never preempts a period mid-flight. Combinations not listed in
//! the transport's state table are no-ops, and commands naming a track
//! outside the tape's channel count are rejected without changing state.

/// A single operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    // ─────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────
    /// Open devices and roll from the current head position
    Start,
    /// Close devices and halt; the head stays put
    Stop,
    /// Flip record-enable; disabling closes the capture device
    ToggleRecordEnable,

    // ─────────────────────────────────────────────────────────────
    // Record arms
    // ─────────────────────────────────────────────────────────────
    /// Toggle capture channel A onto a track (steals it from arm B)
    ArmA(usize),
    /// Toggle capture channel B onto a track (steals it from arm A)
    ArmB(usize),

    // ─────────────────────────────────────────────────────────────
    // Head
    // ─────────────────────────────────────────────────────────────
    /// Move the head to an absolute frame, clamped to the tape length
    SeekAbsolute(u64),
    /// Move the head by a signed frame delta, clamped to the tape length
    SeekRelative(i64),

    // ─────────────────────────────────────────────────────────────
    // Monitor
    // ─────────────────────────────────────────────────────────────
    /// Set one track's monitor attenuation for both buses
    SetMonitor {
        track: usize,
        atten_a: u8,
        atten_b: u8,
    },
    /// Flip one track's mute
    ToggleMute(usize),
    /// Flip every track's mute to the complement of track 0's
    ToggleMuteAll,
}
