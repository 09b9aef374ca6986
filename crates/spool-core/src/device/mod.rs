//! PCM device seam
//!
//! The transport talks to the host sound layer through a pair of traits
//! that present exactly what the period loop needs: blocking interleaved
//! signed 16-bit stereo read/write, xrun signalling, and recovery. The real
//! implementation lives in [`alsa`]; tests drive the transport with a
//! scripted stub instead of hardware.

use std::fmt;

use thiserror::Error;

#[cfg(target_os = "linux")]
pub mod alsa;

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Playback,
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Playback => write!(f, "playback"),
            Direction::Capture => write!(f, "capture"),
        }
    }
}

/// Which way a stream fell over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrunKind {
    /// Playback buffer ran dry
    Underrun,
    /// Capture buffer overflowed before we read it
    Overrun,
}

impl fmt::Display for XrunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XrunKind::Underrun => write!(f, "underrun"),
            XrunKind::Overrun => write!(f, "overrun"),
        }
    }
}

/// Errors raised by the PCM layer
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Device could not be opened
    #[error("failed to open {direction} device {name:?}: {reason}")]
    Open {
        direction: Direction,
        name: String,
        reason: String,
    },

    /// Device refused the required stream format
    #[error("failed to configure PCM stream: {0}")]
    Configure(String),

    /// Buffer under/overrun; recoverable, the caller should call recover()
    #[error("stream {0}")]
    Xrun(XrunKind),

    /// Any other stream I/O failure
    #[error("PCM I/O: {0}")]
    Io(String),
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// One open blocking PCM stream (stereo, signed 16-bit LE, interleaved)
///
/// Writes block until the driver has consumed the period, which is what
/// paces the transport loop. Dropping the stream closes the device.
pub trait PcmStream {
    /// Write interleaved stereo frames; returns frames accepted
    fn write_interleaved(&mut self, samples: &[i16]) -> DeviceResult<usize>;

    /// Read interleaved stereo frames; returns frames delivered
    fn read_interleaved(&mut self, samples: &mut [i16]) -> DeviceResult<usize>;

    /// Reset the stream after an xrun so streaming can continue
    fn recover(&mut self) -> DeviceResult<()>;
}

/// Opens playback and capture streams on demand
///
/// Capture and playback are independently opened devices; the transport's
/// record offset compensates for their aggregate round-trip latency.
pub trait PcmBackend {
    type Stream: PcmStream;

    /// Open a stream in the given direction at the given sample rate
    fn open(&self, direction: Direction, sample_rate: u32) -> DeviceResult<Self::Stream>;
}
