//! ALSA implementation of the PCM seam
//!
//! Uses blocking interleaved access (`snd_pcm_writei`/`snd_pcm_readi`), so
//! a period write returns once the driver has taken the samples; that is
//! the transport's clock. Xruns surface as EPIPE from the I/O calls and are
//! mapped to [`DeviceError::Xrun`]; recovery re-prepares the stream.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::ValueOr;

use super::{DeviceError, DeviceResult, Direction, PcmBackend, PcmStream, XrunKind};
use crate::types::MONITOR_CHANNELS;

/// ALSA backend holding the configured device names and latencies
pub struct AlsaBackend {
    playback_name: String,
    capture_name: String,
    playback_latency_us: u32,
    capture_latency_us: u32,
}

impl AlsaBackend {
    /// Create a backend for the given PCM names (e.g. "default", "hw:0")
    pub fn new(
        playback_name: impl Into<String>,
        capture_name: impl Into<String>,
        playback_latency_us: u32,
        capture_latency_us: u32,
    ) -> Self {
        Self {
            playback_name: playback_name.into(),
            capture_name: capture_name.into(),
            playback_latency_us,
            capture_latency_us,
        }
    }
}

impl PcmBackend for AlsaBackend {
    type Stream = AlsaStream;

    fn open(&self, direction: Direction, sample_rate: u32) -> DeviceResult<AlsaStream> {
        let (name, latency_us) = match direction {
            Direction::Playback => (&self.playback_name, self.playback_latency_us),
            Direction::Capture => (&self.capture_name, self.capture_latency_us),
        };
        open_stream(name, direction, sample_rate, latency_us)
    }
}

/// Open and configure one blocking S16_LE interleaved stereo stream
fn open_stream(
    name: &str,
    direction: Direction,
    sample_rate: u32,
    latency_us: u32,
) -> DeviceResult<AlsaStream> {
    let alsa_dir = match direction {
        Direction::Playback => alsa::Direction::Playback,
        Direction::Capture => alsa::Direction::Capture,
    };

    let pcm = PCM::new(name, alsa_dir, false).map_err(|e| DeviceError::Open {
        direction,
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    {
        let hwp = HwParams::any(&pcm).map_err(configure)?;
        hwp.set_access(Access::RWInterleaved).map_err(configure)?;
        hwp.set_format(Format::s16()).map_err(configure)?;
        hwp.set_channels(MONITOR_CHANNELS as u32).map_err(configure)?;
        hwp.set_rate(sample_rate, ValueOr::Nearest).map_err(configure)?;
        hwp.set_buffer_time_near(latency_us, ValueOr::Nearest)
            .map_err(configure)?;
        pcm.hw_params(&hwp).map_err(configure)?;
    }
    pcm.prepare().map_err(configure)?;

    log::info!(
        "opened {} PCM {:?}: {} Hz, {} channels, ~{} us buffer",
        direction,
        name,
        sample_rate,
        MONITOR_CHANNELS,
        latency_us
    );

    Ok(AlsaStream { pcm, direction })
}

fn configure(e: alsa::Error) -> DeviceError {
    DeviceError::Configure(e.to_string())
}

/// One open ALSA stream; dropped to close
pub struct AlsaStream {
    pcm: PCM,
    direction: Direction,
}

impl AlsaStream {
    fn map_io_error(&self, e: alsa::Error) -> DeviceError {
        // EPIPE is the xrun errno for both directions; ESTRPIPE means the
        // stream was suspended, which recover() also handles.
        if e.errno() == libc::EPIPE || e.errno() == libc::ESTRPIPE {
            let kind = match self.direction {
                Direction::Playback => XrunKind::Underrun,
                Direction::Capture => XrunKind::Overrun,
            };
            DeviceError::Xrun(kind)
        } else {
            DeviceError::Io(e.to_string())
        }
    }
}

impl PcmStream for AlsaStream {
    fn write_interleaved(&mut self, samples: &[i16]) -> DeviceResult<usize> {
        let io = self.pcm.io_i16().map_err(|e| DeviceError::Io(e.to_string()))?;
        io.writei(samples).map_err(|e| self.map_io_error(e))
    }

    fn read_interleaved(&mut self, samples: &mut [i16]) -> DeviceResult<usize> {
        let io = self.pcm.io_i16().map_err(|e| DeviceError::Io(e.to_string()))?;
        io.readi(samples).map_err(|e| self.map_io_error(e))
    }

    fn recover(&mut self) -> DeviceResult<()> {
        self.pcm
            .prepare()
            .map_err(|e| DeviceError::Io(e.to_string()))
    }
}
