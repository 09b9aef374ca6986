//! Project tape file handling
//!
//! The project tape is a single multi-channel WAV-RIFF file treated as a
//! random-access tape: one `fmt ` chunk (PCM, 16-bit, channel-major
//! interleave) and one `data` chunk holding every track. The engine insists
//! on a minimal header layout with sample data starting at byte 44; files
//! that arrive with any other layout are rewritten in place on open.
//!
//! Reads for the play stream are position-dependent (the tape keeps a play
//! cursor); the overdub path uses positional reads/writes (`pread`/`pwrite`)
//! so it can never disturb that cursor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::{BYTES_PER_SAMPLE, DATA_OFFSET, MAX_TRACKS, PERIOD_FRAMES, SAMPLE_RATE};

/// Copy run size used when relocating the data region during normalization
const NORMALIZE_RUN: usize = 512;

/// Errors raised by tape open/parse/IO
#[derive(Error, Debug)]
pub enum TapeError {
    /// File does not start with a RIFF preamble
    #[error("not a RIFF file")]
    NotRiff,

    /// RIFF form type is not WAVE
    #[error("not a WAVE file")]
    NotWave,

    /// Only 16-bit PCM tapes are supported
    #[error("unsupported bit depth: {0} (16-bit only)")]
    UnsupportedBitDepth(u16),

    /// Only plain PCM (format tag 1) is supported
    #[error("unsupported encoding tag: {0} (PCM only)")]
    UnsupportedEncoding(u16),

    /// Channel count outside 1..=MAX_TRACKS
    #[error("unsupported channel count: {0} (1..={MAX_TRACKS} tracks)")]
    UnsupportedChannelCount(u16),

    /// Required chunk never appeared
    #[error("missing required chunk: {0}")]
    MissingChunk(&'static str),

    /// Underlying file I/O failure
    #[error("tape I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tape operations
pub type TapeResult<T> = Result<T, TapeError>;

/// The open project tape
///
/// Held open for the whole session; [`TapeFile::close`] flushes the header
/// size fields and releases the handle.
pub struct TapeFile {
    file: File,
    path: PathBuf,
    channels: u16,
    sample_rate: u32,
    /// File offset one past the last data byte; always equals the file length
    end_of_data: u64,
    /// One period of zeros, reused by [`TapeFile::extend_silence`]
    silence: Vec<u8>,
    created: bool,
}

impl TapeFile {
    /// Open the project tape, creating it if absent or empty
    ///
    /// A new tape gets a fresh minimal header for `default_channels` tracks
    /// (16-bit, 44,100 Hz) and an empty data chunk. An existing tape is
    /// parsed, validated, and normalized in place if its data region does
    /// not start at byte 44.
    pub fn open<P: AsRef<Path>>(path: P, default_channels: u16) -> TapeResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            if default_channels == 0 || default_channels as usize > MAX_TRACKS {
                return Err(TapeError::UnsupportedChannelCount(default_channels));
            }
            file.write_all_at(&minimal_header(default_channels, SAMPLE_RATE, 0), 0)?;
            log::info!(
                "created project tape {:?} ({} tracks, {} Hz)",
                path,
                default_channels,
                SAMPLE_RATE
            );
            return Ok(Self {
                file,
                path,
                channels: default_channels,
                sample_rate: SAMPLE_RATE,
                end_of_data: DATA_OFFSET,
                silence: vec![0; PERIOD_FRAMES * default_channels as usize * BYTES_PER_SAMPLE],
                created: true,
            });
        }

        let (channels, sample_rate, data_offset) = parse_header(&mut file)?;

        if data_offset != DATA_OFFSET {
            let data_size = len.saturating_sub(data_offset);
            normalize(&mut file, data_offset, data_size, channels, sample_rate)?;
        }

        let end_of_data = file.metadata()?.len();
        log::info!(
            "opened project tape {:?}: {} tracks, {} Hz, {} frames",
            path,
            channels,
            sample_rate,
            (end_of_data - DATA_OFFSET) / (channels as u64 * BYTES_PER_SAMPLE as u64)
        );

        Ok(Self {
            file,
            path,
            channels,
            sample_rate,
            end_of_data,
            silence: vec![0; PERIOD_FRAMES * channels as usize * BYTES_PER_SAMPLE],
            created: false,
        })
    }

    /// Number of channels (tracks) on the tape
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Sample rate declared by the fmt chunk
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether open created a fresh tape
    pub fn created(&self) -> bool {
        self.created
    }

    /// Path the tape was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes per frame (one sample from every channel)
    pub fn frame_size(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Bytes per period
    pub fn period_bytes(&self) -> usize {
        PERIOD_FRAMES * self.frame_size()
    }

    /// File offset one past the last data byte
    pub fn end_of_data(&self) -> u64 {
        self.end_of_data
    }

    /// Number of whole frames on the tape
    pub fn last_frame(&self) -> u64 {
        (self.end_of_data - DATA_OFFSET) / self.frame_size() as u64
    }

    /// Position the play cursor at the given frame
    pub fn seek_frame(&mut self, frame: u64) -> TapeResult<()> {
        self.file
            .seek(SeekFrom::Start(DATA_OFFSET + frame * self.frame_size() as u64))?;
        Ok(())
    }

    /// Read up to one period from the play cursor
    ///
    /// Returns the number of bytes read; a short read at end of tape is
    /// permitted and 0 means end-of-stream.
    pub fn read_period(&mut self, buf: &mut [u8]) -> TapeResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    /// Positional read that leaves the play cursor untouched
    ///
    /// Returns the number of bytes read (short at end of tape).
    pub fn read_period_at(&self, buf: &mut [u8], offset: u64) -> TapeResult<usize> {
        Ok(read_full_at(&self.file, buf, offset)?)
    }

    /// Positional write that leaves the play cursor untouched
    pub fn write_period_at(&self, buf: &[u8], offset: u64) -> TapeResult<()> {
        debug_assert!(offset + buf.len() as u64 <= self.end_of_data);
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    /// Append whole periods of silence at the end of the data region
    pub fn extend_silence(&mut self, periods: u64) -> TapeResult<()> {
        for _ in 0..periods {
            self.file.write_all_at(&self.silence, self.end_of_data)?;
            self.end_of_data += self.silence.len() as u64;
        }
        Ok(())
    }

    /// Flush the RIFF and data size fields and release the handle
    ///
    /// After close all offsets and frame counts derived from this tape are
    /// invalid.
    pub fn close(self) -> TapeResult<()> {
        let riff_size = (self.end_of_data - 8) as u32;
        let data_size = (self.end_of_data - DATA_OFFSET) as u32;
        self.file.write_all_at(&riff_size.to_le_bytes(), 4)?;
        self.file.write_all_at(&data_size.to_le_bytes(), 40)?;
        log::info!("closed project tape {:?} ({} data bytes)", self.path, data_size);
        Ok(())
    }
}

/// Parse the RIFF preamble and chunk list up to the data chunk
///
/// Returns (channels, sample rate, data offset). Scanning stops at `data`;
/// a tape whose fmt chunk follows the data chunk is rejected.
fn parse_header(file: &mut File) -> TapeResult<(u16, u32, u64)> {
    let mut preamble = [0u8; 12];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut preamble).map_err(|_| TapeError::NotRiff)?;
    if &preamble[0..4] != b"RIFF" {
        return Err(TapeError::NotRiff);
    }
    if &preamble[8..12] != b"WAVE" {
        return Err(TapeError::NotWave);
    }

    let mut format: Option<(u16, u32)> = None;

    loop {
        let mut chunk_header = [0u8; 8];
        if file.read_exact(&mut chunk_header).is_err() {
            return Err(TapeError::MissingChunk("data"));
        }
        let chunk_size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]);

        match &chunk_header[0..4] {
            b"fmt " => {
                if chunk_size < 16 {
                    return Err(TapeError::MissingChunk("fmt "));
                }
                let mut fmt = [0u8; 16];
                file.read_exact(&mut fmt)?;

                let format_tag = u16::from_le_bytes([fmt[0], fmt[1]]);
                let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                let bits_per_sample = u16::from_le_bytes([fmt[14], fmt[15]]);

                if format_tag != 1 {
                    return Err(TapeError::UnsupportedEncoding(format_tag));
                }
                if bits_per_sample != 16 {
                    return Err(TapeError::UnsupportedBitDepth(bits_per_sample));
                }
                if channels == 0 || channels as usize > MAX_TRACKS {
                    return Err(TapeError::UnsupportedChannelCount(channels));
                }

                // Skip any fmt extension bytes
                let rest = chunk_size as i64 - 16;
                if rest > 0 {
                    file.seek(SeekFrom::Current(rest))?;
                }
                format = Some((channels, sample_rate));
            }
            b"data" => {
                let (channels, sample_rate) = format.ok_or(TapeError::MissingChunk("fmt "))?;
                let data_offset = file.stream_position()?;
                return Ok((channels, sample_rate, data_offset));
            }
            _ => {
                file.seek(SeekFrom::Current(chunk_size as i64))?;
            }
        }

        // Chunks are padded to a word boundary
        if chunk_size % 2 != 0 {
            file.seek(SeekFrom::Current(1))?;
        }
    }
}

/// Build the 44-byte minimal header
pub(crate) fn minimal_header(channels: u16, sample_rate: u32, data_size: u32) -> [u8; 44] {
    let mut h = [0u8; 44];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes());
    h[22..24].copy_from_slice(&channels.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&(sample_rate * channels as u32 * BYTES_PER_SAMPLE as u32).to_le_bytes());
    h[32..34].copy_from_slice(&(channels * BYTES_PER_SAMPLE as u16).to_le_bytes());
    h[34..36].copy_from_slice(&16u16.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_size.to_le_bytes());
    h
}

/// Rewrite a non-minimal tape in place so data starts at byte 44
///
/// Writes a fresh minimal header, moves the data region down in 512-byte
/// runs (front to back, so source bytes are never clobbered before they
/// are read), and truncates the file to 44 + data size. Chunks other than
/// `fmt ` and `data` are discarded. The chunk scan cannot place a data
/// region below byte 44 (the preamble, fmt chunk and both chunk headers
/// already occupy that much), so the move is always downward and the
/// header write cannot overlap the source region.
fn normalize(
    file: &mut File,
    old_offset: u64,
    data_size: u64,
    channels: u16,
    sample_rate: u32,
) -> TapeResult<()> {
    debug_assert!(old_offset > DATA_OFFSET);
    log::info!(
        "normalizing tape header: moving {} data bytes from offset {} to {}",
        data_size,
        old_offset,
        DATA_OFFSET
    );

    file.write_all_at(&minimal_header(channels, sample_rate, data_size as u32), 0)?;

    let mut run = [0u8; NORMALIZE_RUN];
    let mut copied = 0u64;
    while copied < data_size {
        let want = NORMALIZE_RUN.min((data_size - copied) as usize);
        let n = read_full_at(file, &mut run[..want], old_offset + copied)?;
        if n == 0 {
            break;
        }
        file.write_all_at(&run[..n], DATA_OFFSET + copied)?;
        copied += n as u64;
        if copied % (1024 * 1024) == 0 {
            log::debug!("normalization: {} / {} bytes moved", copied, data_size);
        }
    }

    file.set_len(DATA_OFFSET + data_size)?;
    log::info!("normalization complete ({} data bytes)", data_size);
    Ok(())
}

/// Positional read loop; returns bytes read (short at end of file)
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tape_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("demo.wav")
    }

    #[test]
    fn test_create_minimal_tape() {
        let dir = tempfile::tempdir().unwrap();
        let tape = TapeFile::open(tape_path(&dir), 16).unwrap();

        assert!(tape.created());
        assert_eq!(tape.channels(), 16);
        assert_eq!(tape.sample_rate(), SAMPLE_RATE);
        assert_eq!(tape.end_of_data(), 44);
        assert_eq!(tape.last_frame(), 0);
        tape.close().unwrap();

        let bytes = std::fs::read(tape_path(&dir)).unwrap();
        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 36);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(u16::from_le_bytes(bytes[22..24].try_into().unwrap()), 16);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 44_100);
        assert_eq!(u16::from_le_bytes(bytes[32..34].try_into().unwrap()), 32);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 0);
    }

    #[test]
    fn test_reopen_is_not_created_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        TapeFile::open(tape_path(&dir), 8).unwrap().close().unwrap();

        let before = std::fs::read(tape_path(&dir)).unwrap();
        let tape = TapeFile::open(tape_path(&dir), 16).unwrap();
        assert!(!tape.created());
        // Channel count comes from the file, not the default
        assert_eq!(tape.channels(), 8);
        tape.close().unwrap();

        // Opening an already-minimal tape does not modify it
        assert_eq!(std::fs::read(tape_path(&dir)).unwrap(), before);
    }

    #[test]
    fn test_rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = tape_path(&dir);

        std::fs::write(&path, b"OggS this is not a wav file at all").unwrap();
        assert!(matches!(TapeFile::open(&path, 2), Err(TapeError::NotRiff)));

        let mut bytes = minimal_header(2, 44_100, 0).to_vec();
        bytes[8..12].copy_from_slice(b"AVI ");
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(TapeFile::open(&path, 2), Err(TapeError::NotWave)));

        let mut bytes = minimal_header(2, 44_100, 0).to_vec();
        bytes[34..36].copy_from_slice(&24u16.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            TapeFile::open(&path, 2),
            Err(TapeError::UnsupportedBitDepth(24))
        ));

        let mut bytes = minimal_header(2, 44_100, 0).to_vec();
        bytes[22..24].copy_from_slice(&17u16.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            TapeFile::open(&path, 2),
            Err(TapeError::UnsupportedChannelCount(17))
        ));
    }

    #[test]
    fn test_period_io_and_short_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut tape = TapeFile::open(tape_path(&dir), 2).unwrap();

        // Three periods of data plus a half period
        let frames = PERIOD_FRAMES as u64 * 3 + 64;
        tape.extend_silence(4).unwrap();
        assert_eq!(tape.last_frame(), PERIOD_FRAMES as u64 * 4);

        // Stamp a recognizable sample mid-tape via the positional writer
        let offset = DATA_OFFSET + frames * tape.frame_size() as u64;
        tape.write_period_at(&0x1234u16.to_le_bytes(), offset).unwrap();

        tape.seek_frame(frames).unwrap();
        let mut buf = vec![0u8; tape.period_bytes()];
        let n = tape.read_period(&mut buf).unwrap();
        // Short read: only 64 frames remain
        assert_eq!(n, 64 * tape.frame_size());
        assert_eq!(sample_at_bytes(&buf), 0x1234);

        // Next read is end-of-stream
        assert_eq!(tape.read_period(&mut buf).unwrap(), 0);
    }

    fn sample_at_bytes(buf: &[u8]) -> u16 {
        u16::from_le_bytes([buf[0], buf[1]])
    }

    #[test]
    fn test_extend_silence_grows_whole_periods_of_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let mut tape = TapeFile::open(tape_path(&dir), 4).unwrap();
        let period_bytes = tape.period_bytes() as u64;

        tape.extend_silence(3).unwrap();
        assert_eq!(tape.end_of_data(), 44 + 3 * period_bytes);
        assert_eq!(tape.last_frame(), 3 * PERIOD_FRAMES as u64);
        tape.close().unwrap();

        let bytes = std::fs::read(tape_path(&dir)).unwrap();
        assert_eq!(bytes.len() as u64, 44 + 3 * period_bytes);
        assert!(bytes[44..].iter().all(|&b| b == 0));
        // Close flushed both size fields
        assert_eq!(
            u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as u64,
            44 + 3 * period_bytes - 8
        );
        assert_eq!(
            u32::from_le_bytes(bytes[40..44].try_into().unwrap()) as u64,
            3 * period_bytes
        );
    }

    #[test]
    fn test_normalization_moves_data_to_44() {
        let dir = tempfile::tempdir().unwrap();
        let path = tape_path(&dir);

        // Hand-build a wav with junk chunks pushing data out to offset 128:
        // 12 (preamble) + 8+16 (fmt) + 8+76 (JUNK) + 8 (data header) = 128
        let data: Vec<u8> = (0..2000u32).flat_map(|i| (i as u16).to_le_bytes()).collect();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&((120 + data.len()) as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&44_100u32.to_le_bytes());
        bytes.extend_from_slice(&176_400u32.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"JUNK");
        bytes.extend_from_slice(&76u32.to_le_bytes());
        bytes.extend_from_slice(&[0xAA; 76]);
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        std::fs::write(&path, &bytes).unwrap();

        let tape = TapeFile::open(&path, 2).unwrap();
        assert_eq!(tape.channels(), 2);
        assert_eq!(tape.sample_rate(), 44_100);
        assert_eq!(tape.end_of_data(), 44 + data.len() as u64);
        assert_eq!(tape.last_frame(), 1000);
        tape.close().unwrap();

        let moved = std::fs::read(&path).unwrap();
        assert_eq!(moved.len(), 44 + data.len());
        assert_eq!(&moved[44..], &data[..]);
        assert_eq!(u16::from_le_bytes(moved[22..24].try_into().unwrap()), 2);

        // Normalize-on-open is idempotent
        TapeFile::open(&path, 2).unwrap().close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), moved);
    }

    #[test]
    fn test_positional_write_does_not_move_play_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut tape = TapeFile::open(tape_path(&dir), 2).unwrap();
        tape.extend_silence(2).unwrap();

        tape.seek_frame(0).unwrap();
        let mut first = vec![0u8; tape.period_bytes()];
        tape.read_period(&mut first).unwrap();

        // Overdub-style positional write into the second period
        let second_offset = DATA_OFFSET + tape.period_bytes() as u64;
        let patch = [0x42u8; 4];
        tape.write_period_at(&patch, second_offset).unwrap();

        // Play cursor still sits at the start of the second period
        let mut second = vec![0u8; tape.period_bytes()];
        tape.read_period(&mut second).unwrap();
        assert_eq!(&second[0..4], &patch);
    }
}
