//! Spool core — transport engine for a minimal multitrack tape recorder
//!
//! The project tape is a single multi-channel WAV file treated as a
//! random-access tape. The [`transport::Engine`] streams it through a
//! stereo monitor mix and overdubs one or two armed tracks from a stereo
//! capture device, one 128-frame period at a time, paced by the blocking
//! playback write.

pub mod config;
pub mod device;
pub mod mixer;
pub mod session;
pub mod tape;
pub mod track;
pub mod transport;
pub mod types;

pub use types::*;
