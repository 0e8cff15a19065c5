//! Transcode sessions
//!
//! An encode session turns canonical PCM into MP3 or Ogg/Vorbis bytes; a
//! decode session turns any compressed source into canonical PCM. Each is
//! driven by a single caller, one call at a time, and never grows its buffers.

pub mod decode;
pub mod encode;

pub use decode::{DecodeSession, DecodeState, DecodeStats, ReadStatus, Termination};
pub use encode::{EncodeSession, EncodeState};
