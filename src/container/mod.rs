//! Container framing for encoded packets
//!
//! Vorbis packets are not self-delimiting, so the Vorbis adapter wraps them in
//! Ogg pages before they reach the output staging buffer. MP3 frames are
//! self-framing and bypass this module.

pub mod ogg;

pub use ogg::{OggPage, OggPageAssembler};
