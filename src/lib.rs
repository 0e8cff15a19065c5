//! Streaming transcode core for a live audio relay
//!
//! Raw PCM from the mixer goes out as MP3 or Ogg/Vorbis through an
//! [`EncodeSession`]; compressed audio from anywhere comes back as canonical
//! 48 kHz stereo S16 PCM through a [`DecodeSession`]. Both sessions hand out
//! exactly as many bytes as the caller has room for and stage the rest in a
//! fixed buffer allocated once per session.

pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod ffmpeg;
pub mod session;
pub mod source;
pub mod staging;
pub mod transcode;

#[cfg(test)]
pub(crate) mod tests;

pub use config::{DecodeConfig, EncodeConfig, TranscodeConfig};
pub use error::{FfmpegError, Result, TranscodeError};
pub use session::{DecodeSession, DecodeStats, EncodeSession, ReadStatus, Termination};
pub use source::MediaSource;
pub use staging::StagingBuffer;
pub use transcode::{CodecEngine, EncodedPacket, OutputFormat};
