//! Audio transcoding module
//!
//! This module holds the codec-level building blocks the sessions drive:
//! - The codec engine contract fed by encode sessions
//! - FFmpeg MP3 / Vorbis encoders implementing that contract
//! - Audio decoder initialization from demuxed streams
//! - Resampling to canonical 48 kHz stereo S16

pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod resampler;

pub use encoder::{FfmpegAudioEncoder, OutputFormat};
pub use engine::{CodecEngine, EncodedPacket, PCM_FRAME_BYTES};
