//! Codec Engine capability
//!
//! An encode session drives exactly one engine. The engine owns the codec
//! math; the session owns buffering and framing. Construction is the engine's
//! "init" and `Drop` is its "close".

use bytes::Bytes;

use crate::error::Result;

/// Bytes per interleaved 16-bit stereo sample frame
pub const PCM_FRAME_BYTES: usize = 4;

/// One compressed packet emitted by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Bytes,
    /// Sample position at the end of this packet
    pub granule: u64,
}

/// Streaming encoder fed with interleaved signed 16-bit little-endian stereo PCM.
pub trait CodecEngine {
    /// Short codec name for logs.
    fn name(&self) -> &'static str;

    /// Header packets that must precede any audio (empty for self-framing
    /// formats such as MP3).
    fn header_packets(&self) -> Result<Vec<Bytes>>;

    /// Feed PCM. `pcm.len()` is a multiple of [`PCM_FRAME_BYTES`]. Returns
    /// whatever the codec emitted immediately, which may be nothing.
    fn push(&mut self, pcm: &[u8]) -> Result<Vec<EncodedPacket>>;

    /// End of stream: return every remaining packet. Called at most once.
    fn flush(&mut self) -> Result<Vec<EncodedPacket>>;

    /// Priming samples the codec inserts before the first input sample.
    fn encoder_delay(&self) -> u32 {
        0
    }
}
