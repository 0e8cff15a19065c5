//! Audio decoder for the decode pipeline
//!
//! Wraps an FFmpeg `AVCodecContext` to decode compressed audio packets
//! (MP3, Vorbis, AAC, FLAC, …) into raw PCM `AVFrame`s.

use ffmpeg_next as ffmpeg;

use crate::error::{FfmpegError, Result};

/// Outcome of handing one packet to the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    Accepted,
    /// Corrupt or pre-roll packet the decoder refused; the stream goes on
    Skipped,
}

/// Outcome of asking the decoder for a frame
pub enum Received {
    Frame(ffmpeg::util::frame::Audio),
    /// Needs more input, or fully drained after EOF
    Pending,
    /// A frame failed to decode and was dropped; the stream goes on
    Dropped,
}

/// Errors after which the decoder cannot go on.
fn is_fatal(e: &ffmpeg::Error) -> bool {
    match e {
        ffmpeg::Error::Eof | ffmpeg::Error::Bug | ffmpeg::Error::Bug2 | ffmpeg::Error::Exit => {
            true
        }
        ffmpeg::Error::Other { errno } => {
            *errno == ffmpeg::error::ENOMEM || *errno == ffmpeg::error::EAGAIN
        }
        _ => false,
    }
}

/// Audio decoder backed by a FFmpeg codec context
pub struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
}

impl AudioDecoder {
    /// Open a decoder for the given stream from its own codec parameters.
    pub fn open(stream: &ffmpeg::format::stream::Stream) -> Result<Self> {
        let stream_index = stream.index();
        let context =
            ffmpeg::codec::Context::from_parameters(stream.parameters()).map_err(|e| {
                FfmpegError::DecoderNotFound(format!(
                    "Failed to create codec context for stream {}: {}",
                    stream_index, e
                ))
            })?;

        let decoder = context.decoder().audio().map_err(|e| {
            FfmpegError::DecoderNotFound(format!(
                "Failed to open audio decoder for stream {}: {}",
                stream_index, e
            ))
        })?;

        tracing::debug!(
            stream_index,
            codec = ?decoder.id(),
            rate = decoder.rate(),
            channels = decoder.channels(),
            "decoder opened"
        );

        Ok(Self {
            decoder,
            stream_index,
        })
    }

    /// Send a compressed packet to the decoder.
    ///
    /// A packet the decoder cannot decode is dropped and reported as
    /// [`PacketStatus::Skipped`]; only out-of-memory and API misuse fail.
    pub fn send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<PacketStatus> {
        match self.decoder.send_packet(packet) {
            Ok(()) => Ok(PacketStatus::Accepted),
            Err(e) if !is_fatal(&e) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    error = %e,
                    "send_packet: skipping undecodable packet"
                );
                Ok(PacketStatus::Skipped)
            }
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "send_packet error on stream {}: {}",
                self.stream_index, e
            ))
            .into()),
        }
    }

    /// Send EOF to flush the decoder's internal buffers.
    pub fn send_eof(&mut self) -> Result<()> {
        match self.decoder.send_eof() {
            Ok(()) => Ok(()),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(()),
            Err(ffmpeg::Error::Eof) => Ok(()),
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "send_eof error on stream {}: {}",
                self.stream_index, e
            ))
            .into()),
        }
    }

    /// Receive one decoded PCM frame.
    pub fn receive_frame(&mut self) -> Result<Received> {
        let mut frame = ffmpeg::util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Received::Frame(frame)),
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                Ok(Received::Pending)
            }
            Err(ffmpeg::Error::Eof) => Ok(Received::Pending),
            Err(e) if !is_fatal(&e) => {
                tracing::debug!(
                    stream_index = self.stream_index,
                    error = %e,
                    "receive_frame: dropping undecodable frame"
                );
                Ok(Received::Dropped)
            }
            Err(e) => Err(FfmpegError::DecodePacket(format!(
                "receive_frame error on stream {}: {}",
                self.stream_index, e
            ))
            .into()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.decoder.rate()
    }

    pub fn channels(&self) -> u16 {
        self.decoder.channels()
    }
}
