//! Decode session: any compressed source in, canonical PCM out
//!
//! `read` pulls from the demuxer only as far as the caller's buffer needs.
//! Frames still queued in the decoder are taken before another packet is
//! read, so at most the tail of one resampled frame is ever staged.

use ffmpeg_next as ffmpeg;
use serde::Serialize;
use uuid::Uuid;

use crate::config::DecodeConfig;
use crate::error::{FfmpegError, Result, TranscodeError};
use crate::ffmpeg::helpers;
use crate::ffmpeg::io::{Fill, SourceInput};
use crate::source::MediaSource;
use crate::staging::StagingBuffer;
use crate::transcode::decoder::{AudioDecoder, PacketStatus, Received};
use crate::transcode::resampler::AudioResampler;

/// Result of one `read` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStatus {
    /// Bytes written into the caller's buffer
    pub written: usize,
    /// No further bytes will ever be produced
    pub eos: bool,
}

/// Why a decode session stopped producing audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Termination {
    EndOfStream,
    Error(String),
}

/// Lifecycle of a decode session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecodeState {
    Open,
    Reading,
    Exhausted,
}

/// Counters for a decode session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    /// Packets of the selected stream read from the demuxer
    pub packets: u64,
    /// Packets or frames that failed to decode and were skipped
    pub skipped_packets: u64,
    /// Frames decoded
    pub frames: u64,
    /// Canonical PCM bytes produced
    pub bytes_out: u64,
}

/// One step of the pull pipeline
enum Pull {
    Frame(ffmpeg::util::frame::Audio),
    /// The source has nothing right now
    Starved,
    /// Demuxer and decoder are both drained
    Done,
}

pub struct DecodeSession {
    id: Uuid,
    input: SourceInput,
    stream_index: usize,
    decoder: AudioDecoder,
    resampler: Option<AudioResampler>,
    staging: StagingBuffer,
    state: DecodeState,
    /// Compressed bytes buffered before each demuxer read
    read_ahead: usize,
    /// Decode failures allowed in a row before the stream is given up
    max_decode_errors: u32,
    consecutive_errors: u32,
    /// EOF has been sent to the decoder
    demux_eof: bool,
    /// No more PCM will be produced; staging may still hold some
    finished: bool,
    termination: Option<Termination>,
    stats: DecodeStats,
    span: tracing::Span,
}

impl DecodeSession {
    /// Probe `source`, select its first audio stream and open a decoder.
    ///
    /// Blocks in the source for as long as probing needs data, waiting out
    /// any `WouldBlock` it reports meanwhile.
    pub fn open(source: Box<dyn MediaSource>, config: &DecodeConfig) -> Result<Self> {
        if config.pcm_staging_bytes == 0
            || config.avio_buffer_bytes == 0
            || config.read_ahead_bytes == 0
        {
            return Err(TranscodeError::Config(
                "decode buffers need a non-zero capacity".into(),
            ));
        }

        let id = Uuid::new_v4();
        let span = tracing::debug_span!("decode_session", id = %id);
        let _enter = span.enter();

        let input = SourceInput::open(source, config.avio_buffer_bytes)?;

        let stream = input
            .input()
            .streams()
            .find(|s| s.parameters().medium() == ffmpeg::media::Type::Audio)
            .ok_or(TranscodeError::NoAudioStream)?;
        let stream_index = stream.index();
        let decoder = AudioDecoder::open(&stream)?;

        tracing::info!(
            stream_index,
            format = input.input().format().name(),
            rate = decoder.sample_rate(),
            channels = decoder.channels(),
            "decode session opened"
        );

        drop(_enter);
        Ok(Self {
            id,
            input,
            stream_index,
            decoder,
            resampler: None,
            staging: StagingBuffer::with_capacity(config.pcm_staging_bytes),
            state: DecodeState::Open,
            read_ahead: config.read_ahead_bytes,
            max_decode_errors: config.max_decode_errors,
            consecutive_errors: 0,
            demux_eof: false,
            finished: false,
            termination: None,
            stats: DecodeStats::default(),
            span,
        })
    }

    /// Fill `out` with up to `out.len()` bytes of canonical PCM.
    ///
    /// `written == 0` with `eos == false` means the source is starved and
    /// more may come later. Once `eos` is reported every later call returns
    /// zero bytes with `eos` set. Packets that fail to decode are skipped;
    /// a failing source, or too many decode failures in a row, ends the
    /// stream the same way as EOF and [`termination`](Self::termination)
    /// tells which.
    pub fn read(&mut self, out: &mut [u8]) -> Result<ReadStatus> {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.state == DecodeState::Open {
            self.state = DecodeState::Reading;
        }

        let mut written = self.staging.drain_into(out);

        while written < out.len() && !self.finished {
            match self.advance(out, &mut written) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::trace!(written, "source starved");
                    break;
                }
                // Overflow means the staging buffer was sized too small
                Err(e @ TranscodeError::CapacityExceeded { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, written, "decode terminated");
                    self.finish(Termination::Error(e.to_string()));
                }
            }
        }

        let eos = self.finished && self.staging.is_empty();
        if eos {
            self.state = DecodeState::Exhausted;
        }
        Ok(ReadStatus { written, eos })
    }

    /// Release the session and every FFmpeg resource it holds.
    pub fn close(self) {
        let _enter = self.span.enter();
        tracing::debug!(
            packets = self.stats.packets,
            frames = self.stats.frames,
            bytes_out = self.stats.bytes_out,
            blocked_stalls = self.input.blocked_stalls(),
            "decode session closed"
        );
    }

    /// How the stream ended, once it has.
    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Canonical PCM bytes staged and not yet delivered.
    pub fn buffered(&self) -> usize {
        self.staging.len()
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Compressed bytes pulled from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.input.bytes_read()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the pipeline one step. Returns false when the source is starved.
    fn advance(&mut self, out: &mut [u8], written: &mut usize) -> Result<bool> {
        match self.pull()? {
            Pull::Frame(mut frame) => {
                self.stats.frames += 1;
                self.resample(&mut frame, out, written)?;
            }
            Pull::Starved => return Ok(false),
            Pull::Done => {
                self.flush_resampler(out, written)?;
                self.finish(Termination::EndOfStream);
            }
        }
        Ok(true)
    }

    /// Next decoded frame of the selected stream.
    fn pull(&mut self) -> Result<Pull> {
        loop {
            match self.decoder.receive_frame()? {
                Received::Frame(frame) => {
                    self.consecutive_errors = 0;
                    return Ok(Pull::Frame(frame));
                }
                Received::Dropped => {
                    self.decode_failed()?;
                    continue;
                }
                Received::Pending => {}
            }
            if self.demux_eof {
                return Ok(Pull::Done);
            }

            // The demuxer only runs once enough input is buffered
            if self.input.fill(self.read_ahead) == Fill::Starved {
                return Ok(Pull::Starved);
            }

            let mut packet = ffmpeg::codec::packet::Packet::empty();
            match packet.read(self.input.input_mut()) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    self.stats.packets += 1;
                    if self.decoder.send_packet(&packet)? == PacketStatus::Skipped {
                        self.decode_failed()?;
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    // A failing source looks like a short read to the demuxer
                    if let Some(source_error) = self.input.take_source_error() {
                        return Err(source_error.into());
                    }
                    if !self.input.source_eof() {
                        tracing::debug!("demuxer stopped before the source ended");
                    }
                    tracing::debug!(packets = self.stats.packets, "demuxer reached end of input");
                    self.decoder.send_eof()?;
                    self.demux_eof = true;
                }
                Err(e) => {
                    if let Some(source_error) = self.input.take_source_error() {
                        return Err(source_error.into());
                    }
                    return Err(FfmpegError::ReadFrame(format!("av_read_frame: {}", e)).into());
                }
            }
        }
    }

    /// Count a packet or frame that failed to decode.
    fn decode_failed(&mut self) -> Result<()> {
        self.stats.skipped_packets += 1;
        self.consecutive_errors += 1;
        if self.consecutive_errors > self.max_decode_errors {
            return Err(FfmpegError::DecodePacket(format!(
                "{} packets in a row failed to decode",
                self.consecutive_errors
            ))
            .into());
        }
        Ok(())
    }

    /// Convert one decoded frame and deliver it.
    fn resample(
        &mut self,
        frame: &mut ffmpeg::util::frame::Audio,
        out: &mut [u8],
        written: &mut usize,
    ) -> Result<()> {
        let rebuild = match &self.resampler {
            Some(resampler) => !resampler.matches(frame),
            None => true,
        };
        if rebuild {
            // Deliver what the old context still holds before replacing it
            self.flush_resampler(out, written)?;
            self.resampler = Some(AudioResampler::new(frame)?);
        }

        let pcm = match self.resampler.as_mut() {
            Some(resampler) => resampler.convert(frame)?,
            None => return Ok(()),
        };
        self.deliver(&pcm, out, written)
    }

    fn flush_resampler(&mut self, out: &mut [u8], written: &mut usize) -> Result<()> {
        if let Some(mut resampler) = self.resampler.take() {
            if let Some(tail) = resampler.flush()? {
                self.deliver(&tail, out, written)?;
            }
        }
        Ok(())
    }

    /// Copy canonical PCM into `out`; whatever does not fit is staged.
    fn deliver(
        &mut self,
        pcm: &ffmpeg::util::frame::Audio,
        out: &mut [u8],
        written: &mut usize,
    ) -> Result<()> {
        let bytes = helpers::packed_audio_bytes(pcm);
        let n = bytes.len().min(out.len() - *written);
        out[*written..*written + n].copy_from_slice(&bytes[..n]);
        *written += n;
        self.staging.append(&bytes[n..])?;
        self.stats.bytes_out += bytes.len() as u64;
        Ok(())
    }

    fn finish(&mut self, termination: Termination) {
        if self.finished {
            return;
        }
        match &termination {
            Termination::EndOfStream => tracing::debug!(
                frames = self.stats.frames,
                skipped = self.stats.skipped_packets,
                bytes_out = self.stats.bytes_out,
                "end of stream"
            ),
            Termination::Error(msg) => tracing::warn!(error = %msg, "stream ended by error"),
        }
        self.finished = true;
        self.resampler = None;
        self.termination = Some(termination);
    }
}

impl std::fmt::Debug for DecodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeSession")
            .field("id", &self.id)
            .field("stream_index", &self.stream_index)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("staging", &self.staging)
            .finish()
    }
}
