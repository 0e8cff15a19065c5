//! FFmpeg-backed codec engines (MP3 via libmp3lame, Vorbis via libvorbis)
//!
//! Wraps an FFmpeg `AVCodecContext` to encode interleaved S16 stereo PCM.
//! Encoders want whole frames of `frame_size` samples in FLTP, so incoming
//! PCM is queued until a full frame is available.

use bytes::Bytes;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::codec;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;
use serde::{Deserialize, Serialize};

use crate::error::{FfmpegError, Result, TranscodeError};
use crate::ffmpeg::helpers;

use super::engine::{CodecEngine, EncodedPacket, PCM_FRAME_BYTES};

/// Sample format handed to the encoder
pub const ENCODER_SAMPLE_FMT: Sample = Sample::F32(ffmpeg::util::format::sample::Type::Planar);
/// Fallback frame size when the codec leaves it unset
pub const DEFAULT_FRAME_SIZE: usize = 1024;
/// MPEG-1 Layer III samples per frame
pub const MP3_FRAME_SIZE: usize = 1152;

/// Sample rates an MP3 encoder can produce
const MP3_SAMPLE_RATES: &[u32] = &[
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000,
];

/// Output format of an encode session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp3,
    Vorbis,
}

impl OutputFormat {
    /// FFmpeg encoder name.
    pub fn encoder_name(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "libmp3lame",
            OutputFormat::Vorbis => "libvorbis",
        }
    }

    /// MIME type of the produced byte stream.
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "audio/mpeg",
            OutputFormat::Vorbis => "audio/ogg",
        }
    }

    /// True when packets need Ogg pages around them.
    pub fn needs_container(&self) -> bool {
        matches!(self, OutputFormat::Vorbis)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Mp3 => write!(f, "mp3"),
            OutputFormat::Vorbis => write!(f, "vorbis"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "vorbis" | "ogg" => Ok(OutputFormat::Vorbis),
            other => Err(TranscodeError::Config(format!("unknown output format: {}", other))),
        }
    }
}

/// Encoder backed by a real FFmpeg codec context
pub struct FfmpegAudioEncoder {
    encoder: ffmpeg::encoder::Audio,
    format: OutputFormat,
    sample_rate: u32,
    frame_size: usize,
    small_last_frame: bool,
    /// Interleaved PCM waiting for a full frame
    pending: Vec<u8>,
    next_pts: i64,
    /// Real (unpadded) samples accepted so far
    samples_in: u64,
    headers: Vec<Bytes>,
}

impl FfmpegAudioEncoder {
    /// Open an encoder for `format` at the given parameters.
    ///
    /// Unsupported parameters or a missing encoder are reported as errors,
    /// never as a process abort.
    pub fn open(format: OutputFormat, sample_rate: u32, bitrate: u64) -> Result<Self> {
        if format == OutputFormat::Mp3 && !MP3_SAMPLE_RATES.contains(&sample_rate) {
            return Err(TranscodeError::UnsupportedSampleRate(sample_rate));
        }
        if sample_rate == 0 {
            return Err(TranscodeError::UnsupportedSampleRate(sample_rate));
        }

        let codec = find_encoder(format).ok_or_else(|| {
            FfmpegError::EncoderNotFound(format!(
                "{} encoder not found in this FFmpeg build",
                format.encoder_name()
            ))
        })?;

        // Build context and configure the audio encoder BEFORE opening
        let mut context = codec::Context::new_with_codec(codec);
        context.set_time_base(ffmpeg::Rational::new(1, sample_rate as i32));

        let mut audio_enc = context.encoder().audio().map_err(|e| {
            FfmpegError::EncoderCreate(format!("Cannot get audio encoder handle: {}", e))
        })?;

        audio_enc.set_rate(sample_rate as i32);
        audio_enc.set_format(ENCODER_SAMPLE_FMT);
        audio_enc.set_channel_layout(ChannelLayout::STEREO);
        audio_enc.set_bit_rate(bitrate as usize);

        let encoder = audio_enc.open_as(codec).map_err(|e| {
            FfmpegError::EncoderCreate(format!(
                "Failed to open {} at {} Hz / {} bps: {}",
                format.encoder_name(),
                sample_rate,
                bitrate,
                e
            ))
        })?;

        let frame_size = match encoder.frame_size() as usize {
            0 if format == OutputFormat::Mp3 => MP3_FRAME_SIZE,
            0 => DEFAULT_FRAME_SIZE,
            n => n,
        };
        let small_last_frame = codec
            .capabilities()
            .contains(codec::capabilities::Capabilities::SMALL_LAST_FRAME);

        let headers = match format {
            OutputFormat::Mp3 => Vec::new(),
            OutputFormat::Vorbis => split_xiph_headers(&helpers::encoder_extradata(&encoder))?,
        };

        tracing::debug!(
            codec = format.encoder_name(),
            sample_rate,
            bitrate,
            frame_size,
            headers = headers.len(),
            "encoder opened"
        );

        Ok(Self {
            encoder,
            format,
            sample_rate,
            frame_size,
            small_last_frame,
            pending: Vec::with_capacity(frame_size * PCM_FRAME_BYTES * 2),
            next_pts: 0,
            samples_in: 0,
            headers,
        })
    }

    /// The number of samples per channel the encoder expects per frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Convert `samples` interleaved S16 frames into one FLTP frame and send it.
    fn send_pcm(&mut self, pcm: &[u8], samples: usize) -> Result<()> {
        let mut frame =
            ffmpeg::util::frame::Audio::new(ENCODER_SAMPLE_FMT, samples, ChannelLayout::STEREO);
        frame.set_rate(self.sample_rate);
        frame.set_pts(Some(self.next_pts));

        for ch in 0..2 {
            let plane = helpers::audio_plane_data_mut(&mut frame, ch);
            let floats = helpers::fltp_plane_as_f32_mut(plane, samples).ok_or_else(|| {
                FfmpegError::EncodeFrame(format!("FLTP plane {} has bad alignment or length", ch))
            })?;
            for (i, out) in floats.iter_mut().enumerate() {
                let at = i * PCM_FRAME_BYTES + ch * 2;
                let sample = match pcm.get(at..at + 2) {
                    Some(b) => i16::from_le_bytes([b[0], b[1]]),
                    None => 0,
                };
                *out = sample as f32 / 32768.0;
            }
        }

        self.encoder.send_frame(&frame).map_err(|e| {
            FfmpegError::EncodeFrame(format!("{} send_frame error: {}", self.format, e))
        })?;
        self.next_pts += samples as i64;
        Ok(())
    }

    /// Receive one encoded packet, or `None` if the encoder needs more input.
    fn receive_packet(&mut self) -> Result<Option<EncodedPacket>> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        match self.encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let end = packet.pts().unwrap_or(self.next_pts) + packet.duration();
                let granule = (end.max(0) as u64).min(self.samples_in);
                Ok(Some(EncodedPacket {
                    data: Bytes::copy_from_slice(packet.data().unwrap_or(&[])),
                    granule,
                }))
            }
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => Ok(None),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(FfmpegError::EncodeFrame(format!(
                "{} receive_packet error: {}",
                self.format, e
            ))
            .into()),
        }
    }

    fn drain_packets(&mut self, out: &mut Vec<EncodedPacket>) -> Result<()> {
        while let Some(packet) = self.receive_packet()? {
            out.push(packet);
        }
        Ok(())
    }
}

impl CodecEngine for FfmpegAudioEncoder {
    fn name(&self) -> &'static str {
        self.format.encoder_name()
    }

    fn header_packets(&self) -> Result<Vec<Bytes>> {
        Ok(self.headers.clone())
    }

    fn push(&mut self, pcm: &[u8]) -> Result<Vec<EncodedPacket>> {
        self.pending.extend_from_slice(pcm);
        self.samples_in += (pcm.len() / PCM_FRAME_BYTES) as u64;

        let frame_bytes = self.frame_size * PCM_FRAME_BYTES;
        let mut packets = Vec::new();
        let mut consumed = 0;

        let pending = std::mem::take(&mut self.pending);
        while pending.len() - consumed >= frame_bytes {
            self.send_pcm(&pending[consumed..consumed + frame_bytes], self.frame_size)?;
            consumed += frame_bytes;
            self.drain_packets(&mut packets)?;
        }
        self.pending = pending;
        self.pending.drain(..consumed);

        Ok(packets)
    }

    fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        let mut packets = Vec::new();

        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            let samples = pending.len() / PCM_FRAME_BYTES;
            // Short frames are only legal for codecs that say so; otherwise pad with silence
            let frame_samples = if self.small_last_frame {
                samples
            } else {
                self.frame_size
            };
            self.send_pcm(&pending, frame_samples)?;
            self.drain_packets(&mut packets)?;
        }

        self.encoder.send_eof().map_err(|e| {
            FfmpegError::EncodeFrame(format!("{} send_eof error: {}", self.format, e))
        })?;
        self.drain_packets(&mut packets)?;

        tracing::debug!(
            codec = self.format.encoder_name(),
            packets = packets.len(),
            samples_in = self.samples_in,
            "encoder flushed"
        );
        Ok(packets)
    }

    fn encoder_delay(&self) -> u32 {
        helpers::encoder_initial_padding(&self.encoder)
    }
}

fn find_encoder(format: OutputFormat) -> Option<ffmpeg::Codec> {
    match format {
        OutputFormat::Mp3 => codec::encoder::find(codec::Id::MP3),
        OutputFormat::Vorbis => codec::encoder::find_by_name(format.encoder_name()),
    }
}

/// Check whether the FFmpeg build includes an encoder for `format`.
pub fn is_encoder_available(format: OutputFormat) -> bool {
    find_encoder(format).is_some()
}

/// Split Xiph-laced codec extradata into its header packets.
///
/// Layout: one byte holding `count - 1`, then the Xiph lacing sizes of every
/// packet but the last, then the packets back to back.
pub fn split_xiph_headers(extradata: &[u8]) -> Result<Vec<Bytes>> {
    let malformed = |why: &str| TranscodeError::Container(format!("bad Xiph extradata: {}", why));

    let (&first, mut rest) = extradata.split_first().ok_or_else(|| malformed("empty"))?;
    let count = first as usize + 1;

    let mut sizes = Vec::with_capacity(count);
    for _ in 0..count - 1 {
        let mut size = 0usize;
        loop {
            let (&b, tail) = rest.split_first().ok_or_else(|| malformed("truncated lacing"))?;
            rest = tail;
            size += b as usize;
            if b < 255 {
                break;
            }
        }
        sizes.push(size);
    }

    let declared: usize = sizes.iter().sum();
    if declared > rest.len() {
        return Err(malformed("sizes exceed data"));
    }
    sizes.push(rest.len() - declared);

    let mut headers = Vec::with_capacity(count);
    for size in sizes {
        let (packet, tail) = rest.split_at(size);
        headers.push(Bytes::copy_from_slice(packet));
        rest = tail;
    }
    Ok(headers)
}

/// Default bitrate for an output format.
pub fn get_recommended_bitrate(format: OutputFormat) -> u64 {
    match format {
        OutputFormat::Mp3 => 256_000,
        OutputFormat::Vorbis => 128_000,
    }
}
