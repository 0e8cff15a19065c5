//! Encode session: canonical PCM in, MP3 frames or Ogg/Vorbis pages out
//!
//! Every byte the engine emits lands in the output staging buffer first and
//! is then drained into the caller's region. A call with empty PCM is
//! therefore a pure drain and can still return bytes, which is how a caller
//! collects the Vorbis header pages before it has any audio.

use uuid::Uuid;

use crate::config::EncodeConfig;
use crate::container::OggPageAssembler;
use crate::error::{Result, TranscodeError};
use crate::staging::StagingBuffer;
use crate::transcode::{
    CodecEngine, EncodedPacket, FfmpegAudioEncoder, OutputFormat, PCM_FRAME_BYTES,
};

/// Lifecycle of an encode session
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum EncodeState {
    /// Engine open, header pages (if any) staged
    Fresh,
    /// At least one `encode` call seen
    Streaming,
    /// Engine flushed; staged output still being drained
    Finishing,
    /// Everything delivered; engine and buffer released
    Closed,
}

/// How engine packets become output bytes
enum Framing {
    /// Packets are self-delimiting (MP3 frames) and go out as-is
    Raw,
    Ogg(OggPageAssembler),
}

pub struct EncodeSession {
    id: Uuid,
    format: OutputFormat,
    engine: Option<Box<dyn CodecEngine>>,
    framing: Framing,
    staging: StagingBuffer,
    state: EncodeState,
    /// Samples per channel accepted from the caller
    granule: u64,
    /// Granule of the last packet handed to the container
    last_packet_granule: u64,
    span: tracing::Span,
}

impl EncodeSession {
    /// Open an FFmpeg encoder for `format` and stage its header pages.
    pub fn start(format: OutputFormat, config: &EncodeConfig) -> Result<Self> {
        let engine = FfmpegAudioEncoder::open(
            format,
            config.sample_rate,
            config.bitrate_for(format),
        )?;
        Self::with_engine(format, Box::new(engine), config)
    }

    /// Build a session around an already-initialized engine.
    ///
    /// `format` decides the framing: Vorbis packets are wrapped in Ogg pages,
    /// MP3 packets are emitted directly.
    pub fn with_engine(
        format: OutputFormat,
        engine: Box<dyn CodecEngine>,
        config: &EncodeConfig,
    ) -> Result<Self> {
        if config.output_staging_bytes == 0 {
            return Err(TranscodeError::Config(
                "output staging buffer needs a non-zero capacity".into(),
            ));
        }

        let id = Uuid::new_v4();
        let span = tracing::debug_span!("encode_session", id = %id, format = %format);

        let framing = if format.needs_container() {
            // Low bits of a v4 uuid are random, which is all a serial needs
            Framing::Ogg(OggPageAssembler::new(id.as_u128() as u32))
        } else {
            Framing::Raw
        };

        let mut session = Self {
            id,
            format,
            engine: None,
            framing,
            staging: StagingBuffer::with_capacity(config.output_staging_bytes),
            state: EncodeState::Fresh,
            granule: 0,
            last_packet_granule: 0,
            span,
        };

        let headers = engine.header_packets()?;
        match &mut session.framing {
            Framing::Ogg(assembler) => {
                for page in assembler.submit_headers(&headers) {
                    session.staging.append(&page.header)?;
                    session.staging.append(&page.body)?;
                }
            }
            Framing::Raw => {
                for header in &headers {
                    session.staging.append(header)?;
                }
            }
        }

        {
            let _enter = session.span.enter();
            tracing::debug!(
                engine = engine.name(),
                headers = headers.len(),
                staged = session.staging.len(),
                delay = engine.encoder_delay(),
                "encode session started"
            );
        }

        session.engine = Some(engine);
        Ok(session)
    }

    /// Feed `pcm` (interleaved S16LE stereo) and drain up to `out.len()`
    /// bytes of encoded output into `out`.
    ///
    /// Empty `pcm` never touches the engine or the granule position. Returns
    /// the number of bytes written, which may be 0.
    pub fn encode(&mut self, pcm: &[u8], out: &mut [u8]) -> Result<usize> {
        let span = self.span.clone();
        let _enter = span.enter();

        if pcm.len() % PCM_FRAME_BYTES != 0 {
            return Err(TranscodeError::UnalignedPcm(pcm.len()));
        }

        match self.state {
            EncodeState::Closed if pcm.is_empty() => return Ok(0),
            EncodeState::Finishing | EncodeState::Closed if !pcm.is_empty() => {
                return Err(TranscodeError::SessionClosed);
            }
            EncodeState::Fresh => self.state = EncodeState::Streaming,
            _ => {}
        }

        if !pcm.is_empty() {
            let engine = self.engine.as_mut().ok_or(TranscodeError::SessionClosed)?;
            let packets = engine.push(pcm)?;
            self.stage_packets(&packets, false)?;
            self.granule += (pcm.len() / PCM_FRAME_BYTES) as u64;
        }

        let written = self.staging.drain_into(out);
        tracing::trace!(
            pcm = pcm.len(),
            written,
            buffered = self.staging.len(),
            granule = self.granule,
            "encode"
        );

        if self.state == EncodeState::Finishing && self.staging.is_empty() {
            self.close();
        }
        Ok(written)
    }

    /// Flush the engine (first call only) and drain up to `out.len()` bytes.
    ///
    /// Call again until it returns 0; once everything is delivered the
    /// session closes and further calls return 0.
    pub fn finish(&mut self, out: &mut [u8]) -> Result<usize> {
        let span = self.span.clone();
        let _enter = span.enter();

        match self.state {
            EncodeState::Closed => return Ok(0),
            EncodeState::Fresh | EncodeState::Streaming => {
                let engine = self.engine.as_mut().ok_or(TranscodeError::SessionClosed)?;
                let packets = engine.flush()?;
                self.stage_packets(&packets, true)?;
                self.state = EncodeState::Finishing;
                tracing::debug!(
                    packets = packets.len(),
                    buffered = self.staging.len(),
                    granule = self.granule,
                    "engine flushed"
                );
            }
            EncodeState::Finishing => {}
        }

        let written = self.staging.drain_into(out);
        if self.staging.is_empty() {
            self.close();
        }
        Ok(written)
    }

    /// Samples per channel consumed so far.
    pub fn granule_position(&self) -> u64 {
        self.granule
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    /// Encoded bytes staged and not yet delivered.
    pub fn buffered(&self) -> usize {
        self.staging.len()
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Priming samples the engine puts in front of the audio.
    pub fn encoder_delay(&self) -> u32 {
        self.engine.as_ref().map_or(0, |e| e.encoder_delay())
    }

    /// Granule of the last completed Ogg page, if this session writes Ogg.
    pub fn container_granule(&self) -> Option<i64> {
        match &self.framing {
            Framing::Ogg(assembler) => Some(assembler.last_granule()),
            Framing::Raw => None,
        }
    }

    /// Turn engine packets into output bytes in the staging buffer.
    ///
    /// With `eos` set the last packet ends the Ogg stream, which forces out
    /// whatever page is still open. Nothing is staged when the output does
    /// not fit as a whole.
    fn stage_packets(&mut self, packets: &[EncodedPacket], eos: bool) -> Result<()> {
        match &mut self.framing {
            Framing::Raw => {
                let total: usize = packets.iter().map(|p| p.data.len()).sum();
                self.staging.reserve(total)?;
                for packet in packets {
                    self.staging.append(&packet.data)?;
                }
            }
            Framing::Ogg(assembler) => {
                let last = packets.len().saturating_sub(1);
                for (i, packet) in packets.iter().enumerate() {
                    assembler.packet_in(&packet.data, packet.granule as i64, eos && i == last);
                    self.last_packet_granule = self.last_packet_granule.max(packet.granule);
                }
                if eos && packets.is_empty() {
                    assembler.packet_in(&[], self.last_packet_granule as i64, true);
                }
                assembler.write_ready_pages(&mut self.staging)?;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.engine = None;
        self.staging.release();
        self.state = EncodeState::Closed;
        tracing::debug!(granule = self.granule, "encode session closed");
    }
}

impl std::fmt::Debug for EncodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodeSession")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("state", &self.state)
            .field("granule", &self.granule)
            .field("staging", &self.staging)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{parse_ogg_pages, sine_pcm, BurstEngine};

    fn config(staging: usize) -> EncodeConfig {
        EncodeConfig {
            output_staging_bytes: staging,
            ..EncodeConfig::default()
        }
    }

    fn raw_session(staging: usize) -> EncodeSession {
        EncodeSession::with_engine(
            OutputFormat::Mp3,
            Box::new(BurstEngine::new()),
            &config(staging),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_encode_is_pure_drain() {
        let mut session = raw_session(64 * 1024);
        let mut out = [0u8; 16];
        assert_eq!(session.encode(&[], &mut out).unwrap(), 0);
        assert_eq!(session.granule_position(), 0);
        assert_eq!(session.state(), EncodeState::Streaming);
    }

    #[test]
    fn test_granule_counts_samples() {
        let mut session = raw_session(64 * 1024);
        let mut out = vec![0u8; 1 << 16];
        session.encode(&sine_pcm(100), &mut out).unwrap();
        session.encode(&[], &mut out).unwrap();
        session.encode(&sine_pcm(28), &mut out).unwrap();
        assert_eq!(session.granule_position(), 128);
    }

    #[test]
    fn test_unaligned_pcm_rejected() {
        let mut session = raw_session(1024);
        let mut out = [0u8; 16];
        let err = session.encode(&[0u8; 6], &mut out).unwrap_err();
        assert!(matches!(err, TranscodeError::UnalignedPcm(6)));
        assert_eq!(session.granule_position(), 0);
    }

    #[test]
    fn test_encode_after_finish_rejected() {
        let mut session = raw_session(64 * 1024);
        let mut small = [0u8; 1];
        session.encode(&sine_pcm(2000), &mut small).unwrap();
        session.finish(&mut small).unwrap();
        assert_eq!(session.state(), EncodeState::Finishing);

        let err = session.encode(&sine_pcm(4), &mut small).unwrap_err();
        assert!(matches!(err, TranscodeError::SessionClosed));
        // Empty input still drains
        assert_eq!(session.encode(&[], &mut small).unwrap(), 1);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let mut session = raw_session(64 * 1024);
        let mut out = vec![0u8; 1 << 16];
        session.encode(&sine_pcm(3000), &mut out).unwrap();

        let mut total = 0;
        loop {
            let n = session.finish(&mut out[..100]).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert!(total > 0);
        assert_eq!(session.state(), EncodeState::Closed);
        assert_eq!(session.buffered(), 0);
        for _ in 0..3 {
            assert_eq!(session.finish(&mut out).unwrap(), 0);
        }
        assert_eq!(session.encode(&[], &mut out).unwrap(), 0);
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut session = raw_session(64);
        let mut out = [0u8; 0];
        let err = session.encode(&sine_pcm(4096), &mut out).unwrap_err();
        assert!(matches!(err, TranscodeError::CapacityExceeded { .. }));
    }

    #[test]
    fn test_overflow_stages_nothing() {
        let mut session = raw_session(256);
        let mut out = [0u8; 0];
        session.encode(&sine_pcm(256), &mut out).unwrap();
        let staged = session.buffered();
        assert_eq!(session.granule_position(), 256);

        // Several packets at once, together too big for what is left
        let err = session.encode(&sine_pcm(4096), &mut out).unwrap_err();
        assert!(matches!(err, TranscodeError::CapacityExceeded { .. }));
        assert_eq!(session.granule_position(), 256);
        assert_eq!(session.buffered(), staged);
    }

    #[test]
    fn test_ogg_headers_before_pcm() {
        let engine = BurstEngine::with_headers(vec![
            bytes::Bytes::from_static(b"\x01vorbis-id"),
            bytes::Bytes::from_static(b"\x03vorbis-comment"),
            bytes::Bytes::from_static(b"\x05vorbis-setup"),
        ]);
        let mut session =
            EncodeSession::with_engine(OutputFormat::Vorbis, Box::new(engine), &config(64 * 1024))
                .unwrap();
        assert!(session.buffered() > 0);

        let mut out = vec![0u8; 4096];
        let n = session.encode(&[], &mut out).unwrap();
        assert!(n > 0);
        assert_eq!(&out[..4], b"OggS");
        assert_eq!(session.granule_position(), 0);
        assert_eq!(session.container_granule(), Some(0));
    }

    #[test]
    fn test_ogg_finish_marks_last_page() {
        let engine = BurstEngine::with_headers(vec![bytes::Bytes::from_static(b"id")]);
        let mut session =
            EncodeSession::with_engine(OutputFormat::Vorbis, Box::new(engine), &config(64 * 1024))
                .unwrap();
        let mut out = vec![0u8; 1 << 16];
        let mut stream = Vec::new();
        let n = session.encode(&sine_pcm(1500), &mut out).unwrap();
        stream.extend_from_slice(&out[..n]);
        let n = session.finish(&mut out).unwrap();
        stream.extend_from_slice(&out[..n]);
        assert_eq!(session.state(), EncodeState::Closed);

        let pages = parse_ogg_pages(&stream);
        let last = pages.last().expect("at least one page");
        assert_eq!(last.flags & crate::container::ogg::FLAG_EOS, 0x04);
        assert_eq!(last.granule, 1500);
        assert_eq!(session.container_granule(), Some(1500));
        assert!(pages[1..pages.len() - 1].iter().all(|p| p.flags & 0x04 == 0));
    }
}
