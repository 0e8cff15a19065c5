//! Test fixtures
//!
//! Deterministic PCM, a fake codec engine with bursty output, sources that
//! misbehave on purpose, and a minimal Ogg page walker.

use bytes::Bytes;
use std::collections::VecDeque;
use std::io;

use crate::container::ogg::crc32;
use crate::error::Result;
use crate::source::MediaSource;
use crate::transcode::{CodecEngine, EncodedPacket, PCM_FRAME_BYTES};

/// `samples` frames of a 440 Hz stereo sine at 48 kHz, S16LE interleaved.
pub fn sine_pcm(samples: usize) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples * PCM_FRAME_BYTES);
    for i in 0..samples {
        let t = i as f64 / 48000.0;
        let v = ((t * 440.0 * std::f64::consts::TAU).sin() * 12000.0) as i16;
        pcm.extend_from_slice(&v.to_le_bytes());
        pcm.extend_from_slice(&(v / 2).to_le_bytes());
    }
    pcm
}

/// Fake codec: one packet per 256 samples, packet sizes jump around so the
/// output never lines up with caller chunks. Output depends only on the PCM
/// content, not on how it was split across `push` calls.
pub struct BurstEngine {
    headers: Vec<Bytes>,
    pending: Vec<u8>,
    frames: u64,
    samples_in: u64,
}

impl BurstEngine {
    pub const FRAME_SAMPLES: usize = 256;

    pub fn new() -> Self {
        Self::with_headers(Vec::new())
    }

    pub fn with_headers(headers: Vec<Bytes>) -> Self {
        Self {
            headers,
            pending: Vec::new(),
            frames: 0,
            samples_in: 0,
        }
    }

    fn packet(&mut self, pcm: &[u8]) -> EncodedPacket {
        let size = 8 + (self.frames as usize * 97) % 700;
        let seed = pcm
            .iter()
            .fold(self.frames as u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let data: Vec<u8> = (0..size)
            .map(|i| (seed.wrapping_add(i as u32 * 13) >> 3) as u8)
            .collect();
        self.frames += 1;
        let granule = (self.frames * Self::FRAME_SAMPLES as u64).min(self.samples_in);
        EncodedPacket {
            data: Bytes::from(data),
            granule,
        }
    }
}

impl CodecEngine for BurstEngine {
    fn name(&self) -> &'static str {
        "burst"
    }

    fn header_packets(&self) -> Result<Vec<Bytes>> {
        Ok(self.headers.clone())
    }

    fn push(&mut self, pcm: &[u8]) -> Result<Vec<EncodedPacket>> {
        self.pending.extend_from_slice(pcm);
        self.samples_in += (pcm.len() / PCM_FRAME_BYTES) as u64;

        let frame_bytes = Self::FRAME_SAMPLES * PCM_FRAME_BYTES;
        let mut packets = Vec::new();
        while self.pending.len() >= frame_bytes {
            let frame: Vec<u8> = self.pending.drain(..frame_bytes).collect();
            packets.push(self.packet(&frame));
        }
        Ok(packets)
    }

    fn flush(&mut self) -> Result<Vec<EncodedPacket>> {
        let mut packets = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            packets.push(self.packet(&rest));
        }
        Ok(packets)
    }
}

/// Source that hands out at most `chunk` bytes per pull and, once
/// `stall_after` bytes are out, reports `WouldBlock` on every
/// `stall_every`-th pull.
pub struct TrickleSource {
    data: VecDeque<u8>,
    chunk: usize,
    stall_every: usize,
    stall_after: usize,
    delivered: usize,
    pulls: usize,
    pub stalls: usize,
}

impl TrickleSource {
    pub fn new(data: Vec<u8>, chunk: usize, stall_every: usize) -> Self {
        Self {
            data: data.into(),
            chunk,
            stall_every,
            stall_after: 0,
            delivered: 0,
            pulls: 0,
            stalls: 0,
        }
    }

    pub fn stall_after(&mut self, bytes: usize) {
        self.stall_after = bytes;
    }
}

impl MediaSource for TrickleSource {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pulls += 1;
        let stalling = self.delivered >= self.stall_after && self.stall_every > 0;
        if stalling && self.pulls % self.stall_every == 0 {
            self.stalls += 1;
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data yet"));
        }
        let n = buf.len().min(self.chunk).min(self.data.len());
        for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
            *dst = src;
        }
        self.delivered += n;
        Ok(n)
    }
}

/// Source that yields its data and then fails instead of reporting EOF.
pub struct BrokenSource {
    data: VecDeque<u8>,
}

impl BrokenSource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

impl MediaSource for BrokenSource {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "upstream reset"));
        }
        let n = buf.len().min(self.data.len());
        for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

/// Header fields of one Ogg page.
#[derive(Debug, Clone)]
pub struct PageInfo {
    /// Byte offset of the capture pattern
    pub offset: usize,
    pub flags: u8,
    pub granule: i64,
    pub sequence: u32,
    pub body_len: usize,
}

/// Walk a byte stream page by page. Panics on broken framing.
pub fn parse_ogg_pages(mut data: &[u8]) -> Vec<PageInfo> {
    let mut pages = Vec::new();
    let mut offset = 0;
    while !data.is_empty() {
        assert_eq!(&data[..4], b"OggS", "page {} capture", pages.len());
        let nseg = data[26] as usize;
        let body_len: usize = data[27..27 + nseg].iter().map(|&l| l as usize).sum();
        pages.push(PageInfo {
            offset,
            flags: data[5],
            granule: i64::from_le_bytes(data[6..14].try_into().unwrap()),
            sequence: u32::from_le_bytes(data[18..22].try_into().unwrap()),
            body_len,
        });
        data = &data[27 + nseg + body_len..];
        offset += 27 + nseg + body_len;
    }
    pages
}

/// Overwrite the first byte of the packet that opens `page` and fix the
/// page checksum, so only the codec can tell the packet is broken.
pub fn corrupt_first_packet(ogg: &mut [u8], page: &PageInfo, byte: u8) {
    let nseg = ogg[page.offset + 26] as usize;
    let header_len = 27 + nseg;
    let end = page.offset + header_len + page.body_len;
    ogg[page.offset + header_len] = byte;

    ogg[page.offset + 22..page.offset + 26].fill(0);
    let crc = crc32(0, &ogg[page.offset..end]);
    ogg[page.offset + 22..page.offset + 26].copy_from_slice(&crc.to_le_bytes());
}
