//! Ogg page assembler
//!
//! Accumulates codec packets into Ogg pages (RFC 3533). Pages are cut at a
//! normal boundary (about 4 KiB of body, or 255 lacing values) and are forced
//! out whenever the queued data ends the logical stream.

use bytes::Bytes;

use crate::error::Result;
use crate::staging::StagingBuffer;

/// Capture pattern at the start of every page
const CAPTURE: &[u8; 4] = b"OggS";
/// Fixed part of the page header, before the lacing table
const HEADER_FIXED_LEN: usize = 27;
/// Body size at which a page is considered full
const PAGE_FILL: usize = 4096;
/// Maximum lacing values per page
const MAX_SEGMENTS: usize = 255;
/// Byte offset of the CRC field inside the header
const CRC_OFFSET: usize = 22;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

/// Granule position for pages on which no packet ends
pub const NO_GRANULE: i64 = -1;

/// One finished page: header (including lacing table) and body.
#[derive(Debug, Clone)]
pub struct OggPage {
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

impl OggPage {
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flags(&self) -> u8 {
        self.header[5]
    }

    pub fn granule(&self) -> i64 {
        i64::from_le_bytes(self.header[6..14].try_into().unwrap_or([0xff; 8]))
    }

    pub fn serial(&self) -> u32 {
        u32::from_le_bytes(self.header[14..18].try_into().unwrap_or_default())
    }

    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes(self.header[18..22].try_into().unwrap_or_default())
    }

    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.header[CRC_OFFSET..CRC_OFFSET + 4].try_into().unwrap_or_default())
    }
}

/// A lacing value waiting to be paged. `granule` is set on the segment that
/// completes a packet.
#[derive(Debug, Clone, Copy)]
struct Lace {
    value: u8,
    granule: Option<i64>,
}

/// Packet-to-page multiplexer for a single logical Ogg stream.
pub struct OggPageAssembler {
    serial: u32,
    sequence: u32,
    body: Vec<u8>,
    lacing: Vec<Lace>,
    /// The first queued segment continues a packet started on an earlier page
    continued: bool,
    bos_written: bool,
    eos_queued: bool,
    eos_written: bool,
    last_granule: i64,
}

impl OggPageAssembler {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            body: Vec::with_capacity(PAGE_FILL * 2),
            lacing: Vec::with_capacity(MAX_SEGMENTS),
            continued: false,
            bos_written: false,
            eos_queued: false,
            eos_written: false,
            last_granule: 0,
        }
    }

    /// Queue one packet. `granule` is the sample position at the end of the
    /// packet; `eos` marks the last packet of the stream.
    pub fn packet_in(&mut self, data: &[u8], granule: i64, eos: bool) {
        if self.eos_queued {
            tracing::warn!(serial = self.serial, "packet submitted after end of stream");
            return;
        }

        let full = data.len() / 255;
        for _ in 0..full {
            self.lacing.push(Lace {
                value: 255,
                granule: None,
            });
        }
        self.lacing.push(Lace {
            value: (data.len() % 255) as u8,
            granule: Some(granule),
        });
        self.body.extend_from_slice(data);

        if eos {
            self.eos_queued = true;
        }
    }

    /// Queue the codec header packets and flush them onto their own pages.
    ///
    /// The first packet goes alone on the beginning-of-stream page; the rest
    /// are flushed so that audio data always starts on a fresh page.
    pub fn submit_headers(&mut self, headers: &[Bytes]) -> Vec<OggPage> {
        let mut pages = Vec::new();
        for header in headers {
            self.packet_in(header, 0, false);
        }
        while let Some(page) = self.flush() {
            pages.push(page);
        }
        pages
    }

    /// Return a page if one is ready at a normal boundary, or if the queued
    /// data ends the stream.
    pub fn page_out(&mut self) -> Option<OggPage> {
        if self.lacing.is_empty() && !self.eos_pending() {
            return None;
        }

        let ready = self.eos_queued
            || !self.bos_written
            || self.body.len() >= PAGE_FILL
            || self.lacing.len() >= MAX_SEGMENTS;

        if ready {
            self.build_page()
        } else {
            None
        }
    }

    /// Force out a page holding whatever is queued.
    pub fn flush(&mut self) -> Option<OggPage> {
        if self.lacing.is_empty() && !self.eos_pending() {
            return None;
        }
        self.build_page()
    }

    /// Append every page that is ready to `staging`, header first, in order.
    ///
    /// Either all ready pages are appended or none are. Returns the number
    /// of bytes appended.
    pub fn write_ready_pages(&mut self, staging: &mut StagingBuffer) -> Result<usize> {
        let mut pages = Vec::new();
        while let Some(page) = self.page_out() {
            pages.push(page);
        }
        let written: usize = pages.iter().map(OggPage::len).sum();
        staging.reserve(written)?;
        for page in &pages {
            staging.append(&page.header)?;
            staging.append(&page.body)?;
        }
        Ok(written)
    }

    /// Granule position of the last page that carried one.
    pub fn last_granule(&self) -> i64 {
        self.last_granule
    }

    pub fn is_finished(&self) -> bool {
        self.eos_written
    }

    fn eos_pending(&self) -> bool {
        self.eos_queued && !self.eos_written
    }

    fn build_page(&mut self) -> Option<OggPage> {
        if self.eos_written {
            return None;
        }

        // Pick how many lacing values go on this page
        let mut segments = 0;
        let mut body_len = 0;
        let mut granule = NO_GRANULE;

        if !self.bos_written {
            // The beginning-of-stream page carries exactly one packet
            for lace in &self.lacing {
                segments += 1;
                body_len += lace.value as usize;
                if let Some(g) = lace.granule {
                    granule = g;
                    break;
                }
            }
        } else {
            for lace in &self.lacing {
                if segments == MAX_SEGMENTS || body_len >= PAGE_FILL {
                    break;
                }
                segments += 1;
                body_len += lace.value as usize;
                if let Some(g) = lace.granule {
                    granule = g;
                }
            }
        }

        let taken: Vec<Lace> = self.lacing.drain(..segments).collect();
        let body: Vec<u8> = self.body.drain(..body_len).collect();

        let mut flags = 0u8;
        if self.continued {
            flags |= FLAG_CONTINUED;
        }
        if !self.bos_written {
            flags |= FLAG_BOS;
        }
        if self.eos_queued && self.lacing.is_empty() {
            flags |= FLAG_EOS;
        }

        let mut header = Vec::with_capacity(HEADER_FIXED_LEN + taken.len());
        header.extend_from_slice(CAPTURE);
        header.push(0); // stream structure version
        header.push(flags);
        header.extend_from_slice(&granule.to_le_bytes());
        header.extend_from_slice(&self.serial.to_le_bytes());
        header.extend_from_slice(&self.sequence.to_le_bytes());
        header.extend_from_slice(&[0u8; 4]);
        header.push(taken.len() as u8);
        header.extend(taken.iter().map(|l| l.value));

        let crc = crc32(crc32(0, &header), &body);
        header[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());

        self.continued = taken.last().is_some_and(|l| l.value == 255);
        self.bos_written = true;
        self.sequence += 1;
        if granule != NO_GRANULE {
            self.last_granule = granule;
        }
        if flags & FLAG_EOS != 0 {
            self.eos_written = true;
        }

        tracing::trace!(
            serial = self.serial,
            sequence = self.sequence - 1,
            segments = taken.len(),
            body_len,
            granule,
            flags,
            "ogg page"
        );

        Some(OggPage { header, body })
    }
}

/// Ogg CRC-32: polynomial 0x04C11DB7, not reflected, initial value 0.
pub fn crc32(mut crc: u32, data: &[u8]) -> u32 {
    for &b in data {
        crc = (crc << 8) ^ CRC_TABLE[(((crc >> 24) as u8) ^ b) as usize];
    }
    crc
}

static CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut j = 0;
        while j < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04c1_1db7
            } else {
                r << 1
            };
            j += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}
