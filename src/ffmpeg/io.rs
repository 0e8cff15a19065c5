//! Custom AVIOContext for demuxing from a pull source
//!
//! FFmpeg reads compressed input through a `read_packet` callback served
//! from a read-ahead buffer the session tops up between packets. Demuxers
//! treat a short read inside a page or atom as end of input, so the callback
//! never reports "no data yet": when the buffer runs dry it waits in the
//! source instead. Starvation is only ever reported by [`SourceInput::fill`],
//! before the demuxer is asked for the next packet.
//!
//! # Thread safety
//! `SourceInput` is NOT thread-safe. It is created and consumed on the
//! session's worker thread. The reader lives in a `Box` whose raw pointer is
//! handed to FFmpeg as the callback's `opaque`; it is only reconstructed when
//! the input is dropped.

use bytes::{Buf, BytesMut};
use ffmpeg_next as ffmpeg;
use std::ffi::{c_int, c_void};
use std::io;
use std::mem::ManuallyDrop;
use std::ptr;
use std::time::Duration;

use crate::error::{FfmpegError, Result};
use crate::source::MediaSource;

/// Pause between pulls while the callback waits out a stalled source.
const STALL_BACKOFF: Duration = Duration::from_millis(1);

/// Outcome of topping up the read-ahead buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Enough bytes are buffered, or the source has ended or failed
    Ready,
    /// The source has nothing right now
    Starved,
}

/// State reachable from the AVIO read callback.
struct SourceReader {
    source: Box<dyn MediaSource>,
    ahead: BytesMut,
    bytes_read: u64,
    eof: bool,
    error: Option<io::Error>,
    /// Stalls the callback had to wait out
    blocked: u64,
}

impl SourceReader {
    fn done(&self) -> bool {
        self.eof || self.error.is_some()
    }

    /// One pull into `buf`. `None` means the source would block.
    fn pull_into(&mut self, buf: &mut [u8]) -> Option<usize> {
        loop {
            match self.source.pull(buf) {
                Ok(0) => {
                    self.eof = true;
                    return Some(0);
                }
                Ok(n) => {
                    self.bytes_read += n as u64;
                    return Some(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    self.error = Some(e);
                    return Some(0);
                }
            }
        }
    }

    /// Pull until `watermark` bytes are buffered or the source stops.
    fn fill(&mut self, watermark: usize) -> Fill {
        while self.ahead.len() < watermark && !self.done() {
            let mut ahead = std::mem::take(&mut self.ahead);
            let have = ahead.len();
            ahead.resize(watermark, 0);
            let pulled = self.pull_into(&mut ahead[have..]);
            ahead.truncate(have + pulled.unwrap_or(0));
            self.ahead = ahead;
            if pulled.is_none() {
                return Fill::Starved;
            }
        }
        Fill::Ready
    }

    fn read(&mut self, buf: &mut [u8]) -> c_int {
        if !self.ahead.is_empty() {
            let n = buf.len().min(self.ahead.len());
            buf[..n].copy_from_slice(&self.ahead[..n]);
            self.ahead.advance(n);
            return n as c_int;
        }

        loop {
            if self.eof {
                return ffmpeg::ffi::AVERROR_EOF;
            }
            if self.error.is_some() {
                return ffmpeg::ffi::AVERROR_EXTERNAL;
            }
            match self.pull_into(buf) {
                Some(0) => continue,
                Some(n) => return n as c_int,
                None => {
                    self.blocked += 1;
                    std::thread::sleep(STALL_BACKOFF);
                }
            }
        }
    }
}

// C-compatible callback for FFmpeg

unsafe extern "C" fn read_packet(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    let reader = &mut *(opaque as *mut SourceReader);
    if buf_size <= 0 {
        return 0;
    }
    let slice = std::slice::from_raw_parts_mut(buf, buf_size as usize);
    reader.read(slice)
}

/// Demuxer reading through a custom AVIO context.
///
/// Drop order matters: the format context goes first, then the AVIO
/// context (and its buffer), then the reader it points at.
pub struct SourceInput {
    input: ManuallyDrop<ffmpeg::format::context::Input>,
    avio: *mut ffmpeg::ffi::AVIOContext,
    reader: *mut SourceReader,
}

impl SourceInput {
    /// Probe the container behind `source` and read its stream info.
    ///
    /// Blocks in `source.pull` for as long as probing needs data.
    pub fn open(source: Box<dyn MediaSource>, buffer_size: usize) -> Result<Self> {
        unsafe {
            let reader_ptr = Box::into_raw(Box::new(SourceReader {
                source,
                ahead: BytesMut::new(),
                bytes_read: 0,
                eof: false,
                error: None,
                blocked: 0,
            }));

            // Allocate internal buffer for AVIO
            let buffer = ffmpeg::ffi::av_malloc(buffer_size) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(reader_ptr));
                return Err(FfmpegError::InitFailed("Failed to allocate AVIO buffer".into()).into());
            }

            let mut avio = ffmpeg::ffi::avio_alloc_context(
                buffer,
                buffer_size as c_int,
                0,
                reader_ptr as *mut c_void,
                Some(read_packet),
                None,
                None,
            );
            if avio.is_null() {
                ffmpeg::ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(reader_ptr));
                return Err(
                    FfmpegError::InitFailed("Failed to allocate AVIO context".into()).into(),
                );
            }

            let mut ctx = ffmpeg::ffi::avformat_alloc_context();
            if ctx.is_null() {
                free_avio(&mut avio);
                drop(Box::from_raw(reader_ptr));
                return Err(
                    FfmpegError::InitFailed("Failed to allocate format context".into()).into(),
                );
            }
            (*ctx).pb = avio;
            (*ctx).flags |= ffmpeg::ffi::AVFMT_FLAG_CUSTOM_IO;

            // On failure avformat_open_input frees ctx but leaves our pb alone
            let ret = ffmpeg::ffi::avformat_open_input(
                &mut ctx,
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
            );
            if ret < 0 {
                free_avio(&mut avio);
                let reader = Box::from_raw(reader_ptr);
                let detail = match reader.error {
                    Some(ref e) => format!("source error: {}", e),
                    None => ffmpeg::Error::from(ret).to_string(),
                };
                return Err(FfmpegError::OpenInput(detail).into());
            }

            // From here on Drop owns the cleanup
            let mut this = Self {
                input: ManuallyDrop::new(ffmpeg::format::context::Input::wrap(ctx)),
                avio,
                reader: reader_ptr,
            };

            let ret =
                ffmpeg::ffi::avformat_find_stream_info(this.input.as_mut_ptr(), ptr::null_mut());
            if ret < 0 {
                let detail = match this.take_source_error() {
                    Some(e) => format!("source error: {}", e),
                    None => ffmpeg::Error::from(ret).to_string(),
                };
                return Err(FfmpegError::FindStreamInfo(detail).into());
            }

            tracing::debug!(
                format = this.input.format().name(),
                streams = this.input.streams().len(),
                "opened custom-IO input"
            );

            Ok(this)
        }
    }

    pub fn input(&self) -> &ffmpeg::format::context::Input {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut ffmpeg::format::context::Input {
        &mut self.input
    }

    /// Total bytes pulled from the source so far.
    pub fn bytes_read(&self) -> u64 {
        // SAFETY: `reader` is valid until Drop
        unsafe { (*self.reader).bytes_read }
    }

    /// Top up the read-ahead buffer to `watermark` bytes.
    ///
    /// Call before reading the next packet. `Fill::Starved` means the
    /// demuxer must not run yet; the buffered bytes are kept for next time.
    pub fn fill(&mut self, watermark: usize) -> Fill {
        // SAFETY: `reader` is valid until Drop; FFmpeg is not inside the
        // callback while the session holds `&mut self`
        unsafe { (*self.reader).fill(watermark) }
    }

    /// The source reported end of input.
    pub fn source_eof(&self) -> bool {
        // SAFETY: `reader` is valid until Drop
        unsafe { (*self.reader).eof }
    }

    /// Stalls the read callback waited out instead of reporting them.
    pub fn blocked_stalls(&self) -> u64 {
        // SAFETY: `reader` is valid until Drop
        unsafe { (*self.reader).blocked }
    }

    /// The error the source returned on its last failed pull, if any.
    pub fn take_source_error(&mut self) -> Option<io::Error> {
        // SAFETY: `reader` is valid until Drop and only touched on this thread
        unsafe { (*self.reader).error.take() }
    }
}

impl Drop for SourceInput {
    fn drop(&mut self) {
        unsafe {
            // avformat_close_input skips pb because of AVFMT_FLAG_CUSTOM_IO
            ManuallyDrop::drop(&mut self.input);
            free_avio(&mut self.avio);
            if !self.reader.is_null() {
                drop(Box::from_raw(self.reader));
                self.reader = ptr::null_mut();
            }
        }
    }
}

/// Free an AVIO context and its (possibly reallocated) internal buffer.
unsafe fn free_avio(avio: &mut *mut ffmpeg::ffi::AVIOContext) {
    if avio.is_null() {
        return;
    }
    ffmpeg::ffi::av_freep(&mut (**avio).buffer as *mut *mut u8 as *mut c_void);
    ffmpeg::ffi::avio_context_free(avio);
}


#[cfg(test)]
mod reader_tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out `chunk` bytes, then `WouldBlock`, alternately.
    struct Stuttering {
        data: VecDeque<u8>,
        chunk: usize,
        stall_next: bool,
    }

    impl MediaSource for Stuttering {
        fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.stall_next = !self.stall_next;
            if !self.stall_next {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.chunk).min(self.data.len());
            for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }
    }

    fn reader(data: Vec<u8>, chunk: usize) -> SourceReader {
        SourceReader {
            source: Box::new(Stuttering {
                data: data.into(),
                chunk,
                stall_next: false,
            }),
            ahead: BytesMut::new(),
            bytes_read: 0,
            eof: false,
            error: None,
            blocked: 0,
        }
    }

    #[test]
    fn test_fill_keeps_bytes_across_stalls() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut r = reader(data, 10);
        assert_eq!(r.fill(25), Fill::Starved);
        assert_eq!(r.ahead.len(), 10);
        assert_eq!(r.fill(25), Fill::Starved);
        assert_eq!(r.ahead.len(), 20);
        // Never pulls past the watermark
        assert_eq!(r.fill(25), Fill::Ready);
        assert_eq!(r.ahead.len(), 25);
        assert_eq!(&r.ahead[..3], &[0, 1, 2]);
        assert_eq!(r.bytes_read, 25);
    }

    #[test]
    fn test_read_waits_out_stalls() {
        let data: Vec<u8> = (0..40u8).collect();
        let mut r = reader(data.clone(), 7);
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = r.read(&mut buf);
            if n == ffmpeg::ffi::AVERROR_EOF {
                break;
            }
            assert!(n > 0, "unexpected read result {}", n);
            out.extend_from_slice(&buf[..n as usize]);
        }
        assert_eq!(out, data);
        assert!(r.blocked > 0);
        assert!(r.eof);
    }

    #[test]
    fn test_source_error_ends_fill() {
        let mut r = reader(Vec::new(), 1);
        r.source = Box::new(std::io::Cursor::new(vec![1u8, 2, 3]));
        assert_eq!(r.fill(64), Fill::Ready);
        assert!(r.eof);
        assert_eq!(r.ahead.len(), 3);

        struct Reset;
        impl MediaSource for Reset {
            fn pull(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            }
        }
        let mut r = reader(Vec::new(), 1);
        r.source = Box::new(Reset);
        assert_eq!(r.fill(64), Fill::Ready);
        let mut buf = [0u8; 8];
        assert_eq!(r.read(&mut buf), ffmpeg::ffi::AVERROR_EXTERNAL);
        assert!(r.error.is_some());
    }
}
