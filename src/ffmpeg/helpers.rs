//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is `pub` and **safe** to call.  All `unsafe`
//! blocks are contained here with explicit safety arguments.

use ffmpeg_next as ffmpeg;
use std::ops::Deref;

// ── Encoder-context field accessors ─────────────────────────────────────────

/// Copy the `extradata` of an opened encoder.
///
/// For Vorbis this holds the three Xiph-laced header packets.
pub fn encoder_extradata(encoder: &ffmpeg::encoder::Audio) -> Vec<u8> {
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: `ctx.as_ptr()` is valid for the lifetime of `encoder`.
    // `extradata` is either null or points at `extradata_size` bytes owned by
    // the context; we copy them out before returning.
    unsafe {
        let p = ctx.as_ptr();
        let data = (*p).extradata;
        let size = (*p).extradata_size;
        if data.is_null() || size <= 0 {
            return Vec::new();
        }
        std::slice::from_raw_parts(data, size as usize).to_vec()
    }
}

/// Read `initial_padding` (encoder priming samples) from an opened encoder.
pub fn encoder_initial_padding(encoder: &ffmpeg::encoder::Audio) -> u32 {
    let ctx: &ffmpeg::codec::Context = encoder.deref();
    // SAFETY: plain i32 field on a live context.
    unsafe { (*ctx.as_ptr()).initial_padding.max(0) as u32 }
}

/// Samples buffered inside a resampler, expressed at `rate`.
pub fn resampler_delay(context: &ffmpeg::software::resampling::Context, rate: u32) -> i64 {
    // SAFETY: `swr_get_delay` only reads the context; the pointer is valid
    // for the lifetime of `context`.
    unsafe { ffmpeg::ffi::swr_get_delay(context.as_ptr() as *mut _, rate as i64).max(0) }
}

// ── FLTP audio plane reinterpretation ───────────────────────────────────────

/// Reinterpret a mutable raw byte slice from an FLTP audio plane as `&mut [f32]`.
///
/// Returns `None` if:
/// - the pointer is not 4-byte aligned, or
/// - `byte_slice.len()` is shorter than `sample_count * 4`.
pub fn fltp_plane_as_f32_mut(byte_slice: &mut [u8], sample_count: usize) -> Option<&mut [f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_mut_ptr();
    if (ptr as usize) % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: alignment and length are verified above.  FLTP planes are
    // native-endian f32 values laid out contiguously.
    Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut f32, sample_count) })
}

/// Extract a mutable audio plane slice from an `AVFrame`.
///
/// Works around a bug in `ffmpeg-next`'s `Audio::data_mut(index)` where it
/// stops counting planes if `linesize[1] == 0`. In FFmpeg, planar audio
/// frames often only populate `linesize[0]` to represent the size of *every*
/// plane.
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    unsafe {
        let is_planar = frame.format().is_planar();
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        // Packed audio has only one data plane
        if is_planar {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}

/// Interleaved bytes of a packed audio frame, trimmed to its sample count.
pub fn packed_audio_bytes(frame: &ffmpeg::util::frame::Audio) -> &[u8] {
    unsafe {
        let f = frame.as_ptr();
        let data = (*f).data[0];
        if data.is_null() || frame.format().is_planar() {
            return &[];
        }
        let channels = (*f).ch_layout.nb_channels.max(0) as usize;
        let len = frame.samples() * channels * frame.format().bytes();
        let len = len.min((*f).linesize[0].max(0) as usize);
        std::slice::from_raw_parts(data, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::util::channel_layout::ChannelLayout;
    use ffmpeg::util::format::sample::{Sample, Type};

    #[test]
    fn test_fltp_plane_rejects_short_slice() {
        let mut bytes = [0u8; 7];
        assert!(fltp_plane_as_f32_mut(&mut bytes, 2).is_none());
    }

    #[test]
    fn test_audio_plane_data_mut_planar() {
        crate::ffmpeg::init().unwrap();
        let mut frame = ffmpeg::util::frame::Audio::new(
            Sample::F32(Type::Planar),
            64,
            ChannelLayout::STEREO,
        );
        assert!(audio_plane_data_mut(&mut frame, 0).len() >= 64 * 4);
        assert!(audio_plane_data_mut(&mut frame, 1).len() >= 64 * 4);
        assert!(audio_plane_data_mut(&mut frame, 2).is_empty());
    }

    #[test]
    fn test_packed_audio_bytes_len() {
        crate::ffmpeg::init().unwrap();
        let frame = ffmpeg::util::frame::Audio::new(
            Sample::I16(Type::Packed),
            100,
            ChannelLayout::STEREO,
        );
        assert_eq!(packed_audio_bytes(&frame).len(), 400);
    }
}
