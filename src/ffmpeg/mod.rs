//! FFmpeg module - provides wrappers and utilities for FFmpeg library access
//!
//! This module handles:
//! - FFmpeg initialization
//! - Routing FFmpeg's log output into `tracing`
//! - Custom AVIOContext for demuxing from a pull source
//! - Raw field access that `ffmpeg-next` does not expose

pub mod helpers;
pub mod io;

pub use ffmpeg_next as ffmpeg;

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize FFmpeg library
///
/// Safe to call more than once; only the first call does any work.
/// Returns an error if FFmpeg fails to initialize.
pub fn init() -> Result<(), crate::error::FfmpegError> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = ffmpeg::init().map_err(|e| {
            crate::error::FfmpegError::InitFailed(format!("ffmpeg::init() failed: {}", e))
        });
        if result.is_ok() {
            tracing::info!("FFmpeg initialized");
        }
    });
    result
}

/// Install a custom FFmpeg log callback that forwards messages to `tracing`.
///
/// **Ordering:** call after `init()` and before any session is started,
/// because the global log callback is not thread-safe to replace.
pub fn install_log_filter() {
    // SAFETY: both functions modify global FFmpeg state and are called once
    // at startup before any worker threads exist.
    unsafe {
        ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_WARNING as i32);
        ffmpeg::ffi::av_log_set_callback(Some(ffmpeg_log_callback));
    }
}

/// Benign messages from demuxing non-seekable input and from decoders that
/// trim priming samples.
const SUPPRESSED_MESSAGES: &[&str] = &[
    // mp3 demuxer without a Xing/LAME header and no way to seek for one
    "Estimating duration from bitrate, this may be inaccurate",
    // skip_samples on raw MP3 and Vorbis streams without reliable pts
    "Could not update timestamps for skipped samples",
    "Could not update timestamps for discarded samples",
];

unsafe extern "C" fn ffmpeg_log_callback(
    avcl: *mut std::ffi::c_void,
    level: std::ffi::c_int,
    fmt: *const std::ffi::c_char,
    vl: ffmpeg::ffi::va_list,
) {
    use std::ffi::CStr;

    // Respect the configured log level
    if level > ffmpeg::ffi::av_log_get_level() {
        return;
    }

    let mut buf = [0 as std::ffi::c_char; 1024];
    let mut print_prefix: std::ffi::c_int = 1;
    ffmpeg::ffi::av_log_format_line(
        avcl,
        level,
        fmt,
        vl,
        buf.as_mut_ptr(),
        buf.len() as std::ffi::c_int,
        &mut print_prefix,
    );

    let msg = CStr::from_ptr(buf.as_ptr()).to_string_lossy();
    let msg = msg.trim_end();
    if msg.is_empty() {
        return;
    }

    if is_suppressed(msg) {
        return;
    }

    if level <= ffmpeg::ffi::AV_LOG_ERROR as std::ffi::c_int {
        tracing::error!(target: "ffmpeg", "{}", msg);
    } else if level <= ffmpeg::ffi::AV_LOG_WARNING as std::ffi::c_int {
        tracing::warn!(target: "ffmpeg", "{}", msg);
    } else if level <= ffmpeg::ffi::AV_LOG_INFO as std::ffi::c_int {
        tracing::info!(target: "ffmpeg", "{}", msg);
    } else {
        tracing::debug!(target: "ffmpeg", "{}", msg);
    }
}

fn is_suppressed(msg: &str) -> bool {
    SUPPRESSED_MESSAGES.iter().any(|s| msg.contains(s))
}

/// Get FFmpeg version information
pub fn version_info() -> String {
    // SAFETY: avutil_version reads a compile-time constant
    let v = unsafe { ffmpeg::ffi::avutil_version() };
    format!("libavutil {}.{}.{}", v >> 16, (v >> 8) & 0xff, v & 0xff)
}
