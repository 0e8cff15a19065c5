//! Audio resampler for the decode pipeline
//!
//! Converts decoded PCM frames of any format, rate and layout to the
//! canonical 48 kHz / stereo / interleaved S16 stream a decode session emits.

use ffmpeg_next as ffmpeg;
use ffmpeg_next::software::resampling;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::sample::Sample;

use crate::error::{FfmpegError, Result};
use crate::ffmpeg::helpers;

/// Canonical output sample rate
pub const CANONICAL_SAMPLE_RATE: u32 = 48000;
/// Canonical output channel layout
pub const CANONICAL_CHANNEL_LAYOUT: ChannelLayout = ChannelLayout::STEREO;
/// Canonical output sample format: signed 16-bit, interleaved
pub const CANONICAL_SAMPLE_FORMAT: Sample = Sample::I16(ffmpeg::util::format::sample::Type::Packed);

/// Extra output room on top of the computed sample count
const OUTPUT_MARGIN: usize = 32;

/// Input side of a resampler; a change means the context must be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputSpec {
    format: Sample,
    rate: u32,
    layout: ChannelLayout,
}

/// Audio resampler wrapping FFmpeg's `SwrContext`
pub struct AudioResampler {
    context: resampling::Context,
    input: InputSpec,
}

impl AudioResampler {
    /// Create a resampler for frames shaped like `src_frame`.
    pub fn new(src_frame: &ffmpeg::util::frame::Audio) -> Result<Self> {
        let input = InputSpec {
            format: src_frame.format(),
            rate: src_frame.rate(),
            layout: source_layout(src_frame),
        };

        let context = resampling::Context::get(
            input.format,
            input.layout,
            input.rate,
            CANONICAL_SAMPLE_FORMAT,
            CANONICAL_CHANNEL_LAYOUT,
            CANONICAL_SAMPLE_RATE,
        )
        .map_err(|e| {
            FfmpegError::ResamplerCreate(format!(
                "{:?} {} Hz {} ch -> s16 48000 Hz stereo: {}",
                input.format,
                input.rate,
                input.layout.channels(),
                e
            ))
        })?;

        tracing::debug!(
            format = ?input.format,
            rate = input.rate,
            channels = input.layout.channels(),
            "resampler created"
        );

        Ok(Self { context, input })
    }

    /// True when `frame` can go through this resampler unchanged.
    pub fn matches(&self, frame: &ffmpeg::util::frame::Audio) -> bool {
        frame.format() == self.input.format
            && frame.rate() == self.input.rate
            && source_layout(frame) == self.input.layout
    }

    /// Convert one decoded frame to canonical PCM.
    ///
    /// The output frame is sized for everything the context can emit for this
    /// input, so nothing accumulates inside SwrContext between calls.
    pub fn convert(
        &mut self,
        frame: &mut ffmpeg::util::frame::Audio,
    ) -> Result<ffmpeg::util::frame::Audio> {
        // swr_convert_frame rejects frames whose layout differs from the
        // context's, including an unspecified one
        if frame.channel_layout() != self.input.layout {
            frame.set_channel_layout(self.input.layout);
        }

        let capacity = self.output_capacity(frame.samples());
        let mut out = ffmpeg::util::frame::Audio::new(
            CANONICAL_SAMPLE_FORMAT,
            capacity,
            CANONICAL_CHANNEL_LAYOUT,
        );

        self.context
            .run(frame, &mut out)
            .map_err(|e| FfmpegError::Resample(format!("Resampling error: {}", e)))?;

        Ok(out)
    }

    /// Drain the samples still buffered inside the context.
    ///
    /// Returns `None` when nothing was buffered.
    pub fn flush(&mut self) -> Result<Option<ffmpeg::util::frame::Audio>> {
        let capacity = self.output_capacity(0);
        let mut out = ffmpeg::util::frame::Audio::new(
            CANONICAL_SAMPLE_FORMAT,
            capacity,
            CANONICAL_CHANNEL_LAYOUT,
        );

        if let Err(e) = self.context.flush(&mut out) {
            // Passthrough contexts hold nothing to flush
            tracing::debug!("Resampler flush returned non-fatal error: {}", e);
            return Ok(None);
        }

        if out.samples() == 0 {
            return Ok(None);
        }
        Ok(Some(out))
    }

    /// Output samples that `input_samples` more input can produce, including
    /// whatever the context already holds.
    fn output_capacity(&self, input_samples: usize) -> usize {
        let buffered = helpers::resampler_delay(&self.context, self.input.rate.max(1)) as u64;
        let total = buffered + input_samples as u64;
        let rate = self.input.rate.max(1) as u64;
        let scaled = (total * CANONICAL_SAMPLE_RATE as u64).div_ceil(rate);
        scaled as usize + OUTPUT_MARGIN
    }
}

/// Channel layout of `frame`, falling back to the default layout for its
/// channel count when the decoder left it unspecified.
fn source_layout(frame: &ffmpeg::util::frame::Audio) -> ChannelLayout {
    if frame.channel_layout().bits() == 0 {
        let channels = frame.channels().max(1) as i32;
        ChannelLayout::default(channels)
    } else {
        frame.channel_layout()
    }
}

/// Determine whether `frame` already is canonical PCM.
pub fn is_canonical(frame: &ffmpeg::util::frame::Audio) -> bool {
    frame.rate() == CANONICAL_SAMPLE_RATE
        && frame.format() == CANONICAL_SAMPLE_FORMAT
        && frame.channel_layout() == CANONICAL_CHANNEL_LAYOUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffmpeg::util::format::sample::Type;

    fn sine_frame(
        format: Sample,
        layout: ChannelLayout,
        rate: u32,
        samples: usize,
    ) -> ffmpeg::util::frame::Audio {
        let mut frame = ffmpeg::util::frame::Audio::new(format, samples, layout);
        frame.set_rate(rate);
        for ch in 0..layout.channels() as usize {
            let plane = helpers::audio_plane_data_mut(&mut frame, ch);
            if let Some(floats) = helpers::fltp_plane_as_f32_mut(plane, samples) {
                for (i, s) in floats.iter_mut().enumerate() {
                    *s = (i as f32 * 0.05).sin() * 0.5;
                }
            }
        }
        frame
    }

    #[test]
    fn test_canonical_constants() {
        assert_eq!(CANONICAL_SAMPLE_RATE, 48000);
        assert_eq!(CANONICAL_CHANNEL_LAYOUT, ChannelLayout::STEREO);
        assert_eq!(CANONICAL_SAMPLE_FORMAT.bytes(), 2);
        assert!(!CANONICAL_SAMPLE_FORMAT.is_planar());
    }

    #[test]
    fn test_resample_44100_mono_to_canonical() {
        crate::ffmpeg::init().unwrap();
        let fmt = Sample::F32(Type::Planar);
        let mut resampler =
            AudioResampler::new(&sine_frame(fmt, ChannelLayout::MONO, 44100, 1)).unwrap();

        let mut total = 0usize;
        for _ in 0..10 {
            let mut frame = sine_frame(fmt, ChannelLayout::MONO, 44100, 4410);
            assert!(resampler.matches(&frame));
            let out = resampler.convert(&mut frame).unwrap();
            assert!(is_canonical(&out));
            total += out.samples();
        }
        if let Some(tail) = resampler.flush().unwrap() {
            total += tail.samples();
        }
        // 44100 input samples at 44.1 kHz are one second at 48 kHz
        assert!((47_900..=48_100).contains(&total), "got {} samples", total);
    }

    #[test]
    fn test_matches_detects_rate_change() {
        crate::ffmpeg::init().unwrap();
        let fmt = Sample::F32(Type::Planar);
        let resampler =
            AudioResampler::new(&sine_frame(fmt, ChannelLayout::STEREO, 48000, 16)).unwrap();
        assert!(resampler.matches(&sine_frame(fmt, ChannelLayout::STEREO, 48000, 32)));
        assert!(!resampler.matches(&sine_frame(fmt, ChannelLayout::STEREO, 22050, 32)));
        assert!(!resampler.matches(&sine_frame(fmt, ChannelLayout::MONO, 48000, 32)));
    }
}
