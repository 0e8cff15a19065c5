use thiserror::Error;

/// Main error type for transcode sessions
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No audio stream found in source")]
    NoAudioStream,

    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error(
        "Staging buffer overflow: requested={requested}, available={available}, capacity={capacity}"
    )]
    CapacityExceeded {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    #[error("PCM input of {0} bytes is not a whole number of 16-bit stereo frames")]
    UnalignedPcm(usize),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Container error: {0}")]
    Container(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl TranscodeError {
    /// True for failures raised while constructing a session (unsupported
    /// parameters, unrecognized container, missing codec).
    pub fn is_init_failure(&self) -> bool {
        match self {
            TranscodeError::NoAudioStream | TranscodeError::UnsupportedSampleRate(_) => true,
            TranscodeError::Ffmpeg(e) => e.is_init_failure(),
            _ => false,
        }
    }
}

/// FFmpeg-specific errors
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("FFmpeg initialization failed: {0}")]
    InitFailed(String),

    #[error("Failed to open input: {0}")]
    OpenInput(String),

    #[error("Failed to find stream info: {0}")]
    FindStreamInfo(String),

    #[error("Failed to find decoder: {0}")]
    DecoderNotFound(String),

    #[error("Failed to find encoder: {0}")]
    EncoderNotFound(String),

    #[error("Failed to create encoder: {0}")]
    EncoderCreate(String),

    #[error("Failed to create resampler: {0}")]
    ResamplerCreate(String),

    #[error("Failed to decode packet: {0}")]
    DecodePacket(String),

    #[error("Failed to encode frame: {0}")]
    EncodeFrame(String),

    #[error("Failed to resample frame: {0}")]
    Resample(String),

    #[error("Failed to read frame: {0}")]
    ReadFrame(String),
}

impl FfmpegError {
    fn is_init_failure(&self) -> bool {
        matches!(
            self,
            FfmpegError::InitFailed(_)
                | FfmpegError::OpenInput(_)
                | FfmpegError::FindStreamInfo(_)
                | FfmpegError::DecoderNotFound(_)
                | FfmpegError::EncoderNotFound(_)
                | FfmpegError::EncoderCreate(_)
                | FfmpegError::ResamplerCreate(_)
        )
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TranscodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_failure_classification() {
        assert!(TranscodeError::NoAudioStream.is_init_failure());
        assert!(TranscodeError::UnsupportedSampleRate(7).is_init_failure());
        assert!(
            TranscodeError::Ffmpeg(FfmpegError::EncoderNotFound("libmp3lame".into()))
                .is_init_failure()
        );
        assert!(!TranscodeError::SessionClosed.is_init_failure());
        assert!(!TranscodeError::CapacityExceeded {
            requested: 10,
            available: 5,
            capacity: 5
        }
        .is_init_failure());
        assert!(
            !TranscodeError::Ffmpeg(FfmpegError::EncodeFrame("boom".into())).is_init_failure()
        );
    }

    #[test]
    fn test_capacity_message() {
        let e = TranscodeError::CapacityExceeded {
            requested: 10,
            available: 4,
            capacity: 16,
        };
        assert_eq!(
            e.to_string(),
            "Staging buffer overflow: requested=10, available=4, capacity=16"
        );
    }
}
