//! Transcode configuration
//!
//! Loaded from a TOML file by the host binary; every section has defaults so
//! a partial file (or none at all) works.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TranscodeError};
use crate::transcode::encoder::{get_recommended_bitrate, OutputFormat};

/// Encode session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    /// Sample rate of the incoming PCM, in Hz
    pub sample_rate: u32,

    /// MP3 bitrate in bps
    pub mp3_bitrate: u64,

    /// Vorbis nominal bitrate in bps
    pub vorbis_bitrate: u64,

    /// Capacity of the output staging buffer in bytes
    pub output_staging_bytes: usize,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            mp3_bitrate: get_recommended_bitrate(OutputFormat::Mp3),
            vorbis_bitrate: get_recommended_bitrate(OutputFormat::Vorbis),
            output_staging_bytes: 3 * 1024 * 1024,
        }
    }
}

impl EncodeConfig {
    /// Bitrate to use for `format`
    pub fn bitrate_for(&self, format: OutputFormat) -> u64 {
        match format {
            OutputFormat::Mp3 => self.mp3_bitrate,
            OutputFormat::Vorbis => self.vorbis_bitrate,
        }
    }
}

/// Decode session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Capacity of the PCM staging buffer in bytes; must hold one resampled
    /// frame of the largest codec frame the host expects
    pub pcm_staging_bytes: usize,

    /// Size of the AVIO read buffer handed to the demuxer
    pub avio_buffer_bytes: usize,

    /// Compressed bytes buffered ahead of each demuxer read; below this a
    /// stalled source is reported as starvation instead of waited out
    pub read_ahead_bytes: usize,

    /// Packets allowed to fail decoding in a row before the stream ends
    pub max_decode_errors: u32,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            pcm_staging_bytes: 128 * 1024,
            avio_buffer_bytes: 4096,
            read_ahead_bytes: 16 * 1024,
            max_decode_errors: 32,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,

    /// Output format (json, pretty)
    pub format: String,

    /// Forward FFmpeg's own log output into tracing
    pub ffmpeg_logs: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            ffmpeg_logs: true,
        }
    }
}

/// Host configuration: how the binary drives sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Output capacity offered to each encode/read call
    pub chunk_bytes: usize,

    /// Give up on a job after this many seconds (no limit when unset)
    pub job_timeout_secs: Option<u64>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: 64 * 1024,
            job_timeout_secs: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub encode: EncodeConfig,
    pub decode: DecodeConfig,
    pub logging: LoggingConfig,
    pub host: HostConfig,
}

impl TranscodeConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: TranscodeConfig = toml::from_str(&content)
            .map_err(|e| TranscodeError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TranscodeError::Config(e.to_string()))
    }

    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<()> {
        if self.encode.sample_rate == 0 {
            return Err(TranscodeError::Config("encode.sample_rate must be > 0".into()));
        }
        if self.encode.mp3_bitrate == 0 || self.encode.vorbis_bitrate == 0 {
            return Err(TranscodeError::Config("encode bitrates must be > 0".into()));
        }
        if self.encode.output_staging_bytes == 0 {
            return Err(TranscodeError::Config(
                "encode.output_staging_bytes must be > 0".into(),
            ));
        }
        if self.decode.pcm_staging_bytes == 0
            || self.decode.avio_buffer_bytes == 0
            || self.decode.read_ahead_bytes == 0
        {
            return Err(TranscodeError::Config(
                "decode buffer sizes must be > 0".into(),
            ));
        }
        if self.host.chunk_bytes == 0 {
            return Err(TranscodeError::Config("host.chunk_bytes must be > 0".into()));
        }
        match self.logging.format.as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(TranscodeError::Config(format!(
                "logging.format must be json or pretty, got {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = TranscodeConfig::default();
        assert_eq!(config.encode.sample_rate, 48000);
        assert_eq!(config.encode.mp3_bitrate, 256_000);
        assert_eq!(config.encode.vorbis_bitrate, 128_000);
        assert_eq!(config.encode.output_staging_bytes, 3 * 1024 * 1024);
        assert_eq!(config.decode.avio_buffer_bytes, 4096);
        assert_eq!(config.decode.read_ahead_bytes, 16 * 1024);
        assert_eq!(config.decode.max_decode_errors, 32);
        assert_eq!(config.host.chunk_bytes, 65536);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bitrate_for() {
        let config = EncodeConfig::default();
        assert_eq!(config.bitrate_for(OutputFormat::Mp3), 256_000);
        assert_eq!(config.bitrate_for(OutputFormat::Vorbis), 128_000);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let mut config = TranscodeConfig::default();
        config.encode.sample_rate = 44100;
        config.host.job_timeout_secs = Some(30);

        let temp_file = NamedTempFile::new().unwrap();
        config.to_file(temp_file.path()).unwrap();

        let loaded = TranscodeConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.encode.sample_rate, 44100);
        assert_eq!(loaded.host.job_timeout_secs, Some(30));
        assert_eq!(loaded.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[encode]\nmp3_bitrate = 192000\n\n[logging]\nformat = \"json\"\n")
            .unwrap();

        let loaded = TranscodeConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.encode.mp3_bitrate, 192_000);
        assert_eq!(loaded.encode.sample_rate, 48000);
        assert_eq!(loaded.logging.format, "json");
        assert_eq!(loaded.decode.pcm_staging_bytes, 128 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = TranscodeConfig::default();
        config.encode.output_staging_bytes = 0;
        assert!(matches!(config.validate(), Err(TranscodeError::Config(_))));

        let mut config = TranscodeConfig::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[encode\nsample_rate = ").unwrap();
        let err = TranscodeConfig::from_file(temp_file.path()).unwrap_err();
        assert!(matches!(err, TranscodeError::Config(_)));
    }
}
