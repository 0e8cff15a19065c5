//! Session API for hosts
//!
//! Free functions over the session types, one per host-facing operation.
//! A host that prefers methods can use the sessions directly.

use crate::config::{DecodeConfig, EncodeConfig};
use crate::error::Result;
use crate::session::{DecodeSession, EncodeSession, ReadStatus};
use crate::source::MediaSource;
use crate::transcode::OutputFormat;

/// Start an encode session. Header pages (Vorbis) are staged immediately.
pub fn start_encode(format: OutputFormat, config: &EncodeConfig) -> Result<EncodeSession> {
    EncodeSession::start(format, config)
}

/// Feed PCM and collect up to `out.len()` encoded bytes.
pub fn encode(session: &mut EncodeSession, pcm: &[u8], out: &mut [u8]) -> Result<usize> {
    session.encode(pcm, out)
}

/// Flush and drain. Repeat until it returns 0, then drop the session.
pub fn finish_encode(session: &mut EncodeSession, out: &mut [u8]) -> Result<usize> {
    session.finish(out)
}

/// Start a decode session over a host-supplied source.
pub fn start_decode<S>(source: S, config: &DecodeConfig) -> Result<DecodeSession>
where
    S: MediaSource + 'static,
{
    DecodeSession::open(Box::new(source), config)
}

/// Collect up to `out.len()` bytes of canonical PCM.
pub fn read(session: &mut DecodeSession, out: &mut [u8]) -> Result<ReadStatus> {
    session.read(out)
}

pub fn close_decode(session: DecodeSession) {
    session.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_start_decode_rejects_garbage_container() {
        crate::ffmpeg::init().unwrap();
        let err = start_decode(Cursor::new(Vec::<u8>::new()), &DecodeConfig::default())
            .err()
            .expect("nothing to decode");
        assert!(err.is_init_failure());
    }

    #[test]
    fn test_start_encode_rejects_bad_rate() {
        crate::ffmpeg::init().unwrap();
        let config = EncodeConfig {
            sample_rate: 12345,
            ..EncodeConfig::default()
        };
        let err = start_encode(OutputFormat::Mp3, &config).err().expect("bad rate");
        assert!(err.is_init_failure());
    }
}
