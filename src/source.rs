//! Media Source capability
//!
//! A decode session pulls compressed bytes from whatever transport the host
//! hands it. The pull runs synchronously on the session's worker and may
//! block (a socket read, a pipe).

use std::io::{self, Read};

/// Pull-based supplier of compressed media bytes.
///
/// - `Ok(0)` means end of stream, permanently.
/// - `Err(e)` with `ErrorKind::WouldBlock` means nothing is available right
///   now but more may come later.
/// - Any other error ends the stream.
pub trait MediaSource {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<R: Read> MediaSource for R {
    fn pull(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io::Cursor;

    #[test]
    fn test_cursor_source_reports_eof() {
        let mut src = Cursor::new(Bytes::from_static(b"abcdef"));
        let mut buf = [0u8; 4];
        assert_eq!(src.pull(&mut buf).unwrap(), 4);
        assert_eq!(src.pull(&mut buf).unwrap(), 2);
        assert_eq!(src.pull(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_boxed_source() {
        let mut src: Box<dyn MediaSource> = Box::new(Cursor::new(vec![1u8, 2, 3]));
        let mut buf = [0u8; 8];
        assert_eq!(src.pull(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
    }
}
