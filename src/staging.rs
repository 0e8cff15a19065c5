//! Fixed-capacity staging buffer
//!
//! Decouples codec output bursts from the chunk sizes callers ask for. The
//! buffer is allocated once; a read cursor and a write cursor move through it
//! and both snap back to zero whenever everything has been drained, so a
//! session can run indefinitely on a single allocation.
//!
//! Single owner only. Nothing here is thread-safe and nothing needs to be.

use crate::error::{Result, TranscodeError};

/// Bounded byte region with independent read/write cursors.
pub struct StagingBuffer {
    data: Box<[u8]>,
    read: usize,
    write: usize,
}

impl StagingBuffer {
    /// Allocate a buffer of exactly `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            read: 0,
            write: 0,
        }
    }

    /// Append `bytes` after the unread region.
    ///
    /// Fails with `CapacityExceeded` when the unread bytes plus `bytes` do not
    /// fit. Unread bytes are moved to the front first if that makes room.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.reserve(bytes.len())?;

        if self.write + bytes.len() > self.data.len() {
            self.compact();
        }

        let end = self.write + bytes.len();
        self.data[self.write..end].copy_from_slice(bytes);
        self.write = end;
        Ok(())
    }

    /// Copy up to `dest.len()` unread bytes into `dest` and return the count.
    pub fn drain_into(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.len());
        if n == 0 {
            return 0;
        }

        dest[..n].copy_from_slice(&self.data[self.read..self.read + n]);
        self.read += n;

        if self.read == self.write {
            self.read = 0;
            self.write = 0;
        }
        n
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.write - self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes that can still be appended before the buffer overflows.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Check that `len` more bytes would fit, without appending anything.
    pub fn reserve(&self, len: usize) -> Result<()> {
        if len <= self.remaining() {
            return Ok(());
        }
        tracing::error!(
            requested = len,
            available = self.remaining(),
            capacity = self.capacity(),
            "staging buffer overflow"
        );
        Err(TranscodeError::CapacityExceeded {
            requested: len,
            available: self.remaining(),
            capacity: self.capacity(),
        })
    }

    /// Current `(read, write)` cursor positions.
    pub fn cursors(&self) -> (usize, usize) {
        (self.read, self.write)
    }

    /// Free the allocation. The buffer has zero capacity afterwards.
    pub fn release(&mut self) {
        self.data = Box::default();
        self.read = 0;
        self.write = 0;
    }

    fn compact(&mut self) {
        let len = self.len();
        self.data.copy_within(self.read..self.write, 0);
        self.read = 0;
        self.write = len;
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("capacity", &self.capacity())
            .field("read", &self.read)
            .field("write", &self.write)
            .finish()
    }
}
