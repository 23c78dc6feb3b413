//! Read-Only Buffer
//!
//! Wrapper that passes reads through and rejects every mutation.

use crate::error::{PlexError, Result};

use super::{BufferLock, FileBuffer};

/// Read-only view over another buffer.
pub struct ReadOnlyBuffer<B: FileBuffer> {
    inner: B,
}

impl<B: FileBuffer> ReadOnlyBuffer<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    /// Unwrap, recovering the writable buffer.
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: FileBuffer> FileBuffer for ReadOnlyBuffer<B> {
    fn read_at(&self, pos: u64, dst: &mut [u8]) -> Result<usize> {
        self.inner.read_at(pos, dst)
    }

    fn write_at(&self, _pos: u64, _src: &[u8]) -> Result<usize> {
        Err(PlexError::ReadOnly)
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, _new_len: u64) -> Result<()> {
        Err(PlexError::ReadOnly)
    }

    fn lock(&self) -> &BufferLock {
        self.inner.lock()
    }

    fn force(&self) -> Result<()> {
        self.inner.force()
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
