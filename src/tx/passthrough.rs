//! Pass-Through Transaction Buffer
//!
//! Satisfies the TxFileBuffer contract with no persistent state: a nesting
//! counter and nothing else. A single write or truncate cannot be observed
//! half-applied by a concurrent caller (the inner buffer already guarantees
//! that); no stronger atomicity is provided.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::{BufferLock, FileBuffer};
use crate::error::{PlexError, Result};

use super::TxFileBuffer;

/// Transaction wrapper that only counts nesting.
pub struct NonTxBuffer<B: FileBuffer> {
    inner: B,
    depth: AtomicUsize,
}

impl<B: FileBuffer> NonTxBuffer<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            depth: AtomicUsize::new(0),
        }
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: FileBuffer> FileBuffer for NonTxBuffer<B> {
    fn read_at(&self, pos: u64, dst: &mut [u8]) -> Result<usize> {
        self.inner.read_at(pos, dst)
    }

    fn write_at(&self, pos: u64, src: &[u8]) -> Result<usize> {
        self.begin()?;
        let result = self.inner.write_at(pos, src);
        self.commit()?;
        result
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        self.begin()?;
        let result = self.inner.truncate(new_len);
        self.commit()?;
        result
    }

    fn lock(&self) -> &BufferLock {
        self.inner.lock()
    }

    fn force(&self) -> Result<()> {
        self.inner.force()
    }

    fn is_read_only(&self) -> bool {
        self.inner.is_read_only()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

impl<B: FileBuffer> TxFileBuffer for NonTxBuffer<B> {
    fn begin(&self) -> Result<()> {
        self.depth.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn commit(&self) -> Result<bool> {
        let left = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1));
        Ok(left.is_ok())
    }

    fn rollback(&self) -> Result<()> {
        Err(PlexError::Unsupported("rollback on a pass-through buffer"))
    }

    fn is_rollback_supported(&self) -> bool {
        false
    }

    fn is_clean(&self) -> Result<bool> {
        Ok(self.depth.load(Ordering::Acquire) == 0)
    }
}
