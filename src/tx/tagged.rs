//! Tagged Transaction Buffer
//!
//! Marks a dirty bit in an external Bitlist for the duration of the outermost
//! transaction. A recovery process that finds the bit set after a restart
//! knows the process died mid-transaction; repair is the caller's problem.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::bitlist::Bitlist;
use crate::buffer::{BufferLock, FileBuffer};
use crate::error::{PlexError, Result};

use super::TxFileBuffer;

/// Transaction buffer tagging a dirty bit while any transaction is open.
pub struct TaggedTxBuffer<B: FileBuffer> {
    inner: B,
    tags: Arc<Bitlist>,
    tag_index: u64,
    /// Open-transaction nesting depth.
    depth: Mutex<usize>,
    /// Signalled whenever the depth returns to zero.
    idle: Condvar,
}

impl<B: FileBuffer> TaggedTxBuffer<B> {
    /// Wrap `inner`, tagging bit `tag_index` of `tags` while transactions are
    /// open.
    pub fn new(inner: B, tags: Arc<Bitlist>, tag_index: u64) -> Self {
        Self {
            inner,
            tags,
            tag_index,
            depth: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    /// Whether the dirty tag survived from an earlier incarnation. Checked
    /// before the first transaction of a fresh process.
    pub fn was_dirty(&self) -> Result<bool> {
        self.tags.get(self.tag_index)
    }

    /// Close, waiting at most `timeout` for in-flight transactions to finish.
    /// Returns `Ok(false)` if the wait expired and the buffer stayed open.
    pub fn close_timed(&self, timeout: Duration) -> Result<bool> {
        {
            let mut depth = self.depth.lock();
            while *depth > 0 {
                if self.idle.wait_for(&mut depth, timeout).timed_out() {
                    return Ok(false);
                }
            }
        }
        self.inner.close()?;
        Ok(true)
    }
}

impl<B: FileBuffer> FileBuffer for TaggedTxBuffer<B> {
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
        if new_len == 0 {
            // Recreating from scratch: abandon whatever transaction state was
            // accumulated and scrub the tag.
            let mut depth = self.depth.lock();
            *depth = 0;
            self.tags.clear(self.tag_index)?;
            self.idle.notify_all();
            drop(depth);
            return self.inner.truncate(0);
        }
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

    /// Close, waiting indefinitely for in-flight transactions to finish.
    fn close(&self) -> Result<()> {
        {
            let mut depth = self.depth.lock();
            while *depth > 0 {
                self.idle.wait(&mut depth);
            }
        }
        self.inner.close()
    }
}

impl<B: FileBuffer> TxFileBuffer for TaggedTxBuffer<B> {
    fn begin(&self) -> Result<()> {
        let mut depth = self.depth.lock();
        if *depth == 0 {
            // Tag must hit the bitmap before any write of this transaction.
            self.tags.set(self.tag_index)?;
            debug!(tag = self.tag_index, "dirty tag set");
        }
        *depth += 1;
        Ok(())
    }

    fn commit(&self) -> Result<bool> {
        let mut depth = self.depth.lock();
        if *depth == 0 {
            return Ok(false);
        }
        *depth -= 1;
        if *depth == 0 {
            self.tags.clear(self.tag_index)?;
            debug!(tag = self.tag_index, "dirty tag cleared");
            self.idle.notify_all();
        }
        Ok(true)
    }

    fn rollback(&self) -> Result<()> {
        Err(PlexError::Unsupported("rollback on a tagged buffer"))
    }

    fn is_rollback_supported(&self) -> bool {
        false
    }

    fn is_clean(&self) -> Result<bool> {
        let depth = self.depth.lock();
        Ok(*depth == 0 && !self.tags.get(self.tag_index)?)
    }
}
