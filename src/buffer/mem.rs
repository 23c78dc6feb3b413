//! Memory Buffer
//!
//! Heap-backed volatile buffer. Used by tests and as a scratch backend; the
//! contents vanish with the value.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{PlexError, Result};

use super::{BufferLock, FileBuffer};

/// Growable in-memory byte buffer.
pub struct MemBuffer {
    data: RwLock<Vec<u8>>,
    lock: BufferLock,
    open: AtomicBool,
}

impl MemBuffer {
    pub fn new() -> Self {
        Self::with_contents(Vec::new())
    }

    /// Start from existing bytes.
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            lock: BufferLock::new(),
            open: AtomicBool::new(true),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PlexError::Closed)
        }
    }
}

impl Default for MemBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FileBuffer for MemBuffer {
    fn read_at(&self, pos: u64, dst: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let data = self.data.read();
        if pos >= data.len() as u64 {
            return Ok(0);
        }
        let start = pos as usize;
        let n = dst.len().min(data.len() - start);
        dst[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, pos: u64, src: &[u8]) -> Result<usize> {
        self.check_open()?;
        let end = pos
            .checked_add(src.len() as u64)
            .filter(|&e| e <= usize::MAX as u64)
            .ok_or(PlexError::OutOfBounds {
                pos: u64::MAX,
                max: usize::MAX as u64,
            })?;
        if src.is_empty() {
            return Ok(0);
        }
        let mut data = self.data.write();
        if end as usize > data.len() {
            data.resize(end as usize, 0);
        }
        data[pos as usize..end as usize].copy_from_slice(src);
        Ok(src.len())
    }

    fn len(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        self.check_open()?;
        let mut data = self.data.write();
        if new_len < data.len() as u64 {
            data.truncate(new_len as usize);
        }
        Ok(())
    }

    fn lock(&self) -> &BufferLock {
        &self.lock
    }

    fn force(&self) -> Result<()> {
        self.check_open()
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}
