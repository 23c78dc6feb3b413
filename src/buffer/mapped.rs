//! Mapped Buffer
//!
//! Memory-mapped file buffer behind the same FileBuffer contract as the
//! portable DiskBuffer. Growth extends the file and rebuilds the mapping;
//! nothing above this module assumes mapping is available.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;

use crate::error::{PlexError, Result};

use super::{BufferLock, FileBuffer};

struct MappedInner {
    file: File,
    /// Mapping over the whole file; `None` while the file is empty (a
    /// zero-length mapping is not representable).
    map: Option<MmapMut>,
    len: u64,
}

impl MappedInner {
    /// Rebuild the mapping after the file length changed.
    fn remap(&mut self) -> Result<()> {
        self.map = if self.len == 0 {
            None
        } else {
            // The mutex gives this buffer sole access to the mapping; the file
            // handle is owned and not truncated elsewhere while mapped.
            let map = unsafe { MmapOptions::new().len(self.len as usize).map_mut(&self.file)? };
            Some(map)
        };
        Ok(())
    }
}

/// Memory-mapped file buffer.
pub struct MappedBuffer {
    inner: Mutex<MappedInner>,
    lock: BufferLock,
    open: AtomicBool,
}

impl MappedBuffer {
    /// Open (creating if missing) a mapped buffer at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let mut inner = MappedInner {
            file,
            map: None,
            len,
        };
        inner.remap()?;
        Ok(Self {
            inner: Mutex::new(inner),
            lock: BufferLock::new(),
            open: AtomicBool::new(true),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(PlexError::Closed)
        }
    }
}

impl FileBuffer for MappedBuffer {
    fn read_at(&self, pos: u64, dst: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let inner = self.inner.lock();
        if pos >= inner.len {
            return Ok(0);
        }
        let map = match inner.map.as_ref() {
            Some(m) => m,
            None => return Ok(0),
        };
        let start = pos as usize;
        let n = dst.len().min(inner.len as usize - start);
        dst[..n].copy_from_slice(&map[start..start + n]);
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
        let mut inner = self.inner.lock();
        if end > inner.len {
            inner.file.set_len(end)?;
            inner.len = end;
            inner.remap()?;
        }
        let map = inner.map.as_mut().expect("nonempty file is mapped");
        map[pos as usize..end as usize].copy_from_slice(src);
        Ok(src.len())
    }

    fn len(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.inner.lock().len)
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        self.check_open()?;
        let mut inner = self.inner.lock();
        if new_len >= inner.len {
            return Ok(());
        }
        // Drop the mapping before shrinking the file under it.
        inner.map = None;
        inner.file.set_len(new_len)?;
        inner.len = new_len;
        inner.remap()
    }

    fn lock(&self) -> &BufferLock {
        &self.lock
    }

    fn force(&self) -> Result<()> {
        self.check_open()?;
        let inner = self.inner.lock();
        if let Some(map) = inner.map.as_ref() {
            map.flush()?;
        }
        inner.file.sync_all()?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            let mut inner = self.inner.lock();
            if let Some(map) = inner.map.take() {
                map.flush()?;
            }
            inner.file.sync_all()?;
        }
        Ok(())
    }
}
