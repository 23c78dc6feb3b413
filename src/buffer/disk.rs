//! Disk Buffer
//!
//! Portable file-backed buffer: positional I/O through seek + read/write on a
//! plain file handle, serialized by an internal mutex.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{PlexError, Result};

use super::{BufferLock, FileBuffer};

/// Highest position a disk buffer accepts for a write. Mirrors the seek range
/// of the underlying file APIs.
const MAX_POSITION: u64 = i64::MAX as u64;

/// File-backed buffer using seek + read/write.
pub struct DiskBuffer {
    /// File handle; the mutex makes each positional operation atomic.
    file: Mutex<File>,
    /// Advisory lock handed to callers.
    lock: BufferLock,
    read_only: bool,
    open: AtomicBool,
}

impl DiskBuffer {
    /// Open (creating if missing) a read-write buffer at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self::from_file(file, false))
    }

    /// Open an existing file without write access.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self::from_file(file, true))
    }

    fn from_file(file: File, read_only: bool) -> Self {
        Self {
            file: Mutex::new(file),
            lock: BufferLock::new(),
            read_only,
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

impl FileBuffer for DiskBuffer {
    fn read_at(&self, pos: u64, dst: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if dst.is_empty() || pos > MAX_POSITION {
            return Ok(0);
        }
        let mut file = self.file.lock();
        let end = file.seek(SeekFrom::End(0))?;
        if pos >= end {
            return Ok(0);
        }
        file.seek(SeekFrom::Start(pos))?;
        let avail = (end - pos).min(dst.len() as u64) as usize;
        file.read_exact(&mut dst[..avail])?;
        Ok(avail)
    }

    fn write_at(&self, pos: u64, src: &[u8]) -> Result<usize> {
        self.check_open()?;
        if self.read_only {
            return Err(PlexError::ReadOnly);
        }
        let end = pos.checked_add(src.len() as u64).unwrap_or(u64::MAX);
        if end > MAX_POSITION {
            return Err(PlexError::OutOfBounds {
                pos: end,
                max: MAX_POSITION,
            });
        }
        if src.is_empty() {
            return Ok(0);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(src)?;
        Ok(src.len())
    }

    fn len(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(PlexError::ReadOnly);
        }
        let file = self.file.lock();
        if new_len < file.metadata()?.len() {
            file.set_len(new_len)?;
        }
        Ok(())
    }

    fn lock(&self) -> &BufferLock {
        &self.lock
    }

    fn force(&self) -> Result<()> {
        self.check_open()?;
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) -> Result<()> {
        if self.open.swap(false, Ordering::AcqRel) && !self.read_only {
            self.file.lock().sync_all()?;
        }
        Ok(())
    }
}
