//! Logical File Handle
//!
//! A FileBuffer view over one logical file of a multiplex store. Handles are
//! cheap; all handles to the same id share one per-file lock through the
//! store's handle map, so concurrent writers to one file serialize while
//! writers to different files only meet at the shared table/allocator locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::{BufferLock, FileBuffer};
use crate::error::{PlexError, Result};

use super::tree::LockAlloc;
use super::{FileShared, Loc, MuxCore};

/// Handle to one logical file inside a [`MultiplexFile`](super::MultiplexFile).
pub struct MuxFile {
    core: Arc<MuxCore>,
    shared: Arc<FileShared>,
    /// Advisory lock for callers composing multi-step operations on this
    /// handle. Distinct from the shared per-file lock, which single calls
    /// acquire themselves.
    advisory: BufferLock,
    open: AtomicBool,
}

impl MuxFile {
    pub(crate) fn new(core: Arc<MuxCore>, shared: Arc<FileShared>) -> Self {
        Self {
            core,
            shared,
            advisory: BufferLock::new(),
            open: AtomicBool::new(true),
        }
    }

    /// The logical file id this handle addresses.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) && self.core.backing.is_open() {
            Ok(())
        } else {
            Err(PlexError::Closed)
        }
    }

    fn loc(&self) -> Loc {
        Loc::Row(self.shared.id)
    }
}

impl FileBuffer for MuxFile {
    fn read_at(&self, pos: u64, dst: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let _file = self.shared.lock.read();
        self.core.read_file(self.loc(), pos, dst)
    }

    fn write_at(&self, pos: u64, src: &[u8]) -> Result<usize> {
        self.check_open()?;
        let _file = self.shared.lock.write();
        self.core
            .with_tx(|| self.core.write_file(self.loc(), &mut LockAlloc, pos, src))
    }

    fn len(&self) -> Result<u64> {
        self.check_open()?;
        let _file = self.shared.lock.read();
        self.core.file_length(self.loc())
    }

    fn truncate(&self, new_len: u64) -> Result<()> {
        self.check_open()?;
        let _file = self.shared.lock.write();
        self.core
            .with_tx(|| self.core.truncate_file(self.loc(), new_len))
    }

    fn lock(&self) -> &BufferLock {
        &self.advisory
    }

    fn force(&self) -> Result<()> {
        self.check_open()?;
        self.core.backing.force()
    }

    fn is_read_only(&self) -> bool {
        self.core.backing.is_read_only()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && self.core.backing.is_open()
    }

    /// Close this handle. The store and other handles stay usable.
    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }
}
