//! File Repository
//!
//! Presents a multiplex store as a set of creatable/deletable/enumerable
//! files identified by a recyclable non-negative integer id.
//!
//! ## Responsibilities
//! - Track which ids exist (existence bitmap, separate from the store's own
//!   free-block accounting)
//! - Recycle deleted ids before minting new ones
//! - Enumerate live ids in ascending order
//!
//! The repository keeps its own state in the two lowest file ids of the
//! underlying store: the existence bitmap and a stack of recycled ids. Public
//! ids start above them and id 0 is never handed out.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::bitlist::Bitlist;
use crate::buffer::FileBuffer;
use crate::error::{PlexError, Result};
use crate::multiplex::{MultiplexFile, MuxFile};

/// Internal file id holding the existence bitmap.
const EXISTS_FILE: u64 = 0;
/// Internal file id holding the recycled-id stack (8-byte big-endian ids).
const RECYCLE_FILE: u64 = 1;
/// Lowest id ever returned by `create_file`.
const FIRST_PUBLIC_ID: u64 = 2;

/// Repository of logical files over one multiplex store.
pub struct FileRepository {
    mux: MultiplexFile,
    /// Set bit = id currently allocated.
    exists: Bitlist,
    /// Tail-popped stack of deleted ids awaiting reuse.
    recycle: MuxFile,
    /// Serializes create/delete so bitmap and stack stay in step.
    mutate: Mutex<()>,
}

impl FileRepository {
    /// Open the repository layer over `mux`, creating its internal files on
    /// first use.
    pub fn open(mux: MultiplexFile) -> Result<Self> {
        let exists_file = mux.open_file(EXISTS_FILE)?;
        let recycle = mux.open_file(RECYCLE_FILE)?;
        Ok(Self {
            mux,
            exists: Bitlist::new(Arc::new(exists_file) as Arc<dyn FileBuffer>),
            recycle,
            mutate: Mutex::new(()),
        })
    }

    /// The underlying multiplex store.
    pub fn multiplex(&self) -> &MultiplexFile {
        &self.mux
    }

    /// Number of files currently in existence.
    pub fn file_count(&self) -> Result<u64> {
        self.exists.count_set_bits()
    }

    /// Whether `id` names a live file.
    pub fn file_exists(&self, id: u64) -> Result<bool> {
        self.exists.get(id)
    }

    /// Iterate live file ids in ascending order.
    pub fn file_ids(&self) -> FileIdIter<'_> {
        FileIdIter {
            repository: self,
            next: FIRST_PUBLIC_ID,
            done: false,
        }
    }

    /// Open the file named `id`, failing with `FileNotFound` when it was
    /// never created or has been deleted.
    pub fn open_file(&self, id: u64) -> Result<MuxFile> {
        if !self.exists.get(id)? {
            return Err(PlexError::FileNotFound(id));
        }
        self.mux.open_file(id)
    }

    /// Create a file and return its id, reusing the most recently deleted id
    /// when one is available.
    pub fn create_file(&self) -> Result<u64> {
        let _mutate = self.mutate.lock();
        let stack_len = self.recycle.len()?;
        let id = if stack_len >= 8 {
            let mut encoded = [0u8; 8];
            self.recycle.read_at(stack_len - 8, &mut encoded)?;
            self.recycle.truncate(stack_len - 8)?;
            u64::from_be_bytes(encoded)
        } else {
            let id = self.mux.file_count()?.max(FIRST_PUBLIC_ID);
            // Materialize the row now so the next fresh id is distinct.
            self.mux.open_file(id)?;
            id
        };
        self.exists.set(id)?;
        debug!(file = id, "created repository file");
        Ok(id)
    }

    /// Delete the file named `id`. Returns false when no such file exists;
    /// internal ids are never deletable.
    pub fn delete_file(&self, id: u64) -> Result<bool> {
        if id < FIRST_PUBLIC_ID {
            return Ok(false);
        }
        let _mutate = self.mutate.lock();
        if !self.exists.get(id)? {
            return Ok(false);
        }
        self.mux.delete_file(id)?;
        self.exists.clear(id)?;
        let stack_len = self.recycle.len()?;
        self.recycle.write_at(stack_len, &id.to_be_bytes())?;
        debug!(file = id, "deleted repository file");
        Ok(true)
    }
}

/// Ascending iterator over live file ids.
pub struct FileIdIter<'a> {
    repository: &'a FileRepository,
    next: u64,
    done: bool,
}

impl Iterator for FileIdIter<'_> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.repository.exists.find_first_set(self.next) {
            Ok(Some(id)) => {
                self.next = id + 1;
                Some(Ok(id))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
