//! MultiplexFile Module
//!
//! The allocator/addressing engine: carves one backing buffer into fixed-size
//! blocks and multiplexes an unbounded number of independently-sized logical
//! files over them.
//!
//! ## Responsibilities
//! - Per-file indirect-block trees (depth grows with file length)
//! - Free-block accounting: a first-fit bitmap plus a total-blocks counter
//! - The file table: itself a multiplexed file holding one row per file id
//! - Sparse semantics: absent blocks read as zero, interior gaps stay
//!   unallocated
//!
//! ## Layout
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │ Header (see header.rs) — counters + two internal entries  │
//! ├───────────────────────────────────────────────────────────┤
//! │ Block 1 │ Block 2 │ Block 3 │ ...                         │
//! └───────────────────────────────────────────────────────────┘
//! ```
//! The file table's and free bitmap's own metadata live at fixed header
//! offsets; every other file's metadata is a row inside the file table.
//!
//! ## Locking
//! Acquisition order, outermost first: (1) one logical file's own lock,
//! (2) the shared file-table lock, (3) the shared allocator lock. The table
//! lock is never taken while the allocator lock is held.

mod alloc;
mod cache;
mod file;
mod header;
mod io;
mod scaled;
mod tree;

pub use file::MuxFile;

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::StoreOptions;
use crate::error::{PlexError, Result};
use crate::tx::TxFileBuffer;

use self::cache::{NodeCache, DEFAULT_NODE_CACHE};
use self::header::{Entry, Geometry, FIXED_HEADER};
use self::tree::LockAlloc;

// =============================================================================
// Internal State
// =============================================================================

/// Which file's metadata an operation addresses.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Loc {
    /// The file table itself (metadata at a fixed header offset).
    Table,
    /// The free bitmap (metadata at a fixed header offset).
    Bitmap,
    /// A regular file: row `id` of the file table.
    Row(u64),
}

/// Allocator counters, mirrored in the header. Guarded by `MuxCore::alloc`.
pub(crate) struct AllocState {
    /// Blocks ever carved out of the backing store.
    pub total_blocks: u64,
    /// Lowest known-free block id; 0 when none is known.
    pub free_hint: u64,
}

/// Per-file-id state shared by every open handle to that file, so concurrent
/// handles serialize through one lock instance.
pub(crate) struct FileShared {
    pub id: u64,
    pub lock: RwLock<()>,
}

pub(crate) struct MuxCore {
    pub backing: Arc<dyn TxFileBuffer>,
    pub geom: Geometry,
    /// Allocator counters; also serializes all free-bitmap access.
    pub alloc: Mutex<AllocState>,
    /// Guards the file table: header entry, rows, and the table's own tree.
    pub table_lock: RwLock<()>,
    /// Bounded LRU of index-node blocks.
    pub nodes: Mutex<NodeCache>,
    /// Live per-file shared state, reclaimed once every handle drops.
    handles: Mutex<HashMap<u64, Weak<FileShared>>>,
}

impl MuxCore {
    /// Bracket a mutation in the backing store's transaction, committing even
    /// when the mutation fails so the nesting stays balanced.
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.backing.begin()?;
        let result = f();
        match self.backing.commit() {
            Ok(_) => result,
            Err(commit_err) => result.and(Err(commit_err)),
        }
    }

    /// Shared state for file `id`, creating it if no handle is live.
    pub(crate) fn shared_for(&self, id: u64) -> Arc<FileShared> {
        let mut handles = self.handles.lock();
        if let Some(existing) = handles.get(&id).and_then(Weak::upgrade) {
            return existing;
        }
        // Sweep entries whose handles have all dropped.
        handles.retain(|_, weak| weak.strong_count() > 0);
        let shared = Arc::new(FileShared {
            id,
            lock: RwLock::new(()),
        });
        handles.insert(id, Arc::downgrade(&shared));
        shared
    }

    // -------------------------------------------------------------------------
    // Entry access
    // -------------------------------------------------------------------------

    /// Read a file's metadata entry.
    ///
    /// `Table` entries assume the table lock is held (any mode); `Bitmap`
    /// entries assume the allocator lock is held; `Row` entries take the
    /// table lock themselves.
    pub(crate) fn entry_get(&self, loc: Loc) -> Result<Entry> {
        match loc {
            Loc::Table => self.header_entry(self.geom.table_entry_offset),
            Loc::Bitmap => self.header_entry(self.geom.bitmap_entry_offset),
            Loc::Row(id) => {
                let offset = self.row_offset(id)?;
                let _table = self.table_lock.read();
                let mut row = [0u8; 16];
                let esz = self.geom.entry_size as usize;
                self.read_file(Loc::Table, offset, &mut row[..esz])?;
                Ok(Entry::decode(&self.geom, &row[..esz]))
            }
        }
    }

    /// Write a file's metadata entry. Locking contract mirrors `entry_get`,
    /// with `Row` taking the table lock exclusively.
    pub(crate) fn entry_put(&self, loc: Loc, entry: Entry) -> Result<()> {
        let esz = self.geom.entry_size as usize;
        let mut row = [0u8; 16];
        entry.encode(&self.geom, &mut row[..esz]);
        match loc {
            Loc::Table => {
                self.backing
                    .write_at(self.geom.table_entry_offset, &row[..esz])?;
            }
            Loc::Bitmap => {
                self.backing
                    .write_at(self.geom.bitmap_entry_offset, &row[..esz])?;
            }
            Loc::Row(id) => {
                let offset = self.row_offset(id)?;
                let _table = self.table_lock.write();
                self.write_file(Loc::Table, &mut LockAlloc, offset, &row[..esz])?;
            }
        }
        Ok(())
    }

    /// Byte offset of row `id` inside the file table.
    fn row_offset(&self, id: u64) -> Result<u64> {
        id.checked_mul(self.geom.entry_size)
            .ok_or(PlexError::OutOfBounds {
                pos: u64::MAX,
                max: self.geom.max_file_length,
            })
    }

    fn header_entry(&self, offset: u64) -> Result<Entry> {
        let esz = self.geom.entry_size as usize;
        let mut row = [0u8; 16];
        let n = self.backing.read_at(offset, &mut row[..esz])?;
        row[n..esz].fill(0);
        Ok(Entry::decode(&self.geom, &row[..esz]))
    }

    /// Current length of the file at `loc`.
    pub(crate) fn file_length(&self, loc: Loc) -> Result<u64> {
        Ok(self.entry_get(loc)?.length(&self.geom))
    }

    /// Grow the file table's apparent length (sparse — allocates nothing) so
    /// ids below `count` all have an addressable row.
    fn reserve_rows(&self, count: u64) -> Result<()> {
        let needed = count
            .checked_mul(self.geom.entry_size)
            .ok_or(PlexError::OutOfBounds {
                pos: u64::MAX,
                max: self.geom.max_file_length,
            })?;
        if needed > self.geom.max_file_length {
            return Err(PlexError::OutOfBounds {
                pos: needed,
                max: self.geom.max_file_length,
            });
        }
        let _table = self.table_lock.write();
        let entry = self.entry_get(Loc::Table)?;
        if needed > entry.length(&self.geom) {
            self.entry_put(Loc::Table, Entry::with_length(&self.geom, needed, entry.root))?;
        }
        Ok(())
    }
}

// =============================================================================
// Public Handle
// =============================================================================

/// A multiplex store: many logical files inside one backing buffer.
///
/// Cloning is cheap and clones share all state. Logical files come into
/// existence on first open (length 0) and are addressed by a non-negative id.
#[derive(Clone)]
pub struct MultiplexFile {
    core: Arc<MuxCore>,
}

impl MultiplexFile {
    /// Initialize a fresh store on `backing`, writing the header. The
    /// geometry is fixed for the life of the store.
    pub fn create(backing: Arc<dyn TxFileBuffer>, options: &StoreOptions) -> Result<Self> {
        let geom = Geometry::from_options(options)?;
        let mut header = vec![0u8; (geom.header_len - u64::from(geom.reserved)) as usize];
        header[..FIXED_HEADER].copy_from_slice(&geom.fixed_header());
        backing.begin()?;
        let written = backing.write_at(u64::from(geom.reserved), &header);
        backing.commit()?;
        written?;
        debug!(
            block_size = geom.block_size,
            block_id_scale = geom.block_id_scale,
            length_scale = geom.length_scale,
            "created multiplex store"
        );
        Ok(Self::from_geometry(backing, geom, 0, 0))
    }

    /// Open an existing store, reading the geometry back from its header.
    pub fn open(backing: Arc<dyn TxFileBuffer>, reserved: u32) -> Result<Self> {
        let mut fixed = [0u8; FIXED_HEADER];
        let n = backing.read_at(u64::from(reserved), &mut fixed)?;
        if n < FIXED_HEADER {
            return Err(PlexError::Corrupt("truncated store header".to_string()));
        }
        let geom = Geometry::from_header(reserved, &fixed)?;
        let scale = geom.block_id_scale as usize;
        let mut counters = [0u8; 16];
        let read = backing.read_at(geom.counters_offset, &mut counters[..2 * scale])?;
        counters[read..2 * scale].fill(0);
        let total_blocks = scaled::get_scaled(&counters[..scale]);
        let free_hint = scaled::get_scaled(&counters[scale..2 * scale]);
        debug!(
            block_size = geom.block_size,
            total_blocks, free_hint, "opened multiplex store"
        );
        Ok(Self::from_geometry(backing, geom, total_blocks, free_hint))
    }

    /// Open `backing` as a store, creating the header when the buffer holds
    /// nothing past the reserved prefix.
    pub fn open_or_create(
        backing: Arc<dyn TxFileBuffer>,
        options: &StoreOptions,
    ) -> Result<Self> {
        if backing.len()? <= u64::from(options.reserved) {
            Self::create(backing, options)
        } else {
            Self::open(backing, options.reserved)
        }
    }

    fn from_geometry(
        backing: Arc<dyn TxFileBuffer>,
        geom: Geometry,
        total_blocks: u64,
        free_hint: u64,
    ) -> Self {
        Self {
            core: Arc::new(MuxCore {
                backing,
                geom,
                alloc: Mutex::new(AllocState {
                    total_blocks,
                    free_hint,
                }),
                table_lock: RwLock::new(()),
                nodes: Mutex::new(NodeCache::new(DEFAULT_NODE_CACHE)),
                handles: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open logical file `id`, creating it (length 0) if it does not exist.
    /// All handles to one id share a single per-file lock.
    pub fn open_file(&self, id: u64) -> Result<MuxFile> {
        let rows = id.checked_add(1).ok_or(PlexError::OutOfBounds {
            pos: u64::MAX,
            max: self.core.geom.max_file_length,
        })?;
        let shared = self.core.shared_for(id);
        self.core.with_tx(|| self.core.reserve_rows(rows))?;
        Ok(MuxFile::new(Arc::clone(&self.core), shared))
    }

    /// Delete logical file `id`: truncate it to zero, release its blocks, and
    /// clear its file-table row.
    pub fn delete_file(&self, id: u64) -> Result<()> {
        if id >= self.file_count()? {
            return Ok(());
        }
        let shared = self.core.shared_for(id);
        let _file = shared.lock.write();
        self.core.with_tx(|| {
            self.core.truncate_file(Loc::Row(id), 0)?;
            self.core.entry_put(Loc::Row(id), Entry::ABSENT)
        })?;
        debug!(file = id, "deleted logical file");
        Ok(())
    }

    /// Number of file ids the table currently addresses.
    pub fn file_count(&self) -> Result<u64> {
        let _table = self.core.table_lock.read();
        Ok(self.core.file_length(Loc::Table)? / self.core.geom.entry_size)
    }

    /// Delete every file with id >= `count` and shrink the table to match.
    pub fn truncate_file_count(&self, count: u64) -> Result<()> {
        let current = self.file_count()?;
        for id in count..current {
            self.delete_file(id)?;
        }
        let _table = self.core.table_lock.write();
        self.core.with_tx(|| {
            self.core
                .truncate_file(Loc::Table, count * self.core.geom.entry_size)
        })
    }

    /// Flush all store state to the underlying medium.
    pub fn force(&self) -> Result<()> {
        self.core.backing.force()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Physical block size in bytes.
    pub fn block_size(&self) -> u32 {
        self.core.geom.block_size
    }

    /// Bytes per encoded block id.
    pub fn block_id_scale(&self) -> u8 {
        self.core.geom.block_id_scale
    }

    /// Bytes per encoded file length.
    pub fn length_scale(&self) -> u8 {
        self.core.geom.length_scale
    }

    /// Largest length any one logical file may reach.
    pub fn max_file_length(&self) -> u64 {
        self.core.geom.max_file_length
    }

    /// Blocks carved out of the backing store so far (free ones included).
    pub fn block_count(&self) -> u64 {
        self.core.alloc.lock().total_blocks
    }
}
