//! Store Header
//!
//! Fixed-layout header persisted at the start of the backing store (after the
//! caller's reserved prefix), plus the derived geometry every addressing
//! computation runs on.
//!
//! ## Header Format
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Reserved prefix (caller-defined length R)                │
//! ├──────────────────────────────────────────────────────────┤
//! │ Magic: "MPXF" (4) | BlockSize: u32 (4)                   │
//! │ BlockIdScale: u8 (1) | LengthScale: u8 (1)               │
//! ├──────────────────────────────────────────────────────────┤
//! │ TotalBlocks (scale) | FirstFreeBlock hint (scale)        │
//! ├──────────────────────────────────────────────────────────┤
//! │ FileTable entry (lengthScale + blockIdScale)             │
//! │ FreeBitmap entry (lengthScale + blockIdScale)            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//! All integers big-endian. Blocks are numbered from 1 and laid out
//! back-to-back after the header; block id 0 always means "absent".

use crate::config::StoreOptions;
use crate::error::{PlexError, Result};

use super::scaled::{get_scaled, put_scaled};

/// Magic bytes identifying a multiplex store
pub(crate) const MAGIC: &[u8; 4] = b"MPXF";

/// Fixed header bytes before the scaled fields: magic + block size + scales
pub(crate) const FIXED_HEADER: usize = 10;

/// Per-file metadata: biased length plus root block id.
///
/// The stored length field carries `length + 1` so that an all-zero entry
/// (field 0, root 0) means "absent", distinguishable from a present file of
/// length exactly 0. With a length scale of 0 the field vanishes and length
/// is implied by the root: one full block when present, 0 when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    /// Stored (biased) length field; meaningless when the length scale is 0.
    pub raw_len: u64,
    /// Root block id; 0 when no block is attached.
    pub root: u64,
}

impl Entry {
    pub const ABSENT: Entry = Entry { raw_len: 0, root: 0 };

    pub fn decode(geom: &Geometry, bytes: &[u8]) -> Entry {
        let ls = geom.length_scale as usize;
        let s = geom.block_id_scale as usize;
        Entry {
            raw_len: get_scaled(&bytes[..ls]),
            root: get_scaled(&bytes[ls..ls + s]),
        }
    }

    pub fn encode(&self, geom: &Geometry, out: &mut [u8]) {
        let ls = geom.length_scale as usize;
        let s = geom.block_id_scale as usize;
        put_scaled(self.raw_len, &mut out[..ls]);
        put_scaled(self.root, &mut out[ls..ls + s]);
    }

    /// Current byte length of the file this entry describes.
    pub fn length(&self, geom: &Geometry) -> u64 {
        if geom.length_scale == 0 {
            if self.root == 0 {
                0
            } else {
                u64::from(geom.block_size)
            }
        } else {
            self.raw_len.saturating_sub(1)
        }
    }

    /// Entry for a present file of `length` bytes rooted at `root`.
    pub fn with_length(geom: &Geometry, length: u64, root: u64) -> Entry {
        let raw_len = if geom.length_scale == 0 { 0 } else { length + 1 };
        Entry { raw_len, root }
    }
}

/// Immutable store geometry, derived once from the header.
#[derive(Debug)]
pub(crate) struct Geometry {
    pub reserved: u32,
    pub block_size: u32,
    pub block_id_scale: u8,
    pub length_scale: u8,

    /// Child pointers per index block: `block_size / block_id_scale`.
    pub ids_per_block: u64,
    /// Bytes per file-table row: `length_scale + block_id_scale`.
    pub entry_size: u64,
    /// Absolute offset of the total-blocks / free-hint counter pair.
    pub counters_offset: u64,
    /// Absolute offset of the file-table root entry.
    pub table_entry_offset: u64,
    /// Absolute offset of the free-bitmap root entry.
    pub bitmap_entry_offset: u64,
    /// Total header bytes; block 1 starts here.
    pub header_len: u64,

    /// Highest block id the scale can encode.
    pub max_block_id: u64,
    /// Largest length any one logical file may reach.
    pub max_file_length: u64,
    /// `level_max_sizes[k]` = largest file a k-level tree addresses, capped at
    /// the first overflow. Monotonic, so `levels()` binary-searches it.
    pub level_max_sizes: Vec<u64>,
}

impl Geometry {
    pub fn from_options(options: &StoreOptions) -> Result<Self> {
        options.validate()?;
        let bs = u64::from(options.block_size);
        let s = u64::from(options.block_id_scale);
        let ls = u64::from(options.length_scale);
        let ids_per_block = bs / s;
        let entry_size = ls + s;

        let counters_offset = u64::from(options.reserved) + FIXED_HEADER as u64;
        let table_entry_offset = counters_offset + 2 * s;
        let bitmap_entry_offset = table_entry_offset + entry_size;
        let header_len = bitmap_entry_offset + entry_size;

        let max_block_id = if options.block_id_scale == 8 {
            u64::MAX
        } else {
            (1u64 << (8 * s)) - 1
        };

        let mut level_max_sizes = vec![bs];
        loop {
            let last = *level_max_sizes.last().expect("table is never empty");
            if last == u64::MAX || last >= max_block_id.saturating_mul(bs) {
                break;
            }
            match last.checked_mul(ids_per_block) {
                Some(next) => level_max_sizes.push(next),
                None => {
                    level_max_sizes.push(u64::MAX);
                    break;
                }
            }
        }

        let length_cap = match options.length_scale {
            0 => bs,
            8 => u64::MAX - 1,
            n => (1u64 << (8 * u64::from(n))) - 2,
        };
        let max_file_length = length_cap
            .min(*level_max_sizes.last().expect("table is never empty"))
            .min(max_block_id.saturating_mul(bs));

        Ok(Self {
            reserved: options.reserved,
            block_size: options.block_size,
            block_id_scale: options.block_id_scale,
            length_scale: options.length_scale,
            ids_per_block,
            entry_size,
            counters_offset,
            table_entry_offset,
            bitmap_entry_offset,
            header_len,
            max_block_id,
            max_file_length,
            level_max_sizes,
        })
    }

    /// Reconstruct geometry from the fixed header bytes of an existing store.
    pub fn from_header(reserved: u32, fixed: &[u8; FIXED_HEADER]) -> Result<Self> {
        if &fixed[0..4] != MAGIC {
            return Err(PlexError::Corrupt(format!(
                "bad magic: expected {:?}, got {:?}",
                MAGIC,
                &fixed[0..4]
            )));
        }
        let block_size = u32::from_be_bytes(fixed[4..8].try_into().expect("4 bytes"));
        let options = StoreOptions {
            reserved,
            block_size,
            block_id_scale: fixed[8],
            length_scale: fixed[9],
        };
        Self::from_options(&options)
    }

    /// Serialize the fixed header bytes (magic, block size, scales).
    pub fn fixed_header(&self) -> [u8; FIXED_HEADER] {
        let mut out = [0u8; FIXED_HEADER];
        out[0..4].copy_from_slice(MAGIC);
        out[4..8].copy_from_slice(&self.block_size.to_be_bytes());
        out[8] = self.block_id_scale;
        out[9] = self.length_scale;
        out
    }

    /// Physical offset of block `id` (ids start at 1).
    pub fn block_offset(&self, id: u64) -> u64 {
        debug_assert!(id != 0, "block 0 is the absent sentinel");
        self.header_len + (id - 1) * u64::from(self.block_size)
    }

    /// Tree depth needed to address a file of `length` bytes: the smallest k
    /// with `level_max_sizes[k] >= length`.
    pub fn levels(&self, length: u64) -> usize {
        self.level_max_sizes.partition_point(|&max| max < length)
    }

    /// Number of whole blocks backing `length` bytes.
    pub fn blocks_for_len(&self, length: u64) -> u64 {
        length.div_ceil(u64::from(self.block_size))
    }

    /// Data blocks addressed by one child of a level-`level` index node.
    pub fn child_capacity(&self, level: usize) -> u64 {
        self.level_max_sizes[level - 1] / u64::from(self.block_size)
    }
}
