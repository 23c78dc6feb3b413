//! File-Level I/O
//!
//! Read, write, and truncate one logical file by its metadata location.
//! These run below the per-file locks and above the tree walks: they fetch
//! the entry, reshape the tree when the length changes, and write the entry
//! back.

use crate::error::{PlexError, Result};

use super::header::Entry;
use super::tree::AllocSource;
use super::{Loc, MuxCore};

impl MuxCore {
    /// Read into `dst` from `pos` of the file at `loc`. Returns the count of
    /// bytes inside the file's length; the remainder of `dst` is zero-filled.
    /// Untouched (sparse) ranges inside the file read as zeros.
    pub(crate) fn read_file(&self, loc: Loc, pos: u64, dst: &mut [u8]) -> Result<usize> {
        let entry = self.entry_get(loc)?;
        let length = entry.length(&self.geom);
        if pos >= length {
            dst.fill(0);
            return Ok(0);
        }
        let avail = ((length - pos).min(dst.len() as u64)) as usize;
        let levels = self.geom.levels(length);
        self.tree_read(entry.root, levels, pos, &mut dst[..avail])?;
        dst[avail..].fill(0);
        Ok(avail)
    }

    /// Write `src` at `pos` of the file at `loc`, growing it as needed.
    ///
    /// Growth wraps the root in additional index levels, zero-scrubs the tail
    /// of the old last block (stale bytes may survive an earlier shrink), and
    /// allocates lazily along the write path only — interior blocks of a gap
    /// are never materialized.
    pub(crate) fn write_file(
        &self,
        loc: Loc,
        alloc: &mut dyn AllocSource,
        pos: u64,
        src: &[u8],
    ) -> Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let end = pos
            .checked_add(src.len() as u64)
            .ok_or(PlexError::OutOfBounds {
                pos: u64::MAX,
                max: self.geom.max_file_length,
            })?;
        if end > self.geom.max_file_length {
            return Err(PlexError::OutOfBounds {
                pos: end,
                max: self.geom.max_file_length,
            });
        }

        let entry = self.entry_get(loc)?;
        let old_length = entry.length(&self.geom);
        let new_length = old_length.max(end);
        let new_levels = self.geom.levels(new_length);
        let block_size = u64::from(self.geom.block_size);

        let mut root = entry.root;
        if root == 0 {
            root = alloc.alloc(self)?;
            let partial = !(pos == 0 && src.len() as u64 == block_size);
            if new_levels > 0 || partial {
                self.clear_block(root)?;
            }
        } else {
            for _ in self.geom.levels(old_length)..new_levels {
                let wrapper = alloc.alloc(self)?;
                self.clear_block(wrapper)?;
                self.set_child(wrapper, 0, root)?;
                root = wrapper;
            }
        }

        if pos > old_length {
            // Scrub the tail of the old last block up to the next boundary;
            // everything past that is either skipped (sparse interior) or a
            // fresh block the write path clears itself.
            let old_block_end = old_length.div_ceil(block_size) * block_size;
            let scrub_end = pos.min(old_block_end);
            if scrub_end > old_length {
                self.tree_zero(root, new_levels, old_length, scrub_end - old_length)?;
            }
        }

        self.tree_write(alloc, root, new_levels, pos, src)?;

        if new_length != old_length || root != entry.root {
            self.entry_put(loc, Entry::with_length(&self.geom, new_length, root))?;
        }
        Ok(src.len())
    }

    /// Shrink the file at `loc` to `new_length` bytes, freeing every block
    /// past the new end and lowering the tree if its height is no longer
    /// needed. Growing is the write path's job; a non-shrinking call is a
    /// no-op.
    pub(crate) fn truncate_file(&self, loc: Loc, new_length: u64) -> Result<()> {
        let entry = self.entry_get(loc)?;
        let old_length = entry.length(&self.geom);
        if new_length >= old_length {
            return Ok(());
        }

        if self.geom.length_scale == 0 {
            // Single-block files: only truncation to nothing changes state.
            if new_length == 0 && entry.root != 0 {
                let mut state = self.alloc.lock();
                self.free_block_locked(&mut state, entry.root)?;
                drop(state);
                self.entry_put(loc, Entry::ABSENT)?;
            }
            return Ok(());
        }

        let old_levels = self.geom.levels(old_length);
        let new_levels = self.geom.levels(new_length);
        let mut root = entry.root;
        if root != 0 {
            let mut state = self.alloc.lock();
            if new_length == 0 {
                self.tree_free(&mut state, root, old_levels)?;
                root = 0;
            } else {
                let keep = self.geom.blocks_for_len(new_length);
                if keep < self.geom.blocks_for_len(old_length) {
                    self.tree_truncate(&mut state, root, old_levels, keep)?;
                }
                // The kept range lives entirely under slot 0 of each level
                // being shed; free the old root chain and promote.
                for _ in new_levels..old_levels {
                    let child = self.child_at(root, 0)?;
                    self.free_block_locked(&mut state, root)?;
                    root = child;
                    if root == 0 {
                        break;
                    }
                }
            }
        }
        // Allocator lock released before the table is touched.
        self.entry_put(loc, Entry::with_length(&self.geom, new_length, root))
    }
}
